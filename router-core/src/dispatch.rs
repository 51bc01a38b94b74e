//
// dispatch.rs - Packet reception and forwarding
//
// Purpose:
//   Ties the interface table, routing table, ARP cache and transmitter together behind one
//   entry point, `Router::receive`. Everything this crate does to a packet - answering ARP,
//   replying to echo requests, bouncing ICMP errors, forwarding - happens here; the other
//   modules only supply the data structures and the codec.
//

use crate::arp::ArpCache;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::header::*;
use crate::iface::{Interface, InterfaceTable};
use crate::route::RoutingTable;
use crate::send::{self, Transmitter};
use std::sync::Arc;

/// Owns the router's tables and drives packets between them and a [`Transmitter`]. Spawns
/// a background sweeper on construction that retires expired ARP entries and retries
/// pending requests; dropping the router stops it.
pub struct Router<T: Transmitter + 'static> {
    ifaces: Arc<InterfaceTable>,
    routes: RoutingTable,
    arp: Arc<ArpCache>,
    config: RouterConfig,
    transmitter: Arc<T>,
    sweeper: crate::arp::ArpSweeper,
}

impl<T: Transmitter + 'static> Router<T> {
    pub fn new(ifaces: InterfaceTable, routes: RoutingTable, config: RouterConfig, transmitter: T) -> Self {
        let ifaces = Arc::new(ifaces);
        let arp = Arc::new(ArpCache::new(config));
        let transmitter = Arc::new(transmitter);

        let sweep_ifaces = ifaces.clone();
        let sweep_transmitter = transmitter.clone();
        let sweeper = crate::arp::ArpSweeper::spawn(arp.clone(), move |cache, ipv4| {
            send::drive_pending_request(cache, &sweep_ifaces, sweep_transmitter.as_ref(), &config, ipv4);
        });

        Self {
            ifaces,
            routes,
            arp,
            config,
            transmitter,
            sweeper,
        }
    }

    /// Stops the background sweeper early. Also runs on drop; exposed so a caller can wait
    /// for a clean shutdown instead of relying on drop order.
    pub fn stop(&mut self) {
        self.sweeper.stop();
    }

    /// The transmitter this router was built with, for callers that need to inspect what it
    /// was asked to send (a recording double in tests, a handle into a real transport
    /// otherwise).
    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    /// Entry point for a frame that arrived on `in_iface`. `frame` is the complete Ethernet
    /// frame, FCS not included.
    pub fn receive(&self, frame: &[u8], in_iface: &str) {
        let Some(iface) = self.ifaces.get_by_name(in_iface) else {
            log::warn!("receive on unknown interface {in_iface}");
            return;
        };
        let eth = match EthernetHeader::parse(frame) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("dropping short frame on {in_iface}: {e}");
                return;
            }
        };
        match eth.ethertype {
            ETHERTYPE_ARP => self.handle_arp(frame, &eth, iface),
            ETHERTYPE_IPV4 => self.handle_ipv4(frame, iface, in_iface),
            other => log::debug!("dropping frame with unhandled ethertype {other:#06x} on {in_iface}"),
        }
    }

    fn handle_arp(&self, frame: &[u8], eth: &EthernetHeader, iface: &Interface) {
        let Ok(arp) = ArpHeader::parse(&frame[ETH_LEN..]) else {
            log::debug!("dropping short ARP packet on {}", iface.name);
            return;
        };
        match arp.oper {
            ARP_OP_REQUEST => {
                // The target may be any local interface's address, not just the one this
                // request arrived on; reply with that interface's own MAC/IPv4.
                let Some(target_iface) = self.ifaces.get_by_ipv4(arp.tpa) else {
                    return;
                };
                let mut reply = vec![0u8; ETH_LEN + ARP_LEN];
                EthernetHeader {
                    dst: eth.src,
                    src: target_iface.mac,
                    ethertype: ETHERTYPE_ARP,
                }
                .build(&mut reply[0..ETH_LEN]);
                ArpHeader {
                    oper: ARP_OP_REPLY,
                    sha: target_iface.mac,
                    spa: target_iface.ipv4,
                    tha: arp.sha,
                    tpa: arp.spa,
                }
                .build(&mut reply[ETH_LEN..]);
                self.transmitter.send(&iface.name, &reply);
            }
            ARP_OP_REPLY => {
                // Only learn from replies actually addressed to one of our interfaces.
                if self.ifaces.get_by_ipv4(arp.tpa).is_none() {
                    return;
                }
                if let Some(packets) = self.arp.insert(arp.spa, arp.sha) {
                    for packet in packets {
                        send::deliver_resolved(&self.ifaces, self.transmitter.as_ref(), packet, arp.sha);
                    }
                }
            }
            other => log::debug!("dropping unhandled ARP opcode {other} on {}", iface.name),
        }
    }

    fn handle_ipv4(&self, frame: &[u8], iface: &Interface, in_iface: &str) {
        let ip_buf = &frame[ETH_LEN..];
        if ip_buf.len() < IPV4_LEN || !Ipv4Header::verify_checksum(ip_buf) {
            log::debug!("dropping IPv4 packet on {in_iface}: {}", RouterError::BadChecksum);
            return;
        }
        let Ok(ip) = Ipv4Header::parse(ip_buf) else {
            return;
        };

        if self.ifaces.get_by_ipv4(ip.dst).is_some() {
            self.handle_local(frame, &ip, iface);
            return;
        }

        if let Err(err) = self.try_forward(frame, &ip, in_iface) {
            log::debug!("not forwarding packet for {}: {err}", ip.dst);
            let in_iface = self
                .ifaces
                .get_by_name(in_iface)
                .expect("receive() already validated in_iface exists");
            match err {
                RouterError::TtlExpired => self.send_time_exceeded(frame, &ip, in_iface),
                RouterError::NoRoute => self.send_net_unreachable(frame, &ip, in_iface),
                _ => {}
            }
        }
    }

    fn handle_local(&self, frame: &[u8], ip: &Ipv4Header, iface: &Interface) {
        match ip.protocol {
            IP_PROTO_ICMP => {
                let icmp_start = ETH_LEN + IPV4_LEN;
                let icmp_end = ETH_LEN + ip.total_len as usize;
                if icmp_end > frame.len() || internet_checksum(&frame[icmp_start..icmp_end]) != 0 {
                    log::debug!("dropping ICMP packet on {}: {}", iface.name, RouterError::BadChecksum);
                    return;
                }
                match IcmpHeader::parse(&frame[icmp_start..icmp_end]) {
                    Ok(icmp) if icmp.icmp_type == ICMP_TYPE_ECHO_REQUEST => {
                        self.send_echo_reply(frame, ip, &icmp, iface);
                    }
                    Ok(_) => {}
                    Err(_) => {}
                }
            }
            IP_PROTO_TCP | IP_PROTO_UDP => self.send_port_unreachable(frame, ip, iface),
            other => log::debug!("dropping locally-addressed protocol {other} on {}", iface.name),
        }
    }

    fn send_echo_reply(&self, frame: &[u8], ip: &Ipv4Header, icmp: &IcmpHeader, iface: &Interface) {
        let mut out = frame.to_vec();

        // Only source and destination swap; TTL and everything else about the IP header
        // carries through from the request unchanged.
        let reply_ip = Ipv4Header {
            src: ip.dst,
            dst: ip.src,
            ..*ip
        };
        reply_ip.build(&mut out[ETH_LEN..ETH_LEN + IPV4_LEN]);
        Ipv4Header::fix_checksum(&mut out[ETH_LEN..ETH_LEN + IPV4_LEN]);

        let icmp_start = ETH_LEN + IPV4_LEN;
        let icmp_end = ETH_LEN + ip.total_len as usize;
        let reply_icmp = IcmpHeader {
            icmp_type: ICMP_TYPE_ECHO_REPLY,
            code: 0,
            checksum: 0,
            rest_of_header: icmp.rest_of_header,
        };
        reply_icmp.build(&mut out[icmp_start..icmp_start + ICMP_LEN]);
        let sum = internet_checksum(&out[icmp_start..icmp_end]);
        out[icmp_start + 2..icmp_start + 4].copy_from_slice(&sum.to_be_bytes());

        send::send_or_queue(
            &self.arp,
            &self.ifaces,
            self.transmitter.as_ref(),
            &self.config,
            ip.src,
            &iface.name,
            &iface.name,
            out,
        );
    }

    fn send_port_unreachable(&self, frame: &[u8], ip: &Ipv4Header, iface: &Interface) {
        // Port Unreachable impersonates the addressed service: the new datagram's source is
        // the original destination, not necessarily this interface's own address.
        self.send_icmp_error(frame, ip, iface, ICMP_TYPE_DEST_UNREACHABLE, ICMP_CODE_PORT_UNREACHABLE, ip.dst);
    }

    fn send_net_unreachable(&self, frame: &[u8], ip: &Ipv4Header, iface: &Interface) {
        self.send_icmp_error(frame, ip, iface, ICMP_TYPE_DEST_UNREACHABLE, ICMP_CODE_NET_UNREACHABLE, iface.ipv4);
    }

    fn send_time_exceeded(&self, frame: &[u8], ip: &Ipv4Header, iface: &Interface) {
        self.send_icmp_error(frame, ip, iface, ICMP_TYPE_TIME_EXCEEDED, 0, iface.ipv4);
    }

    fn send_icmp_error(&self, frame: &[u8], ip: &Ipv4Header, iface: &Interface, icmp_type: u8, code: u8, src_ip: std::net::Ipv4Addr) {
        let offending = &frame[ETH_LEN..];
        let icmp_frame = send::build_icmp_error(icmp_type, code, src_ip, iface.mac, ip.src, self.config.generated_ttl(), offending);
        send::send_or_queue(
            &self.arp,
            &self.ifaces,
            self.transmitter.as_ref(),
            &self.config,
            ip.src,
            &iface.name,
            &iface.name,
            icmp_frame,
        );
    }

    /// Attempts to forward `frame`. Returns the reason nothing was sent so the caller can
    /// turn it into the right ICMP error; `Ok(())` means the frame (or a queued ARP request
    /// ahead of it) is already on its way out.
    fn try_forward(&self, frame: &[u8], ip: &Ipv4Header, in_iface: &str) -> Result<(), RouterError> {
        // A packet whose TTL has expired is never also forwarded.
        if ip.ttl <= 1 {
            return Err(RouterError::TtlExpired);
        }

        let route = self.routes.lpm(ip.dst).ok_or(RouterError::NoRoute)?;
        let next_hop = if route.gateway.is_unspecified() { ip.dst } else { route.gateway };

        let mut out = frame.to_vec();
        let mut forwarded_ip = *ip;
        forwarded_ip.ttl -= 1;
        forwarded_ip.build(&mut out[ETH_LEN..ETH_LEN + IPV4_LEN]);
        Ipv4Header::fix_checksum(&mut out[ETH_LEN..ETH_LEN + IPV4_LEN]);

        send::send_or_queue(
            &self.arp,
            &self.ifaces,
            self.transmitter.as_ref(),
            &self.config,
            next_hop,
            &route.iface,
            in_iface,
            out,
        );
        Ok(())
    }
}
