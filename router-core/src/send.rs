//
// send.rs - Transport abstraction, send-or-queue glue, and ICMP error construction
//
// Purpose:
//   `Transmitter` is the one seam this crate leaves for its caller: something that can put
//   a finished Ethernet frame on a named interface. Everything here composes around it -
//   resolving a next hop's MAC before handing a frame to it, queuing behind an ARP request
//   when the MAC isn't known yet, and building the ICMP error frames that ARP failure and
//   forwarding failure both need.
//
// How it works:
//   `send_or_queue` is the single path by which this crate ever puts bytes out an
//   interface. A cache hit fills in both MAC addresses and calls the transmitter directly;
//   a miss queues the frame and drives the pending request once so the first ARP request
//   goes out without waiting on the sweeper. `drive_pending_request` is the other caller of
//   that state machine - the sweeper invokes it on a timer. Neither ever holds the cache's
//   mutex while calling into the transmitter.
//

use crate::arp::{ArpCache, PendingPacket, RequestAction};
use crate::config::RouterConfig;
use crate::header::{
    internet_checksum, ArpHeader, EthernetHeader, IcmpType3Header, Ipv4Header, ARP_LEN,
    ARP_OP_REQUEST, BROADCAST_MAC, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETH_LEN, ICMP3_LEN,
    ICMP_DATA_LEN, ICMP_TYPE_DEST_UNREACHABLE, ICMP_CODE_HOST_UNREACHABLE, IPV4_LEN,
    IP_PROTO_ICMP, ZERO_MAC,
};
use crate::iface::InterfaceTable;
use std::net::Ipv4Addr;

/// Something that can put a finished frame on a named interface. Implemented by whatever
/// owns the actual network transport; this crate never talks to a socket directly.
pub trait Transmitter: Send + Sync {
    fn send(&self, out_iface: &str, frame: &[u8]);
}

/// Fills in both MAC addresses of an already-built frame and hands it to the transmitter.
/// The source MAC always comes from the outgoing interface's own table entry, overriding
/// whatever placeholder the caller built the frame with.
fn deliver(ifaces: &InterfaceTable, transmitter: &dyn Transmitter, out_iface: &str, dst_mac: [u8; 6], mut frame: Vec<u8>) {
    if frame.len() >= ETH_LEN {
        frame[0..6].copy_from_slice(&dst_mac);
        if let Some(iface) = ifaces.get_by_name(out_iface) {
            frame[6..12].copy_from_slice(&iface.mac);
        }
    }
    transmitter.send(out_iface, &frame);
}

/// Looks up `next_hop` in the ARP cache; on a hit, delivers `frame` immediately, on a miss,
/// queues it and drives the pending request so the first request goes out without waiting
/// for the sweeper's next tick.
#[allow(clippy::too_many_arguments)]
pub fn send_or_queue(
    cache: &ArpCache,
    ifaces: &InterfaceTable,
    transmitter: &dyn Transmitter,
    config: &RouterConfig,
    next_hop: Ipv4Addr,
    out_iface: &str,
    in_iface: &str,
    frame: Vec<u8>,
) {
    match cache.lookup(next_hop) {
        Some(mac) => deliver(ifaces, transmitter, out_iface, mac, frame),
        None => {
            cache.queue(
                next_hop,
                out_iface,
                PendingPacket {
                    frame,
                    out_iface: out_iface.to_string(),
                    in_iface: in_iface.to_string(),
                },
            );
            drive_pending_request(cache, ifaces, transmitter, config, next_hop);
        }
    }
}

/// Delivers a frame drained from a resolved pending request; the MAC is already known so
/// this skips the cache lookup `send_or_queue` would otherwise do.
pub fn deliver_resolved(ifaces: &InterfaceTable, transmitter: &dyn Transmitter, packet: PendingPacket, mac: [u8; 6]) {
    deliver(ifaces, transmitter, &packet.out_iface, mac, packet.frame);
}

/// Drives the ARP retry state machine for `next_hop` one tick: broadcasts a request if one
/// is due, or fails every queued packet with a Host Unreachable ICMP if the retry cap has
/// been reached. Called both opportunistically (right after queueing) and by the sweeper.
pub fn drive_pending_request(
    cache: &ArpCache,
    ifaces: &InterfaceTable,
    transmitter: &dyn Transmitter,
    config: &RouterConfig,
    next_hop: Ipv4Addr,
) {
    match cache.drive_request(next_hop) {
        RequestAction::Arm { ipv4, out_iface } => broadcast_arp_request(ifaces, transmitter, &out_iface, ipv4),
        RequestAction::Exhausted { packets } => {
            for packet in packets {
                fail_with_host_unreachable(cache, ifaces, transmitter, config, packet);
            }
        }
        RequestAction::NotDue | RequestAction::NoSuchRequest => {}
    }
}

fn broadcast_arp_request(ifaces: &InterfaceTable, transmitter: &dyn Transmitter, out_iface: &str, target: Ipv4Addr) {
    let Some(iface) = ifaces.get_by_name(out_iface) else {
        log::warn!("ARP request for {target} has no outgoing interface {out_iface}");
        return;
    };
    let mut frame = vec![0u8; ETH_LEN + ARP_LEN];
    EthernetHeader {
        dst: BROADCAST_MAC,
        src: iface.mac,
        ethertype: ETHERTYPE_ARP,
    }
    .build(&mut frame[0..ETH_LEN]);
    ArpHeader {
        oper: ARP_OP_REQUEST,
        sha: iface.mac,
        spa: iface.ipv4,
        tha: ZERO_MAC,
        tpa: target,
    }
    .build(&mut frame[ETH_LEN..]);
    transmitter.send(out_iface, &frame);
}

fn fail_with_host_unreachable(
    cache: &ArpCache,
    ifaces: &InterfaceTable,
    transmitter: &dyn Transmitter,
    config: &RouterConfig,
    packet: PendingPacket,
) {
    let Some(in_iface) = ifaces.get_by_name(&packet.in_iface) else {
        log::warn!("can't build Host Unreachable, inbound interface {} is gone", packet.in_iface);
        return;
    };
    if packet.frame.len() < ETH_LEN + IPV4_LEN {
        return;
    }
    let offending = &packet.frame[ETH_LEN..];
    let original_sender = Ipv4Addr::new(offending[12], offending[13], offending[14], offending[15]);
    let icmp_frame = build_icmp_error(
        ICMP_TYPE_DEST_UNREACHABLE,
        ICMP_CODE_HOST_UNREACHABLE,
        in_iface.ipv4,
        in_iface.mac,
        original_sender,
        config.generated_ttl(),
        offending,
    );
    send_or_queue(
        cache,
        ifaces,
        transmitter,
        config,
        original_sender,
        &packet.in_iface,
        &packet.in_iface,
        icmp_frame,
    );
}

/// Builds a complete Ethernet+IPv4+ICMP "Destination Unreachable" / "Time Exceeded" frame.
/// `offending` is the IP header and leading payload bytes of the datagram this error is
/// about; only the first [`ICMP_DATA_LEN`] bytes of it are copied in, per the ICMP wire
/// format. The frame's L2 destination is left zeroed - the caller resolves it via
/// `send_or_queue`.
pub fn build_icmp_error(
    icmp_type: u8,
    code: u8,
    src_ip: Ipv4Addr,
    src_mac: [u8; 6],
    dst_ip: Ipv4Addr,
    ttl: u8,
    offending: &[u8],
) -> Vec<u8> {
    let mut data = [0u8; ICMP_DATA_LEN];
    let n = offending.len().min(ICMP_DATA_LEN);
    data[..n].copy_from_slice(&offending[..n]);

    let mut frame = vec![0u8; ETH_LEN + IPV4_LEN + ICMP3_LEN];

    EthernetHeader {
        dst: ZERO_MAC,
        src: src_mac,
        ethertype: ETHERTYPE_IPV4,
    }
    .build(&mut frame[0..ETH_LEN]);

    Ipv4Header {
        tos: 0,
        total_len: (IPV4_LEN + ICMP3_LEN) as u16,
        id: 0,
        flags_frag_offset: 0,
        ttl,
        protocol: IP_PROTO_ICMP,
        checksum: 0,
        src: src_ip,
        dst: dst_ip,
    }
    .build(&mut frame[ETH_LEN..ETH_LEN + IPV4_LEN]);
    Ipv4Header::fix_checksum(&mut frame[ETH_LEN..ETH_LEN + IPV4_LEN]);

    let icmp_start = ETH_LEN + IPV4_LEN;
    let icmp_end = icmp_start + ICMP3_LEN;
    IcmpType3Header {
        icmp_type,
        code,
        checksum: 0,
        data,
    }
    .build(&mut frame[icmp_start..icmp_end]);
    // Bounded explicitly by the ICMP payload length (ip.total_len - 20), not "whatever is
    // left in the buffer" - this frame happens to be built exactly that size, but the bound
    // is what matters, not the coincidence.
    let sum = internet_checksum(&frame[icmp_start..icmp_end]);
    frame[icmp_start + 2..icmp_start + 4].copy_from_slice(&sum.to_be_bytes());

    frame
}
