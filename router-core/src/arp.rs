//
// arp.rs - ARP cache: resolved entries, pending requests, retry/expiry state machine
//
// Purpose:
//   Two tables keyed by IPv4: resolved MAC entries (TTL-bounded) and pending requests
//   (a retry counter plus the queue of frames blocked on that resolution). Every public
//   operation here takes the cache's mutex for its full duration, matching the
//   single-mutex discipline the concurrency model calls for; nothing here touches the
//   transport or builds wire bytes, so the mutex is never held across a send.
//
// How it works:
//   `drive_request` implements the pending-request state machine from the spec: a 1s
//   (configurable) guard, then either "arm" (caller should broadcast an ARP request) or
//   "exhausted" (caller should fail every queued packet with a Host Unreachable ICMP).
//   The background sweeper (`ArpSweeper`, in this module) drives every pending request
//   once per tick and evicts expired resolved entries, mirroring the pthread sweeper of
//   the original implementation but joinable instead of detached.
//

use crate::config::RouterConfig;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// An owned frame blocked on ARP resolution, plus the interfaces needed to either
/// transmit it (once resolved) or bounce a Host-Unreachable ICMP to its sender (if not).
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub frame: Vec<u8>,
    pub out_iface: String,
    pub in_iface: String,
}

struct ResolvedEntry {
    mac: [u8; 6],
    inserted_at: Instant,
}

struct PendingRequest {
    out_iface: String,
    send_count: u8,
    last_sent: Instant,
    packets: Vec<PendingPacket>,
}

struct ArpCacheInner {
    resolved: HashMap<Ipv4Addr, ResolvedEntry>,
    pending: HashMap<Ipv4Addr, PendingRequest>,
}

/// Outcome of driving a pending request's state machine one tick.
#[derive(Debug)]
pub enum RequestAction {
    /// Not yet due for another retransmission; caller does nothing.
    NotDue,
    /// No such pending request (already resolved or never existed).
    NoSuchRequest,
    /// Caller should broadcast an ARP request for `ipv4` out of `out_iface`.
    Arm { ipv4: Ipv4Addr, out_iface: String },
    /// Retry cap reached; caller should fail every packet with a Host Unreachable ICMP.
    /// The request has already been removed from the cache.
    Exhausted { packets: Vec<PendingPacket> },
}

pub struct ArpCache {
    inner: Mutex<ArpCacheInner>,
    config: RouterConfig,
}

impl ArpCache {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            inner: Mutex::new(ArpCacheInner {
                resolved: HashMap::new(),
                pending: HashMap::new(),
            }),
            config,
        }
    }

    /// Returns the MAC for `ipv4` if an unexpired resolved entry exists. An expired hit is
    /// evicted on the way out, bounding cache size under asymmetric traffic.
    pub fn lookup(&self, ipv4: Ipv4Addr) -> Option<[u8; 6]> {
        let mut inner = self.inner.lock().unwrap();
        match inner.resolved.get(&ipv4) {
            Some(entry) if entry.inserted_at.elapsed() < self.config.arp_entry_ttl() => {
                Some(entry.mac)
            }
            Some(_) => {
                inner.resolved.remove(&ipv4);
                None
            }
            None => None,
        }
    }

    /// Records a learned MAC and, if a request was pending for this address, detaches and
    /// returns its queued packets for the caller to drain (FIFO order preserved).
    pub fn insert(&self, ipv4: Ipv4Addr, mac: [u8; 6]) -> Option<Vec<PendingPacket>> {
        let mut inner = self.inner.lock().unwrap();
        inner.resolved.insert(
            ipv4,
            ResolvedEntry {
                mac,
                inserted_at: Instant::now(),
            },
        );
        inner.pending.remove(&ipv4).map(|req| req.packets)
    }

    /// Appends `packet` to the pending request for `ipv4`, creating one (armed for
    /// immediate retransmission) if none exists yet.
    pub fn queue(&self, ipv4: Ipv4Addr, out_iface: &str, packet: PendingPacket) {
        let mut inner = self.inner.lock().unwrap();
        let retry_interval = self.config.arp_retry_interval();
        let req = inner.pending.entry(ipv4).or_insert_with(|| PendingRequest {
            out_iface: out_iface.to_string(),
            send_count: 0,
            last_sent: Instant::now()
                .checked_sub(retry_interval)
                .unwrap_or_else(Instant::now),
            packets: Vec::new(),
        });
        req.packets.push(packet);
    }

    /// Drives the pending-request state machine for `ipv4` one tick: guard, then arm or
    /// fail the request. Safe to call opportunistically (right after `queue`) and from the
    /// sweeper; the guard makes redundant calls within the retry interval a no-op.
    pub fn drive_request(&self, ipv4: Ipv4Addr) -> RequestAction {
        let mut inner = self.inner.lock().unwrap();
        let Some(req) = inner.pending.get_mut(&ipv4) else {
            return RequestAction::NoSuchRequest;
        };
        if req.last_sent.elapsed() < self.config.arp_retry_interval() {
            return RequestAction::NotDue;
        }
        if req.send_count >= self.config.arp_retry_cap() {
            let req = inner.pending.remove(&ipv4).expect("checked Some above");
            return RequestAction::Exhausted {
                packets: req.packets,
            };
        }
        req.send_count += 1;
        req.last_sent = Instant::now();
        RequestAction::Arm {
            ipv4,
            out_iface: req.out_iface.clone(),
        }
    }

    /// Snapshot of next-hop addresses with a request currently pending, for the sweeper to
    /// iterate without holding the lock across per-request work.
    pub fn pending_addresses(&self) -> Vec<Ipv4Addr> {
        let inner = self.inner.lock().unwrap();
        inner.pending.keys().copied().collect()
    }

    /// Removes resolved entries older than the configured TTL.
    pub fn evict_expired(&self) {
        let mut inner = self.inner.lock().unwrap();
        let ttl = self.config.arp_entry_ttl();
        inner.resolved.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }
}

/// A background thread that periodically drives every pending ARP request and expires
/// stale resolved entries. Unlike the pthread sweeper of the original implementation,
/// this one is joinable: `stop()` (or `Drop`) signals the loop and waits for it to exit.
pub struct ArpSweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ArpSweeper {
    /// Spawns the sweeper thread. `on_tick` is invoked once per pending address per pass,
    /// so the caller (which owns interface/transmitter state this module doesn't know
    /// about) can turn a `RequestAction` into wire bytes.
    pub fn spawn<F>(cache: Arc<ArpCache>, mut on_tick: F) -> Self
    where
        F: FnMut(&ArpCache, Ipv4Addr) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            // Poll at a finer grain than the spec's 1s retry cadence so `stop()` reacts
            // quickly and so tests can override the retry interval down to milliseconds;
            // `drive_request`'s own guard is what enforces the real cadence.
            const TICK: Duration = Duration::from_millis(20);
            while !stop_flag.load(Ordering::Relaxed) {
                cache.evict_expired();
                for ipv4 in cache.pending_addresses() {
                    on_tick(&cache, ipv4);
                }
                thread::sleep(TICK);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ArpSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(tag: u8) -> PendingPacket {
        PendingPacket {
            frame: vec![tag],
            out_iface: "eth2".into(),
            in_iface: "eth1".into(),
        }
    }

    #[test]
    fn lookup_misses_before_insert() {
        let cache = ArpCache::new(RouterConfig::default());
        assert_eq!(cache.lookup(Ipv4Addr::new(10, 0, 2, 2)), None);
    }

    #[test]
    fn queue_then_insert_drains_in_fifo_order() {
        let cache = ArpCache::new(RouterConfig::default());
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        cache.queue(ip, "eth2", packet(1));
        cache.queue(ip, "eth2", packet(2));
        cache.queue(ip, "eth2", packet(3));

        let drained = cache.insert(ip, [0xbb, 2, 0, 0, 0, 0]).unwrap();
        let tags: Vec<u8> = drained.iter().map(|p| p.frame[0]).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(cache.lookup(ip), Some([0xbb, 2, 0, 0, 0, 0]));
        // the request is gone: a second insert for the same address has nothing to drain
        assert!(cache.insert(ip, [0xbb, 2, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn first_drive_arms_immediately() {
        let cache = ArpCache::new(RouterConfig::default());
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        cache.queue(ip, "eth2", packet(1));
        match cache.drive_request(ip) {
            RequestAction::Arm { ipv4, out_iface } => {
                assert_eq!(ipv4, ip);
                assert_eq!(out_iface, "eth2");
            }
            other => panic!("expected Arm, got {other:?}"),
        }
    }

    #[test]
    fn guard_suppresses_immediate_redrive() {
        let cfg = RouterConfig {
            arp_retry_interval: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let cache = ArpCache::new(cfg);
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        cache.queue(ip, "eth2", packet(1));
        assert!(matches!(cache.drive_request(ip), RequestAction::Arm { .. }));
        assert!(matches!(cache.drive_request(ip), RequestAction::NotDue));
    }

    #[test]
    fn retry_cap_exhausts_and_fails_all_queued_packets() {
        let cfg = RouterConfig {
            arp_retry_interval: Some(Duration::from_millis(1)),
            arp_retry_cap: Some(2),
            ..Default::default()
        };
        let cache = ArpCache::new(cfg);
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        cache.queue(ip, "eth2", packet(1));
        cache.queue(ip, "eth2", packet(2));

        // two retransmissions...
        for _ in 0..2 {
            thread::sleep(Duration::from_millis(2));
            assert!(matches!(cache.drive_request(ip), RequestAction::Arm { .. }));
        }
        // ...then the third due tick exhausts the cap.
        thread::sleep(Duration::from_millis(2));
        match cache.drive_request(ip) {
            RequestAction::Exhausted { packets } => assert_eq!(packets.len(), 2),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert!(matches!(cache.drive_request(ip), RequestAction::NoSuchRequest));
    }

    #[test]
    fn resolved_entry_expires() {
        let cfg = RouterConfig {
            arp_entry_ttl: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let cache = ArpCache::new(cfg);
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        cache.insert(ip, [1, 2, 3, 4, 5, 6]);
        assert_eq!(cache.lookup(ip), Some([1, 2, 3, 4, 5, 6]));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.lookup(ip), None);
    }

    #[test]
    fn sweeper_drives_pending_requests_without_manual_ticking() {
        let cfg = RouterConfig {
            arp_retry_interval: Some(Duration::from_millis(5)),
            arp_retry_cap: Some(3),
            ..Default::default()
        };
        let cache = Arc::new(ArpCache::new(cfg));
        let ip = Ipv4Addr::new(10, 0, 2, 2);
        cache.queue(ip, "eth2", packet(1));

        let arm_count = Arc::new(Mutex::new(0u32));
        let arm_count_cb = arm_count.clone();
        let mut sweeper = ArpSweeper::spawn(cache.clone(), move |cache, ipv4| {
            if let RequestAction::Arm { .. } = cache.drive_request(ipv4) {
                *arm_count_cb.lock().unwrap() += 1;
            }
        });

        thread::sleep(Duration::from_millis(60));
        sweeper.stop();
        assert!(*arm_count.lock().unwrap() >= 2);
    }
}
