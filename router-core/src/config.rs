//
// config.rs - Tunable constants for the ARP cache and forwarding path
//
// Purpose:
//   Everything in SPEC_FULL.md that would otherwise be a hardwired magic number lives
//   here instead, following the `Option<_>`-overrides-with-defaults shape the teacher uses
//   for `AfXdpConfig` (per-field opt-in overrides, `None` means "use the spec default").
//

use std::time::Duration;

pub const DEFAULT_ARP_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ARP_RETRY_CAP: u8 = 5;
pub const DEFAULT_ARP_ENTRY_TTL: Duration = Duration::from_secs(15);
pub const DEFAULT_GENERATED_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct RouterConfig {
    /// Cadence at which an unresolved pending request is retransmitted. Default 1s.
    pub arp_retry_interval: Option<Duration>,
    /// Number of retransmissions allowed before a pending request is failed. Default 5.
    pub arp_retry_cap: Option<u8>,
    /// How long a resolved ARP entry stays valid before the sweeper evicts it. Default 15s.
    pub arp_entry_ttl: Option<Duration>,
    /// TTL stamped on ICMP messages this router originates. Default 64.
    pub generated_ttl: Option<u8>,
}

impl RouterConfig {
    pub fn arp_retry_interval(&self) -> Duration {
        self.arp_retry_interval.unwrap_or(DEFAULT_ARP_RETRY_INTERVAL)
    }

    pub fn arp_retry_cap(&self) -> u8 {
        self.arp_retry_cap.unwrap_or(DEFAULT_ARP_RETRY_CAP)
    }

    pub fn arp_entry_ttl(&self) -> Duration {
        self.arp_entry_ttl.unwrap_or(DEFAULT_ARP_ENTRY_TTL)
    }

    pub fn generated_ttl(&self) -> u8 {
        self.generated_ttl.unwrap_or(DEFAULT_GENERATED_TTL)
    }
}
