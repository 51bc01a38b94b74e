//
// router-core - IPv4 software router core
//
// Scope:
//   Header codec, interface/routing tables, ARP cache and its retry state machine, and the
//   packet dispatch that ties them together. Everything that owns an actual network
//   transport - sockets, a netlink-backed route/interface loader, a process entry point -
//   lives outside this crate; it only needs a [`send::Transmitter`] to talk to the world.
//

pub mod arp;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod header;
pub mod iface;
pub mod route;
pub mod send;

pub use arp::{ArpCache, ArpSweeper, PendingPacket};
pub use config::RouterConfig;
pub use dispatch::Router;
pub use error::RouterError;
pub use header::{EthernetHeader, ArpHeader, Ipv4Header, IcmpHeader, IcmpType3Header};
pub use iface::{Interface, InterfaceTable};
pub use route::{Route, RoutingTable};
pub use send::Transmitter;
