//
// route.rs - Routing table and longest-prefix match
//
// Purpose:
//   A read-only, ordered list of routes and the longest-prefix-match lookup forwarding
//   uses to pick a next hop. Loading the table itself is out of scope (see crate docs);
//   this module only holds the already-parsed entries and answers `lpm()`.
//
// Note on the legacy bug this replaces:
//   The C implementation this router is modeled on picked the "longest" match by comparing
//   the raw `mask & dest` values as plain integers, relying on the in-memory representation
//   of a netmask to sort the same way its bit count does. That only holds if the comparison
//   is done on the mask's actual numeric value; `lpm` below sidesteps the whole question and
//   compares `mask.count_ones()` directly, which is correct by construction for the
//   contiguous masks this router deals in.
//

use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// 0.0.0.0 means on-link: the next hop is the packet's own destination.
    pub gateway: Ipv4Addr,
    pub iface: String,
}

impl Route {
    fn matches(&self, dest: u32) -> bool {
        let mask: u32 = self.mask.into();
        let net: u32 = self.destination.into();
        (net & mask) == (dest & mask)
    }

    fn prefix_len(&self) -> u32 {
        u32::from(self.mask).count_ones()
    }
}

/// An ordered sequence of routes, scanned linearly on every lookup.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// Longest-prefix match: among the routes whose masked destination equals the masked
    /// query, returns the one with the greatest mask bit-count. Ties keep the first match
    /// in scan order.
    pub fn lpm(&self, dest: Ipv4Addr) -> Option<&Route> {
        let dest: u32 = dest.into();
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !route.matches(dest) {
                continue;
            }
            match best {
                Some(b) if b.prefix_len() >= route.prefix_len() => {}
                _ => best = Some(route),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(dest: [u8; 4], mask: [u8; 4], gw: [u8; 4], iface: &str) -> Route {
        Route {
            destination: Ipv4Addr::from(dest),
            mask: Ipv4Addr::from(mask),
            gateway: Ipv4Addr::from(gw),
            iface: iface.into(),
        }
    }

    #[test]
    fn picks_most_specific_match() {
        let table = RoutingTable::new(vec![
            r([20, 0, 0, 0], [255, 0, 0, 0], [10, 0, 2, 2], "eth2"),
            r([20, 1, 2, 0], [255, 255, 255, 0], [10, 0, 3, 2], "eth3"),
        ]);
        let route = table.lpm(Ipv4Addr::new(20, 1, 2, 3)).unwrap();
        assert_eq!(route.iface, "eth3");
    }

    #[test]
    fn more_specific_nested_network_wins() {
        let table = RoutingTable::new(vec![
            r([0, 0, 0, 0], [128, 0, 0, 0], [1, 1, 1, 1], "wide"),
            r([20, 1, 2, 0], [255, 255, 255, 0], [2, 2, 2, 2], "narrow"),
        ]);
        let route = table.lpm(Ipv4Addr::new(20, 1, 2, 3)).unwrap();
        assert_eq!(route.iface, "narrow");
    }

    #[test]
    fn tie_break_keeps_first_scan_order() {
        let table = RoutingTable::new(vec![
            r([20, 0, 0, 0], [255, 0, 0, 0], [1, 1, 1, 1], "first"),
            r([20, 0, 0, 0], [255, 0, 0, 0], [2, 2, 2, 2], "second"),
        ]);
        let route = table.lpm(Ipv4Addr::new(20, 1, 2, 3)).unwrap();
        assert_eq!(route.iface, "first");
    }

    #[test]
    fn no_match_returns_none() {
        let table = RoutingTable::new(vec![r(
            [20, 0, 0, 0],
            [255, 0, 0, 0],
            [1, 1, 1, 1],
            "eth2",
        )]);
        assert!(table.lpm(Ipv4Addr::new(30, 0, 0, 1)).is_none());
    }

    #[test]
    fn on_link_gateway_is_zero() {
        let route = r([10, 0, 1, 0], [255, 255, 255, 0], [0, 0, 0, 0], "eth1");
        assert_eq!(route.gateway, Ipv4Addr::UNSPECIFIED);
    }
}
