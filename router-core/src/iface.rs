//
// iface.rs - Interface table
//
// Purpose:
//   A read-only index of the router's local interfaces, each with a stable name, a MAC
//   address and an IPv4 address. Loading this table from whatever configuration source a
//   deployment uses is out of scope here; this module only holds and looks up the result.
//

use std::collections::HashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub mac: [u8; 6],
    pub ipv4: Ipv4Addr,
}

/// Immutable lookup table over a set of interfaces, indexed by name and by IPv4 address.
#[derive(Debug, Clone)]
pub struct InterfaceTable {
    by_name: HashMap<String, Interface>,
    by_ipv4: HashMap<Ipv4Addr, String>,
}

impl InterfaceTable {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        let mut by_name = HashMap::with_capacity(interfaces.len());
        let mut by_ipv4 = HashMap::with_capacity(interfaces.len());
        for iface in interfaces {
            by_ipv4.insert(iface.ipv4, iface.name.clone());
            by_name.insert(iface.name.clone(), iface);
        }
        Self { by_name, by_ipv4 }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Interface> {
        self.by_name.get(name)
    }

    pub fn get_by_ipv4(&self, addr: Ipv4Addr) -> Option<&Interface> {
        let name = self.by_ipv4.get(&addr)?;
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.by_name.values()
    }
}
