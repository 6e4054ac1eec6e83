//! In-memory snapshot of every managed entity class plus the lookup
//! indices the rest of the core reads through. No eager adjacency graph
//! is built; `addresses_for`/`veth_peer` scan on demand.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::types::{Address, Bond, Bridge, Interface, Route, Vlan, Veth};

#[derive(Clone, Debug, Default)]
pub struct NetworkState {
    pub interfaces: Vec<Interface>,
    pub addresses: Vec<Address>,
    pub routes: Vec<Route>,
    pub bonds: Vec<Bond>,
    pub bridges: Vec<Bridge>,
    pub vlans: Vec<Vlan>,
    pub veths: Vec<Veth>,

    by_name: HashMap<String, usize>,
    by_index: HashMap<i32, usize>,
    veth_by_index: HashMap<i32, usize>,

    pub refreshed_at: Option<SystemTime>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the lookup indices after direct mutation of `interfaces`
    /// or `veths`. Callers that only push through the typed mutators
    /// below never need to call this themselves.
    pub fn reindex(&mut self) {
        self.by_name = self
            .interfaces
            .iter()
            .enumerate()
            .map(|(i, iface)| (iface.name.clone(), i))
            .collect();
        self.by_index = self
            .interfaces
            .iter()
            .enumerate()
            .map(|(i, iface)| (iface.index, i))
            .collect();
        self.veth_by_index = self
            .veths
            .iter()
            .enumerate()
            .map(|(i, v)| (v.index, i))
            .collect();
    }

    pub fn push_interface(&mut self, iface: Interface) {
        let idx = self.interfaces.len();
        self.by_name.insert(iface.name.clone(), idx);
        self.by_index.insert(iface.index, idx);
        self.interfaces.push(iface);
    }

    pub fn push_veth(&mut self, veth: Veth) {
        let idx = self.veths.len();
        self.veth_by_index.insert(veth.index, idx);
        self.veths.push(veth);
    }

    pub fn find_interface(&self, name: &str) -> Option<&Interface> {
        self.by_name.get(name).map(|&i| &self.interfaces[i])
    }

    pub fn find_interface_mut(&mut self, name: &str) -> Option<&mut Interface> {
        let idx = *self.by_name.get(name)?;
        Some(&mut self.interfaces[idx])
    }

    pub fn find_interface_by_index(&self, index: i32) -> Option<&Interface> {
        self.by_index.get(&index).map(|&i| &self.interfaces[i])
    }

    pub fn addresses_for(&self, owner_index: i32) -> Vec<&Address> {
        self.addresses.iter().filter(|a| a.owner_index == owner_index).collect()
    }

    pub fn veth_peer(&self, index: i32) -> Option<i32> {
        let idx = *self.veth_by_index.get(&index)?;
        Some(self.veths[idx].peer_index)
    }

    pub fn find_bond(&self, name: &str) -> Option<&Bond> {
        self.bonds.iter().find(|b| b.name == name)
    }

    pub fn find_bridge(&self, name: &str) -> Option<&Bridge> {
        self.bridges.iter().find(|b| b.name == name)
    }

    pub fn find_vlan(&self, name: &str) -> Option<&Vlan> {
        self.vlans.iter().find(|v| v.name == name)
    }

    pub fn find_veth(&self, name: &str) -> Option<&Veth> {
        self.veths.iter().find(|v| v.name == name)
    }

    /// The single default unicast route in `table`, if any.
    pub fn default_route(&self, table: u8) -> Option<&Route> {
        self.routes.iter().find(|r| r.table == table && r.is_default())
    }

    pub fn next_synthesized_index(&self) -> i32 {
        self.interfaces
            .iter()
            .map(|i| i.index)
            .chain(std::iter::once(crate::types::SYNTHESIZED_INDEX_BASE - 1))
            .max()
            .unwrap()
            .max(crate::types::SYNTHESIZED_INDEX_BASE - 1)
            + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LinkKind;

    fn iface(name: &str, index: i32) -> Interface {
        Interface {
            name: name.into(),
            index,
            flags: 0,
            mtu: 1500,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Physical,
            master_index: None,
        }
    }

    #[test]
    fn lookup_by_name_and_index_agree() {
        let mut s = NetworkState::new();
        s.push_interface(iface("eth0", 2));
        s.push_interface(iface("eth1", 3));
        assert_eq!(s.find_interface("eth0").unwrap().index, 2);
        assert_eq!(s.find_interface_by_index(3).unwrap().name, "eth1");
        assert!(s.find_interface("eth9").is_none());
    }

    #[test]
    fn synthesized_index_increments_past_existing_real_indices() {
        let mut s = NetworkState::new();
        s.push_interface(iface("eth0", 2));
        assert_eq!(s.next_synthesized_index(), crate::types::SYNTHESIZED_INDEX_BASE);
        s.push_interface(iface("bond0", crate::types::SYNTHESIZED_INDEX_BASE));
        assert_eq!(s.next_synthesized_index(), crate::types::SYNTHESIZED_INDEX_BASE + 1);
    }
}
