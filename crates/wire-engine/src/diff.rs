//! Diff Engine (component F): produces an ordered list of [`Change`]s
//! transforming live state into desired state. Order is fixed — bonds,
//! bridges, VLANs, interface modifications, addresses, routes — so that
//! every change precedes the dependents the resolver would otherwise
//! have to reorder.

use wire_model::state::NetworkState;
use wire_model::types::{Address, Bond, Bridge, Interface, Route, Veth, Vlan};

#[derive(Clone, Copy, Debug)]
pub struct DiffOptions {
    pub strict_addresses: bool,
    pub strict_routes: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            strict_addresses: false,
            strict_routes: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    BondAdd(Bond),
    BondRemove(Bond),
    BondModify { name: String, old: Bond, new: Bond },
    BondMemberAdd { bond: String, member: String },
    BondMemberRemove { bond: String, member: String },

    BridgeAdd(Bridge),
    BridgeRemove(Bridge),
    BridgeModify { name: String, old: Bridge, new: Bridge },
    BridgeMemberAdd { bridge: String, member: String },
    BridgeMemberRemove { bridge: String, member: String },

    VlanAdd(Vlan),
    VlanRemove(Vlan),

    VethAdd(Veth),
    VethRemove(Veth),

    InterfaceModify {
        name: String,
        old_up: bool,
        new_up: bool,
        old_mtu: u32,
        new_mtu: u32,
    },

    AddressAdd(Address),
    AddressRemove(Address),

    RouteAdd(Route),
    RouteRemove(Route),
}

impl Change {
    /// The subject name this change references, used by the resolver to
    /// build dependency edges. Routes have no name, so `None`.
    pub fn subject_name(&self) -> Option<&str> {
        match self {
            Change::BondAdd(b) | Change::BondRemove(b) => Some(&b.name),
            Change::BondModify { name, .. } => Some(name),
            Change::BondMemberAdd { bond, .. } | Change::BondMemberRemove { bond, .. } => Some(bond),
            Change::BridgeAdd(b) | Change::BridgeRemove(b) => Some(&b.name),
            Change::BridgeModify { name, .. } => Some(name),
            Change::BridgeMemberAdd { bridge, .. } | Change::BridgeMemberRemove { bridge, .. } => Some(bridge),
            Change::VlanAdd(v) | Change::VlanRemove(v) => Some(&v.name),
            Change::VethAdd(v) | Change::VethRemove(v) => Some(&v.name),
            Change::InterfaceModify { name, .. } => Some(name),
            Change::AddressAdd(a) | Change::AddressRemove(a) => Some(&a.owner_name),
            Change::RouteAdd(_) | Change::RouteRemove(_) => None,
        }
    }
}

pub fn diff(live: &NetworkState, desired: &NetworkState, options: DiffOptions) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_bonds(live, desired, &mut changes);
    diff_bridges(live, desired, &mut changes);
    diff_vlans(live, desired, &mut changes);
    diff_veths(live, desired, &mut changes);
    diff_interfaces(live, desired, &mut changes);
    diff_addresses(live, desired, options, &mut changes);
    diff_routes(live, desired, options, &mut changes);
    changes
}

fn name_of(state: &NetworkState, index: i32) -> String {
    state
        .find_interface_by_index(index)
        .map(|i| i.name.clone())
        .unwrap_or_else(|| format!("#{index}"))
}

fn diff_bonds(live: &NetworkState, desired: &NetworkState, out: &mut Vec<Change>) {
    for d in &desired.bonds {
        match live.find_bond(&d.name) {
            None => {
                out.push(Change::BondAdd(d.clone()));
                for member_index in &d.members {
                    out.push(Change::BondMemberAdd {
                        bond: d.name.clone(),
                        member: name_of(desired, *member_index),
                    });
                }
            }
            Some(l) => {
                if l.mode != d.mode || l.miimon != d.miimon || l.updelay != d.updelay || l.downdelay != d.downdelay {
                    out.push(Change::BondModify {
                        name: d.name.clone(),
                        old: l.clone(),
                        new: d.clone(),
                    });
                }
                diff_members(l.index, &l.members, &d.members, live, desired, &d.name, out, true);
            }
        }
    }
    for l in &live.bonds {
        if desired.find_bond(&l.name).is_none() {
            out.push(Change::BondRemove(l.clone()));
        }
    }
}

fn diff_bridges(live: &NetworkState, desired: &NetworkState, out: &mut Vec<Change>) {
    for d in &desired.bridges {
        match live.find_bridge(&d.name) {
            None => {
                out.push(Change::BridgeAdd(d.clone()));
                for member_index in &d.ports {
                    out.push(Change::BridgeMemberAdd {
                        bridge: d.name.clone(),
                        member: name_of(desired, *member_index),
                    });
                }
            }
            Some(l) => {
                if l.stp_enabled != d.stp_enabled
                    || l.forward_delay != d.forward_delay
                    || l.hello_time != d.hello_time
                    || l.max_age != d.max_age
                {
                    out.push(Change::BridgeModify {
                        name: d.name.clone(),
                        old: l.clone(),
                        new: d.clone(),
                    });
                }
                diff_members(l.index, &l.ports, &d.ports, live, desired, &d.name, out, false);
            }
        }
    }
    for l in &live.bridges {
        if desired.find_bridge(&l.name).is_none() {
            out.push(Change::BridgeRemove(l.clone()));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn diff_members(
    _owner_index: i32,
    live_members: &[i32],
    desired_members: &[i32],
    live: &NetworkState,
    desired: &NetworkState,
    owner_name: &str,
    out: &mut Vec<Change>,
    is_bond: bool,
) {
    let live_names: Vec<String> = live_members.iter().map(|i| name_of(live, *i)).collect();
    let desired_names: Vec<String> = desired_members.iter().map(|i| name_of(desired, *i)).collect();

    for name in &desired_names {
        if !live_names.contains(name) {
            if is_bond {
                out.push(Change::BondMemberAdd {
                    bond: owner_name.to_string(),
                    member: name.clone(),
                });
            } else {
                out.push(Change::BridgeMemberAdd {
                    bridge: owner_name.to_string(),
                    member: name.clone(),
                });
            }
        }
    }
    for name in &live_names {
        if !desired_names.contains(name) {
            if is_bond {
                out.push(Change::BondMemberRemove {
                    bond: owner_name.to_string(),
                    member: name.clone(),
                });
            } else {
                out.push(Change::BridgeMemberRemove {
                    bridge: owner_name.to_string(),
                    member: name.clone(),
                });
            }
        }
    }
}

fn diff_vlans(live: &NetworkState, desired: &NetworkState, out: &mut Vec<Change>) {
    for d in &desired.vlans {
        if live.find_vlan(&d.name).is_none() {
            out.push(Change::VlanAdd(d.clone()));
        }
    }
    for l in &live.vlans {
        if desired.find_vlan(&l.name).is_none() {
            out.push(Change::VlanRemove(l.clone()));
        }
    }
}

fn diff_veths(live: &NetworkState, desired: &NetworkState, out: &mut Vec<Change>) {
    for d in &desired.veths {
        if live.find_veth(&d.name).is_none() {
            out.push(Change::VethAdd(d.clone()));
        }
    }
    for l in &live.veths {
        if desired.find_veth(&l.name).is_none() {
            out.push(Change::VethRemove(l.clone()));
        }
    }
}

fn diff_interfaces(live: &NetworkState, desired: &NetworkState, out: &mut Vec<Change>) {
    for d in &desired.interfaces {
        let (old_up, old_mtu) = match live.find_interface(&d.name) {
            Some(l) => (l.is_up(), l.mtu),
            // A not-yet-created interface starts down with the default
            // 1500 MTU wire assigns at creation.
            None => (false, 1500),
        };
        let new_up = d.is_up();
        let new_mtu = d.mtu;
        if old_up != new_up || old_mtu != new_mtu {
            out.push(Change::InterfaceModify {
                name: d.name.clone(),
                old_up,
                new_up,
                old_mtu,
                new_mtu,
            });
        }
    }
}

fn diff_addresses(live: &NetworkState, desired: &NetworkState, options: DiffOptions, out: &mut Vec<Change>) {
    for d in &desired.addresses {
        if !live.addresses.iter().any(|l| l.owner_name == d.owner_name && l.matches(d)) {
            out.push(Change::AddressAdd(d.clone()));
        }
    }
    if options.strict_addresses {
        for l in &live.addresses {
            if !desired.addresses.iter().any(|d| d.owner_name == l.owner_name && d.matches(l)) {
                out.push(Change::AddressRemove(l.clone()));
            }
        }
    }
}

fn diff_routes(live: &NetworkState, desired: &NetworkState, options: DiffOptions, out: &mut Vec<Change>) {
    for d in &desired.routes {
        if !live.routes.iter().any(|l| l.matches(d)) {
            out.push(Change::RouteAdd(d.clone()));
        }
    }
    if options.strict_routes {
        for l in &live.routes {
            if !desired.routes.iter().any(|d| d.matches(l)) {
                out.push(Change::RouteRemove(l.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire_model::types::{BondMode, Family, LinkKind};

    fn iface(name: &str, index: i32, mtu: u32, up: bool) -> Interface {
        Interface {
            name: name.into(),
            index,
            flags: if up { 0x1 } else { 0 },
            mtu,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Physical,
            master_index: None,
        }
    }

    #[test]
    fn diff_of_identical_states_is_empty() {
        let mut s = NetworkState::new();
        s.push_interface(iface("eth0", 2, 1500, true));
        let changes = diff(&s, &s.clone(), DiffOptions::default());
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_against_empty_desired_emits_only_removals_for_removable_classes() {
        let mut live = NetworkState::new();
        live.bonds.push(Bond {
            name: "bond0".into(),
            index: 2,
            mode: BondMode::BalanceRr,
            miimon: 100,
            updelay: 0,
            downdelay: 0,
            xmit_hash_policy: None,
            lacp_rate: None,
            ad_select: None,
            members: vec![],
        });
        live.addresses.push(Address {
            owner_index: 2,
            owner_name: "bond0".into(),
            family: Family::Inet,
            addr: "10.0.0.1".parse().unwrap(),
            prefix_len: 24,
            scope: 0,
            flags: 0,
        });
        let desired = NetworkState::new();
        let changes = diff(&live, &desired, DiffOptions::default());
        assert!(changes.iter().any(|c| matches!(c, Change::BondRemove(b) if b.name == "bond0")));
        assert!(!changes.iter().any(|c| matches!(c, Change::AddressRemove(_))));
    }

    #[test]
    fn mtu_drift_produces_interface_modify() {
        let mut live = NetworkState::new();
        live.push_interface(iface("eth0", 2, 1500, true));
        let mut desired = NetworkState::new();
        desired.push_interface(iface("eth0", 2, 9000, true));

        let changes = diff(&live, &desired, DiffOptions::default());
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            Change::InterfaceModify { name, old_mtu, new_mtu, .. } => {
                assert_eq!(name, "eth0");
                assert_eq!(*old_mtu, 1500);
                assert_eq!(*new_mtu, 9000);
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn new_bond_emits_add_then_member_add_in_that_order() {
        let live = NetworkState::new();
        let mut desired = NetworkState::new();
        desired.push_interface(iface("eth0", 2, 1500, false));
        desired.bonds.push(Bond {
            name: "bond0".into(),
            index: 1000,
            mode: BondMode::Ieee8023ad,
            miimon: 100,
            updelay: 0,
            downdelay: 0,
            xmit_hash_policy: None,
            lacp_rate: None,
            ad_select: None,
            members: vec![2],
        });

        let changes = diff(&live, &desired, DiffOptions::default());
        let add_pos = changes.iter().position(|c| matches!(c, Change::BondAdd(_))).unwrap();
        let member_pos = changes.iter().position(|c| matches!(c, Change::BondMemberAdd { .. })).unwrap();
        assert!(add_pos < member_pos);
    }
}
