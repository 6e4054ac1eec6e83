//! Resolver (component G): Kahn's-algorithm topological sort over a
//! change list's dependency graph.
//!
//! Dependency rules (§4.G): a bond/bridge-member attachment depends on
//! its parent's creation; a VLAN (or veth) creation depends on its
//! parent interface's creation when that parent is itself being created
//! in the same batch; an address or interface-state modification
//! depends on the owning interface's creation; a route addition depends
//! on every preceding bond/bridge/VLAN creation in the batch (coarse
//! but sufficient for safety).

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use wire_model::state::NetworkState;

use crate::diff::Change;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("circular dependency among changes")]
    CircularDependency,
}

/// Names of entities a change creates, keyed for dependency lookups by
/// other changes that reference the same name.
fn creates(change: &Change) -> Option<&str> {
    match change {
        Change::BondAdd(b) => Some(&b.name),
        Change::BridgeAdd(b) => Some(&b.name),
        Change::VlanAdd(v) => Some(&v.name),
        Change::VethAdd(v) => Some(&v.name),
        _ => None,
    }
}

fn is_bond_bridge_or_vlan_add(change: &Change) -> bool {
    matches!(
        change,
        Change::BondAdd(_) | Change::BridgeAdd(_) | Change::VlanAdd(_) | Change::VethAdd(_)
    )
}

/// Entity names a change directly references as a prerequisite, beyond
/// its own subject (e.g. a member-add references both its owner and the
/// member itself).
fn references(change: &Change) -> Vec<&str> {
    match change {
        Change::BondMemberAdd { bond, member } | Change::BondMemberRemove { bond, member } => {
            vec![bond.as_str(), member.as_str()]
        }
        Change::BridgeMemberAdd { bridge, member } | Change::BridgeMemberRemove { bridge, member } => {
            vec![bridge.as_str(), member.as_str()]
        }
        Change::VlanAdd(v) => vec![v.name.as_str()],
        Change::InterfaceModify { name, .. } => vec![name.as_str()],
        Change::AddressAdd(a) | Change::AddressRemove(a) => vec![a.owner_name.as_str()],
        _ => Vec::new(),
    }
}

pub fn resolve(changes: Vec<Change>) -> Result<Vec<Change>, ResolveError> {
    let n = changes.len();
    let creators: HashMap<&str, usize> = changes
        .iter()
        .enumerate()
        .filter_map(|(i, c)| creates(c).map(|name| (name, i)))
        .collect();
    let add_indices: Vec<usize> = changes
        .iter()
        .enumerate()
        .filter(|(_, c)| is_bond_bridge_or_vlan_add(c))
        .map(|(i, _)| i)
        .collect();

    // edge (from, to) means `from` must be applied before `to`.
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for (i, change) in changes.iter().enumerate() {
        for name in references(change) {
            if let Some(&creator) = creators.get(name) {
                if creator != i {
                    edges.push((creator, i));
                }
            }
        }
        if matches!(change, Change::RouteAdd(_)) {
            for &creator in &add_indices {
                edges.push((creator, i));
            }
        }
    }

    topo_sort(changes, n, &edges)
}

fn topo_sort(changes: Vec<Change>, n: usize, edges: &[(usize, usize)]) -> Result<Vec<Change>, ResolveError> {
    let mut in_degree = vec![0usize; n];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in edges {
        adjacency[from].push(to);
        in_degree[to] += 1;
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != n {
        return Err(ResolveError::CircularDependency);
    }

    let mut slots: Vec<Option<Change>> = changes.into_iter().map(Some).collect();
    Ok(order.into_iter().map(|i| slots[i].take().expect("each index visited once")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire_model::types::{Address, BondMode, Family};

    fn bond(name: &str) -> wire_model::types::Bond {
        wire_model::types::Bond {
            name: name.to_string(),
            index: 1000,
            mode: BondMode::Ieee8023ad,
            miimon: 100,
            updelay: 0,
            downdelay: 0,
            xmit_hash_policy: None,
            lacp_rate: None,
            ad_select: None,
            members: vec![],
        }
    }

    #[test]
    fn resolve_is_a_permutation_and_respects_creation_order() {
        let changes = vec![
            Change::InterfaceModify { name: "bond0".into(), old_up: false, new_up: true, old_mtu: 1500, new_mtu: 1500 },
            Change::AddressAdd(Address {
                owner_index: 1000,
                owner_name: "bond0".into(),
                family: Family::Inet,
                addr: "10.0.0.1".parse().unwrap(),
                prefix_len: 24,
                scope: 0,
                flags: 0,
            }),
            Change::BondMemberAdd { bond: "bond0".into(), member: "eth0".into() },
            Change::BondAdd(bond("bond0")),
        ];
        let resolved = resolve(changes.clone()).unwrap();
        assert_eq!(resolved.len(), changes.len());

        let pos_of = |pred: &dyn Fn(&Change) -> bool| resolved.iter().position(|c| pred(c)).unwrap();
        let add_pos = pos_of(&|c| matches!(c, Change::BondAdd(_)));
        let member_pos = pos_of(&|c| matches!(c, Change::BondMemberAdd { .. }));
        let up_pos = pos_of(&|c| matches!(c, Change::InterfaceModify { .. }));
        let addr_pos = pos_of(&|c| matches!(c, Change::AddressAdd(_)));
        assert!(add_pos < member_pos);
        assert!(add_pos < up_pos);
        assert!(add_pos < addr_pos);
    }

    #[test]
    fn cyclic_dependency_graph_is_detected() {
        // A synthetic two-node cycle: node 0 depends on node 1 and node
        // 1 depends on node 0, mirroring "create bond0 depends on member
        // veth0 whose creation depends on bond0".
        let changes = vec![
            Change::BondMemberAdd { bond: "bond0".into(), member: "veth0".into() },
            Change::BondMemberAdd { bond: "veth0".into(), member: "bond0".into() },
        ];
        let edges = vec![(0usize, 1usize), (1usize, 0usize)];
        let result = topo_sort(changes, 2, &edges);
        assert_eq!(result.unwrap_err(), ResolveError::CircularDependency);
    }
}
