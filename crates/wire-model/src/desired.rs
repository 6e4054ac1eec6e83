//! Desired Builder (component E): folds a flat `Command` sequence onto a
//! live baseline to produce the `NetworkState` the diff engine compares
//! against. Objects that do not yet exist in the kernel are given
//! synthesized indices (see [`crate::types::SYNTHESIZED_INDEX_BASE`]).

use std::net::IpAddr;

use crate::command::{Action, Command, Subject};
use crate::error::ModelError;
use crate::state::NetworkState;
use crate::types::{Address, Bond, BondMode, Bridge, Family, Interface, LinkKind, Route, Vlan, Veth};

const IFF_UP: u32 = 0x1;

pub fn build_desired(commands: &[Command], live: &NetworkState) -> Result<NetworkState, ModelError> {
    let mut desired = live.clone();
    for cmd in commands {
        apply(&mut desired, cmd)?;
    }
    Ok(desired)
}

fn apply(state: &mut NetworkState, cmd: &Command) -> Result<(), ModelError> {
    match &cmd.subject {
        Subject::Interface(name) => apply_interface(state, name, cmd),
        Subject::Bond(name) => apply_bond(state, name, cmd),
        Subject::Bridge(name) => apply_bridge(state, name, cmd),
        Subject::Vlan(name) => apply_vlan(state, name, cmd),
        Subject::Veth(name) => apply_veth(state, name, cmd),
        Subject::Route(dst) => apply_route(state, dst, cmd),
    }
}

/// Names accepted by the kernel are 1-15 bytes; reject anything outside
/// that range before a synthesized interface ever enters the desired
/// state, rather than letting it surface as a kernel `InvalidArgument`
/// at apply time.
fn check_name_len(name: &str) -> Result<(), ModelError> {
    if name.is_empty() || name.len() > 15 {
        return Err(ModelError::InvalidAttribute {
            attr: "name".into(),
            value: name.into(),
        });
    }
    Ok(())
}

fn ensure_interface(state: &mut NetworkState, name: &str, link_kind: LinkKind) -> Result<i32, ModelError> {
    if let Some(existing) = state.find_interface(name) {
        return Ok(existing.index);
    }
    check_name_len(name)?;
    let index = state.next_synthesized_index();
    state.push_interface(Interface {
        name: name.to_string(),
        index,
        flags: 0,
        mtu: 1500,
        mac: None,
        operstate: 0,
        link_kind,
        master_index: None,
    });
    Ok(index)
}

fn resolve_member_index(state: &NetworkState, name: &str) -> i32 {
    state.find_interface(name).map(|i| i.index).unwrap_or(-1)
}

fn apply_interface(state: &mut NetworkState, name: &str, cmd: &Command) -> Result<(), ModelError> {
    match &cmd.action {
        Action::Delete => {
            state.interfaces.retain(|i| i.name != name);
            state.reindex();
        }
        Action::Set { attr, value } => set_interface_attr(state, name, attr, value)?,
        Action::None => {
            for (attr, value) in &cmd.attributes {
                set_interface_attr(state, name, attr, value)?;
            }
        }
        Action::Create => {
            ensure_interface(state, name, LinkKind::Other)?;
            for (attr, value) in &cmd.attributes {
                set_interface_attr(state, name, attr, value)?;
            }
        }
        Action::Add(_) | Action::Remove(_) => {}
    }
    Ok(())
}

fn set_interface_attr(state: &mut NetworkState, name: &str, attr: &str, value: &str) -> Result<(), ModelError> {
    let owner_index = match state.find_interface(name) {
        Some(i) => i.index,
        None => {
            return Err(ModelError::UnknownReference {
                subject: format!("interface {name}"),
                name: name.to_string(),
            })
        }
    };
    match attr {
        "state" => {
            let iface = state.find_interface_mut(name).expect("looked up above");
            match value {
                "up" => iface.flags |= IFF_UP,
                "down" => iface.flags &= !IFF_UP,
                other => {
                    return Err(ModelError::InvalidAttribute {
                        attr: "state".into(),
                        value: other.into(),
                    })
                }
            }
        }
        "mtu" => {
            let mtu: u32 = value.parse().map_err(|_| ModelError::InvalidAttribute {
                attr: "mtu".into(),
                value: value.into(),
            })?;
            if !(68..=65536).contains(&mtu) {
                return Err(ModelError::InvalidAttribute {
                    attr: "mtu".into(),
                    value: value.into(),
                });
            }
            state.find_interface_mut(name).expect("looked up above").mtu = mtu;
        }
        "address" => {
            let cidr = wire_netlink::object::address::CidrAddress::parse(value).ok_or_else(|| ModelError::InvalidAttribute {
                attr: "address".into(),
                value: value.into(),
            })?;
            state.addresses.push(Address {
                owner_index,
                owner_name: name.to_string(),
                family: Family::of(cidr.addr),
                addr: cidr.addr,
                prefix_len: cidr.prefix_len,
                scope: 0,
                flags: 0,
            });
        }
        other => {
            return Err(ModelError::InvalidAttribute {
                attr: other.into(),
                value: value.into(),
            })
        }
    }
    Ok(())
}

fn apply_bond(state: &mut NetworkState, name: &str, cmd: &Command) -> Result<(), ModelError> {
    match &cmd.action {
        Action::Create => {
            let index = ensure_interface(state, name, LinkKind::Bond)?;
            let mode = cmd
                .attr("mode")
                .and_then(BondMode::parse)
                .unwrap_or(BondMode::BalanceRr);
            let miimon = cmd.attr("miimon").and_then(|v| v.parse().ok()).unwrap_or(100);
            state.bonds.push(Bond {
                name: name.to_string(),
                index,
                mode,
                miimon,
                updelay: 0,
                downdelay: 0,
                xmit_hash_policy: cmd.attr("xmit_hash_policy").map(str::to_string),
                lacp_rate: cmd.attr("lacp_rate").map(str::to_string),
                ad_select: None,
                members: Vec::new(),
            });
        }
        Action::Delete => {
            state.bonds.retain(|b| b.name != name);
            state.interfaces.retain(|i| i.name != name);
            state.reindex();
        }
        Action::Add(member) => {
            let member_index = resolve_member_index(state, member);
            if let Some(bond) = state.bonds.iter_mut().find(|b| b.name == name) {
                if !bond.members.contains(&member_index) {
                    bond.members.push(member_index);
                }
            }
            if let Some(iface) = state.find_interface(name) {
                let bond_index = iface.index;
                if let Some(member_iface) = state.find_interface_mut(member) {
                    member_iface.master_index = Some(bond_index);
                }
            }
        }
        Action::Remove(member) => {
            let member_index = resolve_member_index(state, member);
            if let Some(bond) = state.bonds.iter_mut().find(|b| b.name == name) {
                bond.members.retain(|&m| m != member_index);
            }
            if let Some(member_iface) = state.find_interface_mut(member) {
                member_iface.master_index = None;
            }
        }
        Action::Set { .. } | Action::None => {}
    }
    Ok(())
}

fn apply_bridge(state: &mut NetworkState, name: &str, cmd: &Command) -> Result<(), ModelError> {
    match &cmd.action {
        Action::Create => {
            let index = ensure_interface(state, name, LinkKind::Bridge)?;
            let stp_enabled = cmd.attr("stp").map(|v| v == "on").unwrap_or(false);
            state.bridges.push(Bridge {
                name: name.to_string(),
                index,
                stp_enabled,
                forward_delay: 1500,
                hello_time: 200,
                max_age: 2000,
                ports: Vec::new(),
            });
        }
        Action::Delete => {
            state.bridges.retain(|b| b.name != name);
            state.interfaces.retain(|i| i.name != name);
            state.reindex();
        }
        Action::Add(member) => {
            let member_index = resolve_member_index(state, member);
            if let Some(bridge) = state.bridges.iter_mut().find(|b| b.name == name) {
                if !bridge.ports.contains(&member_index) {
                    bridge.ports.push(member_index);
                }
            }
            if let Some(iface) = state.find_interface(name) {
                let bridge_index = iface.index;
                if let Some(member_iface) = state.find_interface_mut(member) {
                    member_iface.master_index = Some(bridge_index);
                }
            }
        }
        Action::Remove(member) => {
            let member_index = resolve_member_index(state, member);
            if let Some(bridge) = state.bridges.iter_mut().find(|b| b.name == name) {
                bridge.ports.retain(|&m| m != member_index);
            }
            if let Some(member_iface) = state.find_interface_mut(member) {
                member_iface.master_index = None;
            }
        }
        Action::Set { attr, value } if attr == "stp" => {
            if let Some(bridge) = state.bridges.iter_mut().find(|b| b.name == name) {
                bridge.stp_enabled = value == "on";
            }
        }
        Action::Set { .. } | Action::None => {}
    }
    Ok(())
}

fn apply_vlan(state: &mut NetworkState, name: &str, cmd: &Command) -> Result<(), ModelError> {
    match &cmd.action {
        Action::Create => {
            let vlan_id: u16 = cmd
                .attr("id")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ModelError::InvalidAttribute {
                    attr: "id".into(),
                    value: cmd.attr("id").unwrap_or("").into(),
                })?;
            if !Vlan::is_valid_id(vlan_id) {
                return Err(ModelError::InvalidAttribute {
                    attr: "id".into(),
                    value: vlan_id.to_string(),
                });
            }
            let parent_name = cmd.attr("on").ok_or_else(|| ModelError::InvalidAttribute {
                attr: "on".into(),
                value: String::new(),
            })?;
            let parent_index = match state.find_interface(parent_name) {
                Some(p) => p.index,
                None => {
                    return Err(ModelError::UnknownReference {
                        subject: format!("vlan {name}"),
                        name: parent_name.to_string(),
                    })
                }
            };
            let index = ensure_interface(state, name, LinkKind::Vlan)?;
            state.vlans.push(Vlan {
                name: name.to_string(),
                index,
                parent_index,
                vlan_id,
            });
        }
        Action::Delete => {
            state.vlans.retain(|v| v.name != name);
            state.interfaces.retain(|i| i.name != name);
            state.reindex();
        }
        _ => {}
    }
    Ok(())
}

fn apply_veth(state: &mut NetworkState, name: &str, cmd: &Command) -> Result<(), ModelError> {
    match &cmd.action {
        Action::Create => {
            let peer_name = cmd.attr("peer").ok_or_else(|| ModelError::InvalidAttribute {
                attr: "peer".into(),
                value: String::new(),
            })?;
            let index = ensure_interface(state, name, LinkKind::Veth)?;
            let peer_index = ensure_interface(state, peer_name, LinkKind::Veth)?;
            state.push_veth(Veth {
                name: name.to_string(),
                index,
                peer_index,
                peer_netns_id: None,
            });
            state.push_veth(Veth {
                name: peer_name.to_string(),
                index: peer_index,
                peer_index: index,
                peer_netns_id: None,
            });
        }
        Action::Delete => {
            let peer_index = state.find_veth(name).map(|v| v.peer_index);
            state.interfaces.retain(|i| i.name != name);
            if let Some(peer_index) = peer_index {
                state.interfaces.retain(|i| i.index != peer_index);
            }
            state.veths.retain(|v| v.name != name && Some(v.index) != peer_index);
            state.reindex();
        }
        _ => {}
    }
    Ok(())
}

fn apply_route(state: &mut NetworkState, dst: &str, cmd: &Command) -> Result<(), ModelError> {
    let destination = parse_destination(dst)?;
    match &cmd.action {
        Action::Create | Action::None => {
            let gateway: Option<IpAddr> = cmd
                .attr("via")
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| ModelError::InvalidAttribute {
                    attr: "via".into(),
                    value: cmd.attr("via").unwrap_or("").into(),
                })?;
            let oif = cmd.attr("dev").map(|d| resolve_member_index(state, d)).unwrap_or(0);
            let priority = cmd.attr("metric").and_then(|m| m.parse().ok());
            let family = match destination.map(|(a, _)| a).or(gateway) {
                Some(IpAddr::V6(_)) => Family::Inet6,
                _ => Family::Inet,
            };
            state.routes.retain(|r| r.destination != destination);
            state.routes.push(Route {
                family,
                destination,
                gateway,
                oif,
                priority,
                table: 254,
                protocol: 3,
                scope: 0,
                route_type: 1,
            });
        }
        Action::Delete => {
            state.routes.retain(|r| r.destination != destination);
        }
        _ => {}
    }
    Ok(())
}

fn parse_destination(dst: &str) -> Result<Option<(IpAddr, u8)>, ModelError> {
    if dst == "default" {
        return Ok(None);
    }
    let cidr = wire_netlink::object::address::CidrAddress::parse(dst).ok_or_else(|| ModelError::InvalidAttribute {
        attr: "destination".into(),
        value: dst.into(),
    })?;
    Ok(Some((cidr.addr, cidr.prefix_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bond_create_then_enslave_then_up_is_reflected_in_desired() {
        let live = NetworkState::new();
        let mut base = live.clone();
        base.push_interface(Interface {
            name: "eth0".into(),
            index: 2,
            flags: 0,
            mtu: 1500,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Physical,
            master_index: None,
        });

        let commands = vec![
            Command::new(Subject::Bond("bond0".into()), Action::Create).with_attr("mode", "802.3ad"),
            Command::new(Subject::Bond("bond0".into()), Action::Add("eth0".into())),
            Command::new(Subject::Interface("bond0".into()), Action::Set { attr: "state".into(), value: "up".into() }),
        ];

        let desired = build_desired(&commands, &base).unwrap();
        let bond = desired.find_bond("bond0").unwrap();
        assert_eq!(bond.mode, BondMode::Ieee8023ad);
        assert_eq!(bond.members, vec![2]);
        assert!(desired.find_interface("bond0").unwrap().is_up());
    }

    #[test]
    fn vlan_create_without_existing_parent_is_an_error() {
        let base = NetworkState::new();
        let commands = vec![Command::new(Subject::Vlan("eth9.100".into()), Action::Create)
            .with_attr("id", "100")
            .with_attr("on", "eth9")];
        assert!(build_desired(&commands, &base).is_err());
    }

    #[test]
    fn vlan_create_rejects_out_of_range_id() {
        let mut base = NetworkState::new();
        base.push_interface(Interface {
            name: "eth0".into(),
            index: 2,
            flags: 0,
            mtu: 1500,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Physical,
            master_index: None,
        });

        for id in ["0", "4095", "9999"] {
            let commands = vec![Command::new(Subject::Vlan("eth0.x".into()), Action::Create)
                .with_attr("id", id)
                .with_attr("on", "eth0")];
            assert!(build_desired(&commands, &base).is_err(), "id {id} should be rejected");
        }

        for id in ["1", "4094"] {
            let commands = vec![Command::new(Subject::Vlan("eth0.x".into()), Action::Create)
                .with_attr("id", id)
                .with_attr("on", "eth0")];
            assert!(build_desired(&commands, &base).is_ok(), "id {id} should be accepted");
        }
    }

    #[test]
    fn interface_create_rejects_names_over_fifteen_bytes() {
        let base = NetworkState::new();
        let commands = vec![Command::new(Subject::Interface("way-too-long-name".into()), Action::Create)];
        assert!(build_desired(&commands, &base).is_err());
    }

    #[test]
    fn interface_create_rejects_empty_name() {
        let base = NetworkState::new();
        let commands = vec![Command::new(Subject::Interface(String::new()), Action::Create)];
        assert!(build_desired(&commands, &base).is_err());
    }

    #[test]
    fn route_delete_removes_matching_destination() {
        let mut base = NetworkState::new();
        base.routes.push(Route {
            family: Family::Inet,
            destination: None,
            gateway: Some("10.0.0.1".parse().unwrap()),
            oif: 2,
            priority: None,
            table: 254,
            protocol: 3,
            scope: 0,
            route_type: 1,
        });
        let commands = vec![Command::new(Subject::Route("default".into()), Action::Delete)];
        let desired = build_desired(&commands, &base).unwrap();
        assert!(desired.routes.is_empty());
    }
}
