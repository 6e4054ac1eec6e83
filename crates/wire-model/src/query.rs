//! Live Querier (component D): populates a fresh [`NetworkState`] by
//! enumerating through the typed object layer, links first so that
//! address/route owner lookups and bond/bridge/VLAN derivation can
//! resolve against an already-populated interface table.

use tracing::debug;
use wire_netlink::Channel;

use crate::error::ModelError;
use crate::state::NetworkState;
use crate::types::{Address, Bond, Bridge, Family, Interface, Route, Vlan, Veth};

pub async fn query_live(chan: &Channel) -> Result<NetworkState, ModelError> {
    let mut state = NetworkState::new();

    let links = wire_netlink::object::link::list(chan).await?;
    debug!(count = links.len(), "queried links");
    for l in &links {
        state.push_interface(Interface {
            name: l.name.clone(),
            index: l.index,
            flags: l.flags,
            mtu: l.mtu,
            mac: l.mac,
            operstate: l.operstate,
            link_kind: l.link_kind,
            master_index: l.master_index,
        });
    }

    let addrs = wire_netlink::object::address::list(chan).await?;
    debug!(count = addrs.len(), "queried addresses");
    for a in addrs {
        let owner_name = state
            .find_interface_by_index(a.link_index)
            .map(|i| i.name.clone())
            .unwrap_or_default();
        state.addresses.push(Address {
            owner_index: a.link_index,
            owner_name,
            family: Family::of(a.cidr.addr),
            addr: a.cidr.addr,
            prefix_len: a.cidr.prefix_len,
            scope: 0,
            flags: 0,
        });
    }

    let routes = wire_netlink::object::route::list(chan).await?;
    debug!(count = routes.len(), "queried routes");
    for r in routes {
        let hop = r.hops.first();
        state.routes.push(Route {
            family: match r.destination.map(|(a, _)| a).or_else(|| hop.and_then(|h| h.gateway)) {
                Some(std::net::IpAddr::V6(_)) => Family::Inet6,
                _ => Family::Inet,
            },
            destination: r.destination,
            gateway: hop.and_then(|h| h.gateway),
            oif: hop.map(|h| h.oif_index).unwrap_or(0),
            priority: r.priority,
            table: r.table,
            protocol: r.protocol,
            scope: 0,
            route_type: 1,
        });
    }

    derive_specializations(&links, &mut state);
    state.refreshed_at = Some(std::time::SystemTime::now());
    Ok(state)
}

/// Bonds, bridges, VLANs, and veth pairs are all specializations of the
/// link list already queried above; this derives the per-kind records
/// from it rather than re-enumerating through the kernel a second time.
fn derive_specializations(links: &[wire_netlink::object::link::Interface], state: &mut NetworkState) {
    use wire_netlink::attr;
    use wire_netlink::object::link::LinkKind;
    use wire_netlink::object::{bond, bridge};

    for l in links {
        match l.link_kind {
            LinkKind::Bond => {
                let members = links.iter().filter(|m| m.master_index == Some(l.index)).map(|m| m.index).collect();
                let info = l.info_data.as_deref().map(attr::nested).unwrap_or_default();
                let decoded = bond::from_interface_and_info(l, &info, members);
                state.bonds.push(Bond {
                    name: decoded.name,
                    index: decoded.index,
                    mode: decoded.mode,
                    miimon: decoded.miimon,
                    updelay: decoded.updelay,
                    downdelay: decoded.downdelay,
                    xmit_hash_policy: decoded.xmit_hash_policy,
                    lacp_rate: decoded.lacp_rate,
                    ad_select: decoded.ad_select,
                    members: decoded.members,
                });
            }
            LinkKind::Bridge => {
                let ports = links.iter().filter(|m| m.master_index == Some(l.index)).map(|m| m.index).collect();
                let info = l.info_data.as_deref().map(attr::nested).unwrap_or_default();
                let decoded = bridge::from_interface_and_info(l, &info, ports);
                state.bridges.push(Bridge {
                    name: decoded.name,
                    index: decoded.index,
                    stp_enabled: decoded.stp_enabled,
                    forward_delay: decoded.forward_delay_cs,
                    hello_time: decoded.hello_time_cs,
                    max_age: decoded.max_age_cs,
                    ports: decoded.members,
                });
            }
            LinkKind::Vlan => {
                let vlan_id = l.name.rsplit('.').next().and_then(|t| t.parse().ok()).unwrap_or(0);
                state.vlans.push(Vlan {
                    name: l.name.clone(),
                    index: l.index,
                    parent_index: 0,
                    vlan_id,
                });
            }
            LinkKind::Veth => {
                state.push_veth(Veth {
                    name: l.name.clone(),
                    index: l.index,
                    peer_index: 0,
                    peer_netns_id: None,
                });
            }
            _ => {}
        }
    }
}
