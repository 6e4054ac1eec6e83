//! The entity records aggregated by [`crate::state::NetworkState`].
//!
//! `LinkKind` and `BondMode` are re-exported from `wire-netlink::object`
//! rather than redefined here: the wire format and the model agree on
//! the same closed enumeration, so there is nothing to translate.

use std::net::IpAddr;

pub use wire_netlink::object::bond::BondMode;
pub use wire_netlink::object::link::LinkKind;

/// Index a desired-state object is given before it has a kernel-assigned
/// one. Never leaks into a request sent through `wire-netlink`.
pub const SYNTHESIZED_INDEX_BASE: i32 = 1000;

#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    pub name: String,
    pub index: i32,
    pub flags: u32,
    pub mtu: u32,
    pub mac: Option<[u8; 6]>,
    pub operstate: u8,
    pub link_kind: LinkKind,
    pub master_index: Option<i32>,
}

const IFF_UP: u32 = 0x1;
const IFF_LOWER_UP: u32 = 0x10000;

impl Interface {
    pub fn is_up(&self) -> bool {
        self.flags & IFF_UP != 0
    }

    pub fn has_carrier(&self) -> bool {
        self.flags & IFF_LOWER_UP != 0
    }

    pub fn is_synthesized(&self) -> bool {
        self.index >= SYNTHESIZED_INDEX_BASE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Inet,
    Inet6,
}

impl Family {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::Inet,
            IpAddr::V6(_) => Family::Inet6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Address {
    pub owner_index: i32,
    /// Cached at build time so the reconciler can re-resolve the real
    /// index later without the caller needing to keep its own map.
    pub owner_name: String,
    pub family: Family,
    pub addr: IpAddr,
    pub prefix_len: u8,
    pub scope: u8,
    pub flags: u32,
}

impl Address {
    /// Semantic equality per the diff engine's rules: family, the
    /// address bits meaningful for that family, and prefix length.
    pub fn matches(&self, other: &Address) -> bool {
        self.family == other.family && self.addr == other.addr && self.prefix_len == other.prefix_len
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub family: Family,
    pub destination: Option<(IpAddr, u8)>,
    pub gateway: Option<IpAddr>,
    pub oif: i32,
    pub priority: Option<u32>,
    pub table: u8,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: u8,
}

impl Route {
    pub fn is_default(&self) -> bool {
        self.destination.is_none() || self.destination.map(|(_, p)| p == 0).unwrap_or(false)
    }

    /// Semantic equality per the diff engine's rules.
    pub fn matches(&self, other: &Route) -> bool {
        self.family == other.family
            && self.destination == other.destination
            && self.gateway.is_some() == other.gateway.is_some()
            && (self.gateway.is_none() || self.gateway == other.gateway)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bond {
    pub name: String,
    pub index: i32,
    pub mode: BondMode,
    pub miimon: u32,
    pub updelay: u32,
    pub downdelay: u32,
    pub xmit_hash_policy: Option<String>,
    pub lacp_rate: Option<String>,
    pub ad_select: Option<String>,
    pub members: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bridge {
    pub name: String,
    pub index: i32,
    pub stp_enabled: bool,
    pub forward_delay: u32,
    pub hello_time: u32,
    pub max_age: u32,
    pub ports: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Vlan {
    pub name: String,
    pub index: i32,
    pub parent_index: i32,
    pub vlan_id: u16,
}

impl Vlan {
    pub fn is_valid_id(id: u16) -> bool {
        (1..=4094).contains(&id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Veth {
    pub name: String,
    pub index: i32,
    pub peer_index: i32,
    pub peer_netns_id: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlan_id_boundaries() {
        assert!(!Vlan::is_valid_id(0));
        assert!(Vlan::is_valid_id(1));
        assert!(Vlan::is_valid_id(4094));
        assert!(!Vlan::is_valid_id(4095));
    }

    #[test]
    fn is_up_and_has_carrier_read_the_expected_bits() {
        let iface = Interface {
            name: "eth0".into(),
            index: 2,
            flags: IFF_UP | IFF_LOWER_UP,
            mtu: 1500,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Physical,
            master_index: None,
        };
        assert!(iface.is_up());
        assert!(iface.has_carrier());

        let down = Interface { flags: 0, ..iface };
        assert!(!down.is_up());
        assert!(!down.has_carrier());
    }
}
