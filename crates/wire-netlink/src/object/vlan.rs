//! 802.1Q VLAN link specialization.

use tracing::info;

use crate::abi::*;
use crate::channel::Channel;
use crate::error::{ChannelError, ErrorKind};
use crate::object::link::{self, Interface, LinkKind};

#[derive(Clone, Debug)]
pub struct VlanSpec {
    pub name: String,
    pub parent_index: i32,
    pub vlan_id: u16,
}

#[derive(Clone, Debug)]
pub struct Vlan {
    pub name: String,
    pub index: i32,
    pub parent_index: i32,
    pub vlan_id: u16,
}

/// Create a VLAN link. The parent link is carried as a top-level
/// `IFLA_LINK`, not nested in the link-info block, matching how the
/// kernel expects stacked (802.1Q-on-X) links to identify their lower.
pub async fn create(chan: &Channel, spec: &VlanSpec) -> Result<(), ChannelError> {
    let seq = chan.next_seq();
    let mut b = link::begin_create(&spec.name, seq, chan.pid())?;
    b.attr_u32(IFLA_LINK, spec.parent_index as u32)?;
    let info = b.begin_nested(IFLA_LINKINFO)?;
    b.attr_str(IFLA_INFO_KIND, "vlan")?;
    let data = b.begin_nested(IFLA_INFO_DATA)?;
    b.attr(IFLA_VLAN_ID, &spec.vlan_id.to_ne_bytes())?;
    b.end_nested(data)?;
    b.end_nested(info)?;
    chan.request(b.finish(), seq).await?;
    info!(name = %spec.name, parent = spec.parent_index, vlan_id = spec.vlan_id, "vlan created");
    Ok(())
}

pub async fn delete(chan: &Channel, index: i32) -> Result<(), ChannelError> {
    link::delete(chan, index).await
}

pub fn from_interface(iface: &Interface, parent_index: i32, vlan_id: u16) -> Vlan {
    Vlan {
        name: iface.name.clone(),
        index: iface.index,
        parent_index,
        vlan_id,
    }
}

pub async fn list(chan: &Channel) -> Result<Vec<Vlan>, ChannelError> {
    let ifaces = link::list(chan).await?;
    Ok(ifaces
        .iter()
        .filter(|i| i.link_kind == LinkKind::Vlan)
        .map(|i| Vlan {
            name: i.name.clone(),
            index: i.index,
            parent_index: 0,
            vlan_id: i
                .name
                .rsplit('.')
                .next()
                .and_then(|tail| tail.parse().ok())
                .unwrap_or(0),
        })
        .collect())
}

pub async fn get_by_name(chan: &Channel, name: &str) -> Result<Vlan, ChannelError> {
    list(chan)
        .await?
        .into_iter()
        .find(|v| v.name == name)
        .ok_or(ChannelError::Request {
            kind: ErrorKind::NotFound,
            source: None,
        })
}
