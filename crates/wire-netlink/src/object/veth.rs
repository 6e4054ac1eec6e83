//! veth pair specialization.
//!
//! A veth pair is created with a single `RTM_NEWLINK`: one endpoint is
//! the outer link, the other is nested under `VETH_INFO_PEER` as an
//! embedded `ifinfomsg` followed by its own `IFLA_IFNAME`.

use tracing::info;

use crate::abi::*;
use crate::channel::Channel;
use crate::error::{ChannelError, ErrorKind};
use crate::object::link::{self, LinkKind};

#[derive(Clone, Debug)]
pub struct VethSpec {
    pub name: String,
    pub peer_name: String,
}

#[derive(Clone, Debug)]
pub struct Veth {
    pub name: String,
    pub index: i32,
    pub peer_index: Option<i32>,
}

pub async fn create(chan: &Channel, spec: &VethSpec) -> Result<(), ChannelError> {
    let seq = chan.next_seq();
    let mut b = link::begin_create(&spec.name, seq, chan.pid())?;
    let info = b.begin_nested(IFLA_LINKINFO)?;
    b.attr_str(IFLA_INFO_KIND, "veth")?;
    let data = b.begin_nested(IFLA_INFO_DATA)?;
    let peer = b.begin_nested(VETH_INFO_PEER)?;
    b.raw(&[0u8; 16])?; // embedded ifinfomsg, all zero: kernel fills in the rest
    b.attr_str(IFLA_IFNAME, &spec.peer_name)?;
    b.end_nested(peer)?;
    b.end_nested(data)?;
    b.end_nested(info)?;
    chan.request(b.finish(), seq).await?;
    info!(name = %spec.name, peer = %spec.peer_name, "veth pair created");
    Ok(())
}

/// Delete a veth pair by deleting either endpoint; the kernel removes
/// both ends of the pair together.
pub async fn delete(chan: &Channel, index: i32) -> Result<(), ChannelError> {
    link::delete(chan, index).await
}

/// Resolve the peer index of a veth endpoint by name convention: wire
/// always creates both ends in the same `create` call and tracks the
/// pairing in the desired/live `NetworkState`, not by re-querying the
/// kernel (the kernel does not expose `IFLA_LINK` for veth peers in a
/// way that is stable across namespace moves).
pub async fn list(chan: &Channel) -> Result<Vec<Veth>, ChannelError> {
    let ifaces = link::list(chan).await?;
    Ok(ifaces
        .iter()
        .filter(|i| i.link_kind == LinkKind::Veth)
        .map(|i| Veth {
            name: i.name.clone(),
            index: i.index,
            peer_index: None,
        })
        .collect())
}

pub async fn get_by_name(chan: &Channel, name: &str) -> Result<Veth, ChannelError> {
    list(chan)
        .await?
        .into_iter()
        .find(|v| v.name == name)
        .ok_or(ChannelError::Request {
            kind: ErrorKind::NotFound,
            source: None,
        })
}
