//! Link (interface) object class: the base type every bond, bridge,
//! VLAN, and veth specialization is a `link_kind` of.

use tracing::{debug, info};

use crate::abi::*;
use crate::attr::{self, Attr, AttrWalker};
use crate::channel::Channel;
use crate::error::{ChannelError, ErrorKind};
use crate::message::{MessageBuilder, NlHeader, BUF_CREATE, BUF_DEL};

/// Specialization of a link, derived from its `IFLA_LINKINFO` kind or, if
/// absent, a name heuristic (see [`classify_by_name`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
    Veth,
    Tap,
    Tun,
    Loopback,
    Other,
}

#[derive(Clone, Debug)]
pub struct Interface {
    pub name: String,
    pub index: i32,
    pub flags: u32,
    pub mtu: u32,
    pub mac: Option<[u8; 6]>,
    pub operstate: u8,
    pub link_kind: LinkKind,
    pub master_index: Option<i32>,
    /// Raw `IFLA_INFO_DATA` bytes nested under `IFLA_LINKINFO`, when
    /// present. Kind-specific decoders (`bond::from_interface_and_info`,
    /// `bridge::from_interface_and_info`) walk this with
    /// [`crate::attr::nested`] rather than re-fetching the link.
    pub info_data: Option<Vec<u8>>,
}

impl Interface {
    pub fn is_up(&self) -> bool {
        self.flags & IFF_UP != 0
    }

    pub fn has_carrier(&self) -> bool {
        self.flags & IFF_LOWER_UP != 0
    }
}

/// ifinfomsg, fixed 16 bytes: family(1) + pad(1) + type(2) + index(4) +
/// flags(4) + change(4).
fn ifinfomsg(index: i32, flags: u32, change: u32) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0] = AF_UNSPEC;
    buf[4..8].copy_from_slice(&index.to_ne_bytes());
    buf[8..12].copy_from_slice(&flags.to_ne_bytes());
    buf[12..16].copy_from_slice(&change.to_ne_bytes());
    buf
}

fn parse_interface(msg: &[u8]) -> Result<Interface, ChannelError> {
    if msg.len() < 16 {
        return Err(ChannelError::Malformed("short ifinfomsg".into()));
    }
    let index = i32::from_ne_bytes(msg[4..8].try_into().unwrap());
    let flags = u32::from_ne_bytes(msg[8..12].try_into().unwrap());
    let attrs: Vec<Attr> = AttrWalker::new(&msg[16..]).collect_all();

    let name = attr::find(&attrs, IFLA_IFNAME)
        .and_then(attr::as_cstr)
        .ok_or_else(|| ChannelError::Malformed("link reply missing IFLA_IFNAME".into()))?
        .to_string();
    let mtu = attr::find(&attrs, IFLA_MTU).and_then(attr::as_u32).unwrap_or(0);
    let mac = attr::find(&attrs, IFLA_ADDRESS).and_then(|v| <[u8; 6]>::try_from(v).ok());
    let operstate = attr::find(&attrs, IFLA_OPERSTATE).and_then(attr::as_u8).unwrap_or(0);
    let master_index = attr::find(&attrs, IFLA_MASTER).and_then(attr::as_u32).map(|v| v as i32);

    let link_info = attr::find(&attrs, IFLA_LINKINFO).map(attr::nested);
    let link_kind = link_info
        .as_ref()
        .and_then(|info| attr::find(info, IFLA_INFO_KIND).and_then(attr::as_cstr).map(kind_from_str))
        .unwrap_or_else(|| classify_by_name(&name, flags));
    let info_data = link_info
        .as_ref()
        .and_then(|info| attr::find(info, IFLA_INFO_DATA))
        .map(|v| v.to_vec());

    Ok(Interface {
        name,
        index,
        flags,
        mtu,
        mac,
        operstate,
        link_kind,
        master_index,
        info_data,
    })
}

fn kind_from_str(kind: &str) -> LinkKind {
    match kind {
        "bond" => LinkKind::Bond,
        "bridge" => LinkKind::Bridge,
        "vlan" => LinkKind::Vlan,
        "veth" => LinkKind::Veth,
        "tun" => LinkKind::Tun,
        _ => LinkKind::Other,
    }
}

/// Name-heuristic classification used when `IFLA_LINKINFO` is absent
/// (common for loopback and some physical drivers).
pub fn classify_by_name(name: &str, flags: u32) -> LinkKind {
    if flags & IFF_LOOPBACK != 0 {
        return LinkKind::Loopback;
    }
    if name.starts_with("bond") {
        LinkKind::Bond
    } else if name.starts_with("br") || name.starts_with("virbr") {
        LinkKind::Bridge
    } else if name.contains('.') {
        LinkKind::Vlan
    } else if name.starts_with("veth") {
        LinkKind::Veth
    } else if name.starts_with("tap") || name.starts_with("vnet") {
        LinkKind::Tap
    } else if name.starts_with("tun") {
        LinkKind::Tun
    } else {
        LinkKind::Physical
    }
}

/// List every link visible to the channel (`RTM_GETLINK` dump).
pub async fn list(chan: &Channel) -> Result<Vec<Interface>, ChannelError> {
    let seq = chan.next_seq();
    let header = NlHeader::dump(RTM_GETLINK, seq, chan.pid());
    let payload = ifinfomsg(0, 0, 0);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    let reply = chan.request(built, seq).await?;
    reply.messages.iter().map(|m| parse_interface(m)).collect()
}

pub async fn get_by_name(chan: &Channel, name: &str) -> Result<Interface, ChannelError> {
    list(chan)
        .await?
        .into_iter()
        .find(|i| i.name == name)
        .ok_or(ChannelError::Request {
            kind: ErrorKind::NotFound,
            source: None,
        })
}

pub async fn get_by_index(chan: &Channel, index: i32) -> Result<Interface, ChannelError> {
    list(chan)
        .await?
        .into_iter()
        .find(|i| i.index == index)
        .ok_or(ChannelError::Request {
            kind: ErrorKind::NotFound,
            source: None,
        })
}

/// Set the UP/DOWN flag on a link.
pub async fn set_up(chan: &Channel, index: i32, up: bool) -> Result<(), ChannelError> {
    debug!(index, up, "setting link state");
    let seq = chan.next_seq();
    let header = NlHeader::request(RTM_SETLINK, 0, seq, chan.pid()).acked();
    let flags = if up { IFF_UP } else { 0 };
    let payload = ifinfomsg(index, flags, IFF_UP);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    chan.request(built, seq).await?;
    info!(index, up, "link state changed");
    Ok(())
}

/// Set a link's MTU.
pub async fn set_mtu(chan: &Channel, index: i32, mtu: u32) -> Result<(), ChannelError> {
    debug!(index, mtu, "setting link mtu");
    let seq = chan.next_seq();
    let header = NlHeader::request(RTM_SETLINK, 0, seq, chan.pid()).acked();
    let payload = ifinfomsg(index, 0, 0);
    let mut b = MessageBuilder::new(BUF_DEL, header, &payload)?;
    b.attr_u32(IFLA_MTU, mtu)?;
    chan.request(b.finish(), seq).await?;
    info!(index, mtu, "link mtu changed");
    Ok(())
}

/// Enslave `member` under `master` (bond/bridge attachment) by setting
/// the member's `IFLA_MASTER`.
pub async fn set_master(chan: &Channel, member_index: i32, master_index: i32) -> Result<(), ChannelError> {
    debug!(member_index, master_index, "enslaving link");
    let seq = chan.next_seq();
    let header = NlHeader::request(RTM_SETLINK, 0, seq, chan.pid()).acked();
    let payload = ifinfomsg(member_index, 0, 0);
    let mut b = MessageBuilder::new(BUF_DEL, header, &payload)?;
    b.attr_u32(IFLA_MASTER, master_index as u32)?;
    chan.request(b.finish(), seq).await?;
    info!(member_index, master_index, "link enslaved");
    Ok(())
}

/// Delete a link by index. `NotFound` is treated by the reconciler, not
/// here, as idempotent success.
pub async fn delete(chan: &Channel, index: i32) -> Result<(), ChannelError> {
    debug!(index, "deleting link");
    let seq = chan.next_seq();
    let header = NlHeader::request(RTM_DELLINK, 0, seq, chan.pid()).acked();
    let payload = ifinfomsg(index, 0, 0);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    chan.request(built, seq).await?;
    info!(index, "link deleted");
    Ok(())
}

/// Create a plain (non-specialized) link: currently unused directly by
/// any command (physical links are never created by wire), but kept
/// as the base the bond/bridge/vlan/veth creators build on via
/// [`begin_link_info`].
pub(crate) fn begin_create(name: &str, seq: u32, pid: u32) -> Result<MessageBuilder, ChannelError> {
    let header = NlHeader::request(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL, seq, pid).acked();
    let payload = ifinfomsg(0, 0, 0);
    let mut b = MessageBuilder::new(BUF_CREATE, header, &payload)?;
    b.attr_str(IFLA_IFNAME, name)?;
    Ok(b)
}

/// Begin a modify request (`RTM_NEWLINK` without `CREATE`/`EXCL`) against
/// an existing link by index, the base the bond/bridge mode-change
/// helpers build on.
pub(crate) fn begin_modify(index: i32, seq: u32, pid: u32) -> Result<MessageBuilder, ChannelError> {
    let header = NlHeader::request(RTM_NEWLINK, 0, seq, pid).acked();
    let payload = ifinfomsg(index, 0, 0);
    MessageBuilder::new(BUF_CREATE, header, &payload).map_err(ChannelError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interface_captures_info_data_for_downstream_decoders() {
        let header = NlHeader::request(RTM_NEWLINK, 0, 1, 1);
        let payload = ifinfomsg(7, IFF_UP, 0);
        let mut b = MessageBuilder::new(BUF_CREATE, header, &payload).unwrap();
        b.attr_str(IFLA_IFNAME, "bond0").unwrap();
        let info = b.begin_nested(IFLA_LINKINFO).unwrap();
        b.attr_str(IFLA_INFO_KIND, "bond").unwrap();
        let data = b.begin_nested(IFLA_INFO_DATA).unwrap();
        b.attr_u8(IFLA_BOND_MODE, 1).unwrap();
        b.end_nested(data).unwrap();
        b.end_nested(info).unwrap();
        let bytes = b.finish();

        let iface = parse_interface(&bytes[16..]).unwrap();
        assert_eq!(iface.name, "bond0");
        assert_eq!(iface.link_kind, LinkKind::Bond);
        let info_data = iface.info_data.expect("info_data captured");
        let attrs = attr::nested(&info_data);
        assert_eq!(attr::find(&attrs, IFLA_BOND_MODE).and_then(attr::as_u8), Some(1));
    }

    #[test]
    fn classify_by_name_falls_back_without_link_info() {
        assert_eq!(classify_by_name("bond0", 0), LinkKind::Bond);
        assert_eq!(classify_by_name("lo", IFF_LOOPBACK), LinkKind::Loopback);
    }
}
