//! Bridge link specialization.

use tracing::info;

use crate::abi::*;
use crate::attr::{self, Attr};
use crate::channel::Channel;
use crate::error::{ChannelError, ErrorKind};
use crate::object::link::{self, Interface, LinkKind};

#[derive(Clone, Debug)]
pub struct BridgeSpec {
    pub name: String,
    pub stp_enabled: bool,
    pub forward_delay_cs: u32,
    pub hello_time_cs: u32,
    pub max_age_cs: u32,
}

impl Default for BridgeSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            stp_enabled: false,
            forward_delay_cs: 1500,
            hello_time_cs: 200,
            max_age_cs: 2000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Bridge {
    pub name: String,
    pub index: i32,
    pub stp_enabled: bool,
    pub forward_delay_cs: u32,
    pub hello_time_cs: u32,
    pub max_age_cs: u32,
    pub members: Vec<i32>,
}

pub fn from_interface_and_info(iface: &Interface, info_data: &[Attr], members: Vec<i32>) -> Bridge {
    let stp_enabled = attr::find(info_data, IFLA_BR_STP_STATE)
        .and_then(attr::as_u32)
        .map(|v| v != 0)
        .unwrap_or(false);
    let forward_delay_cs = attr::find(info_data, IFLA_BR_FORWARD_DELAY).and_then(attr::as_u32).unwrap_or(0);
    let hello_time_cs = attr::find(info_data, IFLA_BR_HELLO_TIME).and_then(attr::as_u32).unwrap_or(0);
    let max_age_cs = attr::find(info_data, IFLA_BR_MAX_AGE).and_then(attr::as_u32).unwrap_or(0);
    Bridge {
        name: iface.name.clone(),
        index: iface.index,
        stp_enabled,
        forward_delay_cs,
        hello_time_cs,
        max_age_cs,
        members,
    }
}

pub async fn list(chan: &Channel) -> Result<Vec<Bridge>, ChannelError> {
    let ifaces = link::list(chan).await?;
    let bridges: Vec<&Interface> = ifaces.iter().filter(|i| i.link_kind == LinkKind::Bridge).collect();
    let mut out = Vec::with_capacity(bridges.len());
    for br in bridges {
        let members: Vec<i32> = ifaces
            .iter()
            .filter(|m| m.master_index == Some(br.index))
            .map(|m| m.index)
            .collect();
        let info = br.info_data.as_deref().map(attr::nested).unwrap_or_default();
        out.push(from_interface_and_info(br, &info, members));
    }
    Ok(out)
}

pub async fn get_by_name(chan: &Channel, name: &str) -> Result<Bridge, ChannelError> {
    list(chan)
        .await?
        .into_iter()
        .find(|b| b.name == name)
        .ok_or(ChannelError::Request {
            kind: ErrorKind::NotFound,
            source: None,
        })
}

/// Create a bridge link with `CREATE|EXCL` semantics.
pub async fn create(chan: &Channel, spec: &BridgeSpec) -> Result<(), ChannelError> {
    let seq = chan.next_seq();
    let mut b = link::begin_create(&spec.name, seq, chan.pid())?;
    let info = b.begin_nested(IFLA_LINKINFO)?;
    b.attr_str(IFLA_INFO_KIND, "bridge")?;
    let data = b.begin_nested(IFLA_INFO_DATA)?;
    b.attr_u32(IFLA_BR_STP_STATE, spec.stp_enabled as u32)?;
    b.attr_u32(IFLA_BR_FORWARD_DELAY, spec.forward_delay_cs)?;
    b.attr_u32(IFLA_BR_HELLO_TIME, spec.hello_time_cs)?;
    b.attr_u32(IFLA_BR_MAX_AGE, spec.max_age_cs)?;
    b.end_nested(data)?;
    b.end_nested(info)?;
    chan.request(b.finish(), seq).await?;
    info!(name = %spec.name, "bridge created");
    Ok(())
}

pub async fn delete(chan: &Channel, index: i32) -> Result<(), ChannelError> {
    link::delete(chan, index).await
}

/// Modify an existing bridge's STP/timer settings in place (`RTM_NEWLINK`
/// without `CREATE`/`EXCL`).
pub async fn modify(chan: &Channel, index: i32, spec: &BridgeSpec) -> Result<(), ChannelError> {
    let seq = chan.next_seq();
    let mut b = link::begin_modify(index, seq, chan.pid())?;
    let info = b.begin_nested(IFLA_LINKINFO)?;
    b.attr_str(IFLA_INFO_KIND, "bridge")?;
    let data = b.begin_nested(IFLA_INFO_DATA)?;
    b.attr_u32(IFLA_BR_STP_STATE, spec.stp_enabled as u32)?;
    b.attr_u32(IFLA_BR_FORWARD_DELAY, spec.forward_delay_cs)?;
    b.attr_u32(IFLA_BR_HELLO_TIME, spec.hello_time_cs)?;
    b.attr_u32(IFLA_BR_MAX_AGE, spec.max_age_cs)?;
    b.end_nested(data)?;
    b.end_nested(info)?;
    chan.request(b.finish(), seq).await?;
    info!(index, "bridge modified");
    Ok(())
}

/// Attach `member` to `bridge` by setting the member's master link, the
/// same mechanism used for bond enslavement.
pub async fn attach_member(chan: &Channel, bridge_index: i32, member_index: i32) -> Result<(), ChannelError> {
    link::set_master(chan, member_index, bridge_index).await
}

pub async fn detach_member(chan: &Channel, member_index: i32) -> Result<(), ChannelError> {
    link::set_master(chan, member_index, 0).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBuilder, NlHeader, BUF_CREATE};

    fn stub_interface(name: &str, index: i32) -> Interface {
        Interface {
            name: name.to_string(),
            index,
            flags: 0,
            mtu: 1500,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Bridge,
            master_index: None,
            info_data: None,
        }
    }

    #[test]
    fn from_interface_and_info_decodes_stp_and_timers() {
        let header = NlHeader::request(crate::abi::RTM_NEWLINK, 0, 1, 1);
        let mut b = MessageBuilder::new(BUF_CREATE, header, &[0u8; 16]).unwrap();
        b.attr_u32(IFLA_BR_STP_STATE, 1).unwrap();
        b.attr_u32(IFLA_BR_FORWARD_DELAY, 1500).unwrap();
        b.attr_u32(IFLA_BR_HELLO_TIME, 200).unwrap();
        b.attr_u32(IFLA_BR_MAX_AGE, 2000).unwrap();
        let bytes = b.finish();
        let info_data: Vec<Attr> = crate::attr::AttrWalker::new(&bytes[32..]).collect_all();

        let iface = stub_interface("br0", 9);
        let bridge = from_interface_and_info(&iface, &info_data, vec![4]);

        assert!(bridge.stp_enabled);
        assert_eq!(bridge.forward_delay_cs, 1500);
        assert_eq!(bridge.hello_time_cs, 200);
        assert_eq!(bridge.max_age_cs, 2000);
        assert_eq!(bridge.members, vec![4]);
    }

    #[test]
    fn from_interface_and_info_defaults_when_info_data_absent() {
        let iface = stub_interface("br0", 9);
        let bridge = from_interface_and_info(&iface, &[], Vec::new());
        assert!(!bridge.stp_enabled);
        assert_eq!(bridge.forward_delay_cs, 0);
    }
}
