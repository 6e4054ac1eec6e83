//! Bond link specialization.

use tracing::info;

use crate::abi::*;
use crate::attr::{self, Attr};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::object::link::{self, Interface, LinkKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondMode {
    BalanceRr,
    ActiveBackup,
    BalanceXor,
    Broadcast,
    Ieee8023ad,
    BalanceTlb,
    BalanceAlb,
}

impl BondMode {
    pub fn as_u8(self) -> u8 {
        match self {
            BondMode::BalanceRr => 0,
            BondMode::ActiveBackup => 1,
            BondMode::BalanceXor => 2,
            BondMode::Broadcast => 3,
            BondMode::Ieee8023ad => 4,
            BondMode::BalanceTlb => 5,
            BondMode::BalanceAlb => 6,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => BondMode::BalanceRr,
            1 => BondMode::ActiveBackup,
            2 => BondMode::BalanceXor,
            3 => BondMode::Broadcast,
            4 => BondMode::Ieee8023ad,
            5 => BondMode::BalanceTlb,
            6 => BondMode::BalanceAlb,
            _ => return None,
        })
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "0" | "balance-rr" => Some(BondMode::BalanceRr),
            "1" | "active-backup" => Some(BondMode::ActiveBackup),
            "2" | "balance-xor" => Some(BondMode::BalanceXor),
            "3" | "broadcast" => Some(BondMode::Broadcast),
            "4" | "802.3ad" => Some(BondMode::Ieee8023ad),
            "5" | "balance-tlb" => Some(BondMode::BalanceTlb),
            "6" | "balance-alb" => Some(BondMode::BalanceAlb),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BondSpec {
    pub name: String,
    pub mode: BondMode,
    pub miimon: u32,
    pub updelay: u32,
    pub downdelay: u32,
    pub xmit_hash_policy: Option<String>,
    pub lacp_rate: Option<String>,
    pub ad_select: Option<String>,
}

impl Default for BondSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            mode: BondMode::BalanceRr,
            miimon: 100,
            updelay: 0,
            downdelay: 0,
            xmit_hash_policy: None,
            lacp_rate: None,
            ad_select: None,
        }
    }
}

#[derive(Clone, Debug)]
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

/// Build a bond from its base [`Interface`] plus the member list the
/// caller has already derived from `IFLA_MASTER` scans of the link list.
pub fn from_interface_and_info(iface: &Interface, info_data: &[Attr], members: Vec<i32>) -> Bond {
    let mode = attr::find(info_data, IFLA_BOND_MODE)
        .and_then(attr::as_u8)
        .and_then(BondMode::from_u8)
        .unwrap_or(BondMode::BalanceRr);
    let miimon = attr::find(info_data, IFLA_BOND_MIIMON).and_then(attr::as_u32).unwrap_or(0);
    let updelay = attr::find(info_data, IFLA_BOND_UPDELAY).and_then(attr::as_u32).unwrap_or(0);
    let downdelay = attr::find(info_data, IFLA_BOND_DOWNDELAY).and_then(attr::as_u32).unwrap_or(0);
    Bond {
        name: iface.name.clone(),
        index: iface.index,
        mode,
        miimon,
        updelay,
        downdelay,
        xmit_hash_policy: None,
        lacp_rate: None,
        ad_select: None,
        members,
    }
}

/// Enumerate every bond link plus its current member set.
pub async fn list(chan: &Channel) -> Result<Vec<Bond>, ChannelError> {
    let ifaces = link::list(chan).await?;
    let bonds: Vec<&Interface> = ifaces.iter().filter(|i| i.link_kind == LinkKind::Bond).collect();
    let mut out = Vec::with_capacity(bonds.len());
    for b in bonds {
        let members: Vec<i32> = ifaces
            .iter()
            .filter(|m| m.master_index == Some(b.index))
            .map(|m| m.index)
            .collect();
        let info = b.info_data.as_deref().map(attr::nested).unwrap_or_default();
        out.push(from_interface_and_info(b, &info, members));
    }
    Ok(out)
}

pub async fn get_by_name(chan: &Channel, name: &str) -> Result<Bond, ChannelError> {
    list(chan)
        .await?
        .into_iter()
        .find(|b| b.name == name)
        .ok_or(ChannelError::Request {
            kind: crate::error::ErrorKind::NotFound,
            source: None,
        })
}

/// Create a bond link with `CREATE|EXCL` semantics.
pub async fn create(chan: &Channel, spec: &BondSpec) -> Result<(), ChannelError> {
    let seq = chan.next_seq();
    let mut b = link::begin_create(&spec.name, seq, chan.pid())?;
    let info = b.begin_nested(IFLA_LINKINFO)?;
    b.attr_str(IFLA_INFO_KIND, "bond")?;
    let data = b.begin_nested(IFLA_INFO_DATA)?;
    b.attr_u8(IFLA_BOND_MODE, spec.mode.as_u8())?;
    b.attr_u32(IFLA_BOND_MIIMON, spec.miimon)?;
    if spec.updelay > 0 {
        b.attr_u32(IFLA_BOND_UPDELAY, spec.updelay)?;
    }
    if spec.downdelay > 0 {
        b.attr_u32(IFLA_BOND_DOWNDELAY, spec.downdelay)?;
    }
    b.end_nested(data)?;
    b.end_nested(info)?;
    chan.request(b.finish(), seq).await?;
    info!(name = %spec.name, mode = spec.mode.as_u8(), "bond created");
    Ok(())
}

pub async fn delete(chan: &Channel, index: i32) -> Result<(), ChannelError> {
    link::delete(chan, index).await
}

/// Modify an existing bond's mode/miimon/delays in place (`RTM_NEWLINK`
/// without `CREATE`/`EXCL`).
pub async fn modify(chan: &Channel, index: i32, spec: &BondSpec) -> Result<(), ChannelError> {
    let seq = chan.next_seq();
    let mut b = link::begin_modify(index, seq, chan.pid())?;
    let info = b.begin_nested(IFLA_LINKINFO)?;
    b.attr_str(IFLA_INFO_KIND, "bond")?;
    let data = b.begin_nested(IFLA_INFO_DATA)?;
    b.attr_u8(IFLA_BOND_MODE, spec.mode.as_u8())?;
    b.attr_u32(IFLA_BOND_MIIMON, spec.miimon)?;
    b.attr_u32(IFLA_BOND_UPDELAY, spec.updelay)?;
    b.attr_u32(IFLA_BOND_DOWNDELAY, spec.downdelay)?;
    b.end_nested(data)?;
    b.end_nested(info)?;
    chan.request(b.finish(), seq).await?;
    info!(index, mode = spec.mode.as_u8(), "bond modified");
    Ok(())
}

/// Attach `member` to `bond` by setting the member's master link.
pub async fn attach_member(chan: &Channel, bond_index: i32, member_index: i32) -> Result<(), ChannelError> {
    link::set_master(chan, member_index, bond_index).await
}

/// Detach a member by clearing its master link (index 0).
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
            link_kind: LinkKind::Bond,
            master_index: None,
            info_data: None,
        }
    }

    #[test]
    fn from_interface_and_info_decodes_mode_and_miimon() {
        let header = NlHeader::request(crate::abi::RTM_NEWLINK, 0, 1, 1);
        let mut b = MessageBuilder::new(BUF_CREATE, header, &[0u8; 16]).unwrap();
        b.attr_u8(IFLA_BOND_MODE, BondMode::Ieee8023ad.as_u8()).unwrap();
        b.attr_u32(IFLA_BOND_MIIMON, 250).unwrap();
        b.attr_u32(IFLA_BOND_UPDELAY, 100).unwrap();
        let bytes = b.finish();
        let info_data: Vec<Attr> = crate::attr::AttrWalker::new(&bytes[32..]).collect_all();

        let iface = stub_interface("bond0", 9);
        let bond = from_interface_and_info(&iface, &info_data, vec![2, 3]);

        assert_eq!(bond.mode, BondMode::Ieee8023ad);
        assert_eq!(bond.miimon, 250);
        assert_eq!(bond.updelay, 100);
        assert_eq!(bond.members, vec![2, 3]);
    }

    #[test]
    fn from_interface_and_info_defaults_when_info_data_absent() {
        let iface = stub_interface("bond0", 9);
        let bond = from_interface_and_info(&iface, &[], Vec::new());
        assert_eq!(bond.mode, BondMode::BalanceRr);
        assert_eq!(bond.miimon, 0);
    }
}
