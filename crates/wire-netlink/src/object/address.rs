//! Address object class: `RTM_{NEW,DEL,GET}ADDR`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::{debug, info};

use crate::abi::*;
use crate::attr::{self, Attr, AttrWalker};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{MessageBuilder, NlHeader, BUF_DEL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CidrAddress {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl CidrAddress {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    pub fn family(&self) -> u8 {
        match self.addr {
            IpAddr::V4(_) => AF_INET,
            IpAddr::V6(_) => AF_INET6,
        }
    }

    /// Parse `"192.0.2.1/24"`-style notation.
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, plen) = s.split_once('/')?;
        Some(Self {
            addr: addr.parse().ok()?,
            prefix_len: plen.parse().ok()?,
        })
    }
}

impl std::fmt::Display for CidrAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

#[derive(Clone, Debug)]
pub struct Address {
    pub link_index: i32,
    pub cidr: CidrAddress,
    pub label: Option<String>,
}

/// ifaddrmsg, fixed 8 bytes: family(1) + prefixlen(1) + flags(1) + scope(1)
/// + index(4).
fn ifaddrmsg(family: u8, prefix_len: u8, index: i32) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0] = family;
    buf[1] = prefix_len;
    buf[4..8].copy_from_slice(&index.to_ne_bytes());
    buf
}

fn parse_address(msg: &[u8], link_index_hint: i32) -> Result<Address, ChannelError> {
    if msg.len() < 8 {
        return Err(ChannelError::Malformed("short ifaddrmsg".into()));
    }
    let family = msg[0];
    let prefix_len = msg[1];
    let index = i32::from_ne_bytes(msg[4..8].try_into().unwrap());
    let attrs: Vec<Attr> = AttrWalker::new(&msg[8..]).collect_all();

    let raw = attr::find(&attrs, IFA_LOCAL)
        .or_else(|| attr::find(&attrs, IFA_ADDRESS))
        .ok_or_else(|| ChannelError::Malformed("address reply missing IFA_LOCAL/IFA_ADDRESS".into()))?;
    let addr = match family {
        f if f == AF_INET => IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
        f if f == AF_INET6 => {
            let octets: [u8; 16] = raw.try_into().map_err(|_| ChannelError::Malformed("short ipv6 address".into()))?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(ChannelError::Malformed(format!("unknown address family {other}"))),
    };
    let label = attr::find(&attrs, IFA_LABEL).and_then(attr::as_cstr).map(str::to_string);

    Ok(Address {
        link_index: if index != 0 { index } else { link_index_hint },
        cidr: CidrAddress::new(addr, prefix_len),
        label,
    })
}

/// List every address on every link (`RTM_GETADDR` dump, `AF_UNSPEC`).
pub async fn list(chan: &Channel) -> Result<Vec<Address>, ChannelError> {
    let seq = chan.next_seq();
    let header = NlHeader::dump(RTM_GETADDR, seq, chan.pid());
    let payload = ifaddrmsg(AF_UNSPEC, 0, 0);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    let reply = chan.request(built, seq).await?;
    reply.messages.iter().map(|m| parse_address(m, 0)).collect()
}

pub async fn list_for_link(chan: &Channel, link_index: i32) -> Result<Vec<Address>, ChannelError> {
    Ok(list(chan).await?.into_iter().filter(|a| a.link_index == link_index).collect())
}

/// Add an address to a link (`CREATE|EXCL`). Kernel NACKs with
/// `EEXIST` if the exact address/prefix pair is already present.
pub async fn add(chan: &Channel, link_index: i32, cidr: CidrAddress) -> Result<(), ChannelError> {
    debug!(link_index, %cidr, "adding address");
    let seq = chan.next_seq();
    let header = NlHeader::request(RTM_NEWADDR, NLM_F_CREATE | NLM_F_EXCL, seq, chan.pid()).acked();
    let payload = ifaddrmsg(cidr.family(), cidr.prefix_len, link_index);
    let mut b = MessageBuilder::new(BUF_DEL, header, &payload)?;
    match cidr.addr {
        IpAddr::V4(v4) => {
            b.attr(IFA_LOCAL, &v4.octets())?;
            b.attr(IFA_ADDRESS, &v4.octets())?;
        }
        IpAddr::V6(v6) => {
            b.attr(IFA_LOCAL, &v6.octets())?;
            b.attr(IFA_ADDRESS, &v6.octets())?;
        }
    }
    chan.request(b.finish(), seq).await?;
    info!(link_index, %cidr, "address added");
    Ok(())
}

/// Remove an address from a link. `ENODEV`/`EADDRNOTAVAIL` are treated
/// by the reconciler, not here, as idempotent success.
pub async fn remove(chan: &Channel, link_index: i32, cidr: CidrAddress) -> Result<(), ChannelError> {
    debug!(link_index, %cidr, "removing address");
    let seq = chan.next_seq();
    let header = NlHeader::request(RTM_DELADDR, 0, seq, chan.pid()).acked();
    let payload = ifaddrmsg(cidr.family(), cidr.prefix_len, link_index);
    let mut b = MessageBuilder::new(BUF_DEL, header, &payload)?;
    match cidr.addr {
        IpAddr::V4(v4) => b.attr(IFA_LOCAL, &v4.octets())?,
        IpAddr::V6(v6) => b.attr(IFA_LOCAL, &v6.octets())?,
    };
    chan.request(b.finish(), seq).await?;
    info!(link_index, %cidr, "address removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_parses_v4_and_v6() {
        let v4 = CidrAddress::parse("192.0.2.1/24").unwrap();
        assert_eq!(v4.prefix_len, 24);
        assert_eq!(v4.family(), AF_INET);

        let v6 = CidrAddress::parse("2001:db8::1/64").unwrap();
        assert_eq!(v6.prefix_len, 64);
        assert_eq!(v6.family(), AF_INET6);
    }

    #[test]
    fn cidr_rejects_malformed_input() {
        assert!(CidrAddress::parse("not-an-address").is_none());
        assert!(CidrAddress::parse("192.0.2.1").is_none());
        assert!(CidrAddress::parse("192.0.2.1/abc").is_none());
    }

    #[test]
    fn display_round_trips_parse() {
        let c = CidrAddress::parse("10.0.0.5/8").unwrap();
        assert_eq!(c.to_string(), "10.0.0.5/8");
    }
}
