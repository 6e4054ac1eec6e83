//! Neighbor (ARP/NDP) table, read-only: wire reports neighbor state in
//! status output but never manages neighbor entries itself.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::abi::*;
use crate::attr::{self, Attr, AttrWalker};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{MessageBuilder, NlHeader, BUF_DEL};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeighborState {
    Reachable,
    Stale,
    Failed,
    Permanent,
    Other(u16),
}

impl NeighborState {
    fn from_ndm_state(state: u16) -> Self {
        match state {
            0x02 => NeighborState::Reachable,
            0x04 => NeighborState::Stale,
            0x20 => NeighborState::Failed,
            0x80 => NeighborState::Permanent,
            other => NeighborState::Other(other),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Neighbor {
    pub link_index: i32,
    pub address: IpAddr,
    pub mac: Option<[u8; 6]>,
    pub state: NeighborState,
}

/// ndmsg, fixed 12 bytes: family(1) + pad(3) + index(4) + state(2) +
/// flags(1) + ntype(1).
fn ndmsg(family: u8, index: i32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0] = family;
    buf[4..8].copy_from_slice(&index.to_ne_bytes());
    buf
}

fn parse_neighbor(msg: &[u8]) -> Result<Neighbor, ChannelError> {
    if msg.len() < 12 {
        return Err(ChannelError::Malformed("short ndmsg".into()));
    }
    let family = msg[0];
    let index = i32::from_ne_bytes(msg[4..8].try_into().unwrap());
    let state = u16::from_ne_bytes(msg[8..10].try_into().unwrap());
    let attrs: Vec<Attr> = AttrWalker::new(&msg[12..]).collect_all();

    const NDA_DST: u16 = 1;
    const NDA_LLADDR: u16 = 2;

    let raw = attr::find(&attrs, NDA_DST).ok_or_else(|| ChannelError::Malformed("neighbor reply missing NDA_DST".into()))?;
    let address = match family {
        f if f == AF_INET => IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
        f if f == AF_INET6 => {
            let octets: [u8; 16] = raw.try_into().map_err(|_| ChannelError::Malformed("short ipv6 neighbor".into()))?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => return Err(ChannelError::Malformed(format!("unknown neighbor family {other}"))),
    };
    let mac = attr::find(&attrs, NDA_LLADDR).and_then(|v| <[u8; 6]>::try_from(v).ok());

    Ok(Neighbor {
        link_index: index,
        address,
        mac,
        state: NeighborState::from_ndm_state(state),
    })
}

pub async fn list(chan: &Channel) -> Result<Vec<Neighbor>, ChannelError> {
    let seq = chan.next_seq();
    let header = NlHeader::dump(RTM_GETNEIGH, seq, chan.pid());
    let payload = ndmsg(AF_UNSPEC, 0);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    let reply = chan.request(built, seq).await?;
    reply.messages.iter().map(|m| parse_neighbor(m)).collect()
}
