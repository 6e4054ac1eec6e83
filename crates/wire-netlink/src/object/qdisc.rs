//! Queueing discipline table, read-only: wire reports the qdisc
//! attached to each link in status output but never configures traffic
//! control itself.

use crate::abi::*;
use crate::attr::{self, Attr, AttrWalker};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{MessageBuilder, NlHeader, BUF_DEL};

#[derive(Clone, Debug)]
pub struct Qdisc {
    pub link_index: i32,
    pub kind: String,
    pub handle: u32,
}

/// tcmsg, fixed 20 bytes: family(1) + pad(3) + index(4) + handle(4) +
/// parent(4) + info(4).
fn tcmsg(index: i32) -> [u8; 20] {
    let mut buf = [0u8; 20];
    buf[4..8].copy_from_slice(&index.to_ne_bytes());
    buf
}

fn parse_qdisc(msg: &[u8]) -> Result<Qdisc, ChannelError> {
    if msg.len() < 20 {
        return Err(ChannelError::Malformed("short tcmsg".into()));
    }
    let index = i32::from_ne_bytes(msg[4..8].try_into().unwrap());
    let handle = u32::from_ne_bytes(msg[8..12].try_into().unwrap());
    let attrs: Vec<Attr> = AttrWalker::new(&msg[20..]).collect_all();

    const TCA_KIND: u16 = 1;
    let kind = attr::find(&attrs, TCA_KIND)
        .and_then(attr::as_cstr)
        .unwrap_or("unknown")
        .to_string();

    Ok(Qdisc {
        link_index: index,
        kind,
        handle,
    })
}

pub async fn list(chan: &Channel) -> Result<Vec<Qdisc>, ChannelError> {
    let seq = chan.next_seq();
    let header = NlHeader::dump(RTM_GETQDISC, seq, chan.pid());
    let payload = tcmsg(0);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    let reply = chan.request(built, seq).await?;
    reply.messages.iter().map(|m| parse_qdisc(m)).collect()
}
