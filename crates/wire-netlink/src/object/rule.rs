//! Policy routing rule table, read-only: wire reports rules in status
//! output but never creates or deletes them.

use crate::abi::*;
use crate::attr::{self, Attr, AttrWalker};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{MessageBuilder, NlHeader, BUF_DEL};

#[derive(Clone, Debug)]
pub struct Rule {
    pub family: u8,
    pub priority: u32,
    pub table: u8,
}

/// fib_rule_hdr, fixed 12 bytes: family(1) + dst_len(1) + src_len(1)
/// + tos(1) + table(1) + res1(1) + res2(1) + action(1) + flags(4).
fn fib_rule_hdr(family: u8) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0] = family;
    buf
}

fn parse_rule(msg: &[u8]) -> Result<Rule, ChannelError> {
    if msg.len() < 12 {
        return Err(ChannelError::Malformed("short fib_rule_hdr".into()));
    }
    let family = msg[0];
    let table = msg[4];
    let attrs: Vec<Attr> = AttrWalker::new(&msg[12..]).collect_all();

    const FRA_PRIORITY: u16 = 6;
    let priority = attr::find(&attrs, FRA_PRIORITY).and_then(attr::as_u32).unwrap_or(0);

    Ok(Rule { family, priority, table })
}

pub async fn list(chan: &Channel) -> Result<Vec<Rule>, ChannelError> {
    let mut out = Vec::new();
    for family in [AF_INET, AF_INET6] {
        let seq = chan.next_seq();
        let header = NlHeader::dump(RTM_GETRULE, seq, chan.pid());
        let payload = fib_rule_hdr(family);
        let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
        let reply = chan.request(built, seq).await?;
        for m in &reply.messages {
            out.push(parse_rule(m)?);
        }
    }
    Ok(out)
}
