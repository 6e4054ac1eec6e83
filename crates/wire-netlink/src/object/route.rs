//! Route object class: `RTM_{NEW,DEL,GET}ROUTE`, including multipath
//! (equal-cost) next hops.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::{debug, info};

use crate::abi::*;
use crate::attr::{self, Attr, AttrWalker};
use crate::channel::Channel;
use crate::error::ChannelError;
use crate::message::{MessageBuilder, NlHeader, BUF_DEL, BUF_MULTIPATH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NextHop {
    pub gateway: Option<IpAddr>,
    pub oif_index: i32,
    pub weight: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteSpec {
    pub destination: Option<(IpAddr, u8)>,
    pub hops: Vec<NextHop>,
    pub priority: Option<u32>,
    pub table: u8,
}

impl RouteSpec {
    pub fn family(&self) -> u8 {
        match self.destination.map(|(a, _)| a).or_else(|| self.hops.first().and_then(|h| h.gateway)) {
            Some(IpAddr::V6(_)) => AF_INET6,
            _ => AF_INET,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Route {
    pub destination: Option<(IpAddr, u8)>,
    pub hops: Vec<NextHop>,
    pub priority: Option<u32>,
    pub table: u8,
    pub protocol: u8,
}

/// rtmsg, fixed 12 bytes: family(1) + dst_len(1) + src_len(1) + tos(1)
/// + table(1) + protocol(1) + scope(1) + type(1) + flags(4).
fn rtmsg(family: u8, dst_len: u8, table: u8, protocol: u8, scope: u8, rtype: u8) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0] = family;
    buf[1] = dst_len;
    buf[4] = table;
    buf[5] = protocol;
    buf[6] = scope;
    buf[7] = rtype;
    buf
}

fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn parse_addr(family: u8, raw: &[u8]) -> Option<IpAddr> {
    match family {
        f if f == AF_INET => Some(IpAddr::V4(Ipv4Addr::new(
            *raw.first()?,
            *raw.get(1)?,
            *raw.get(2)?,
            *raw.get(3)?,
        ))),
        f if f == AF_INET6 => {
            let octets: [u8; 16] = raw.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn parse_route(msg: &[u8]) -> Result<Route, ChannelError> {
    if msg.len() < 12 {
        return Err(ChannelError::Malformed("short rtmsg".into()));
    }
    let family = msg[0];
    let dst_len = msg[1];
    let table = msg[4];
    let protocol = msg[5];
    let attrs: Vec<Attr> = AttrWalker::new(&msg[12..]).collect_all();

    let destination = attr::find(&attrs, RTA_DST)
        .and_then(|raw| parse_addr(family, raw))
        .map(|a| (a, dst_len));

    let priority = attr::find(&attrs, RTA_PRIORITY).and_then(attr::as_u32);

    let hops = if let Some(mp) = attr::find(&attrs, RTA_MULTIPATH) {
        parse_multipath(family, mp)
    } else {
        let oif_index = attr::find(&attrs, RTA_OIF).and_then(attr::as_u32).unwrap_or(0) as i32;
        let gateway = attr::find(&attrs, RTA_GATEWAY).and_then(|raw| parse_addr(family, raw));
        if oif_index == 0 && gateway.is_none() {
            Vec::new()
        } else {
            vec![NextHop {
                gateway,
                oif_index,
                weight: 1,
            }]
        }
    };

    Ok(Route {
        destination,
        hops,
        priority,
        table,
        protocol,
    })
}

/// rtnexthop, fixed 8 bytes: length(2) + flags(1) + hops(1) + ifindex(4),
/// followed by nested attributes (RTA_GATEWAY for this hop).
fn parse_multipath(family: u8, buf: &[u8]) -> Vec<NextHop> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 8 <= buf.len() {
        let len = u16::from_ne_bytes(buf[pos..pos + 2].try_into().unwrap()) as usize;
        if len < 8 || pos + len > buf.len() {
            break;
        }
        let weight = buf[pos + 2];
        let oif_index = i32::from_ne_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
        let attrs: Vec<Attr> = AttrWalker::new(&buf[pos + 8..pos + len]).collect_all();
        let gateway = attr::find(&attrs, RTA_GATEWAY).and_then(|raw| parse_addr(family, raw));
        out.push(NextHop {
            gateway,
            oif_index,
            weight: weight.saturating_add(1),
        });
        pos += len;
    }
    out
}

pub async fn list(chan: &Channel) -> Result<Vec<Route>, ChannelError> {
    let seq = chan.next_seq();
    let header = NlHeader::dump(RTM_GETROUTE, seq, chan.pid());
    let payload = rtmsg(AF_UNSPEC, 0, 0, 0, 0, 0);
    let built = MessageBuilder::new(BUF_DEL, header, &payload)?.finish();
    let reply = chan.request(built, seq).await?;
    reply
        .messages
        .iter()
        .map(|m| parse_route(m))
        .collect::<Result<Vec<_>, _>>()
        .map(|routes| routes.into_iter().filter(|r| r.protocol != 0).collect())
}

fn build_for(chan: &Channel, spec: &RouteSpec, extra_flags: u16, rtype: u8) -> Result<(MessageBuilder, u32), ChannelError> {
    let seq = chan.next_seq();
    let family = spec.family();
    let (dst, dst_len) = spec.destination.unzip();
    let header = NlHeader::request(RTM_NEWROUTE, extra_flags, seq, chan.pid()).acked();
    let payload = rtmsg(
        family,
        dst_len.unwrap_or(0),
        spec.table,
        RTPROT_BOOT,
        RT_SCOPE_UNIVERSE,
        rtype,
    );
    let mut b = MessageBuilder::new(BUF_MULTIPATH, header, &payload)?;
    if let Some(dst) = dst {
        b.attr(RTA_DST, &addr_bytes(dst))?;
    }
    if let Some(priority) = spec.priority {
        b.attr_u32(RTA_PRIORITY, priority)?;
    }
    match spec.hops.as_slice() {
        [] => {}
        [single] => {
            b.attr_u32(RTA_OIF, single.oif_index as u32)?;
            if let Some(gw) = single.gateway {
                b.attr(RTA_GATEWAY, &addr_bytes(gw))?;
            }
        }
        many => {
            let mp = b.begin_nested(RTA_MULTIPATH)?;
            for hop in many {
                let rtnh_start = b.len();
                let mut rtnh = vec![0u8; 8];
                rtnh[2] = hop.weight.saturating_sub(1);
                rtnh[4..8].copy_from_slice(&hop.oif_index.to_ne_bytes());
                b.raw(&rtnh)?;
                if let Some(gw) = hop.gateway {
                    b.attr(RTA_GATEWAY, &addr_bytes(gw))?;
                }
                let rtnh_len = (b.len() - rtnh_start) as u16;
                b.patch_u16(rtnh_start, rtnh_len);
            }
            b.end_nested(mp)?;
        }
    }
    Ok((b, seq))
}

/// Create a route with `CREATE|EXCL` semantics.
pub async fn add(chan: &Channel, spec: &RouteSpec) -> Result<(), ChannelError> {
    debug!(?spec.destination, hops = spec.hops.len(), "adding route");
    let (b, seq) = build_for(chan, spec, NLM_F_CREATE | NLM_F_EXCL, RTN_UNICAST)?;
    chan.request(b.finish(), seq).await?;
    info!(?spec.destination, hops = spec.hops.len(), "route added");
    Ok(())
}

/// Remove a route. `ESRCH` is treated by the reconciler, not here, as
/// idempotent success.
pub async fn remove(chan: &Channel, spec: &RouteSpec) -> Result<(), ChannelError> {
    debug!(?spec.destination, "removing route");
    let seq = chan.next_seq();
    let family = spec.family();
    let (dst, dst_len) = spec.destination.unzip();
    let header = NlHeader::request(RTM_DELROUTE, 0, seq, chan.pid()).acked();
    let payload = rtmsg(family, dst_len.unwrap_or(0), spec.table, 0, RT_SCOPE_UNIVERSE, RTN_UNICAST);
    let mut b = MessageBuilder::new(BUF_DEL, header, &payload)?;
    if let Some(dst) = dst {
        b.attr(RTA_DST, &addr_bytes(dst))?;
    }
    if let Some(hop) = spec.hops.first() {
        b.attr_u32(RTA_OIF, hop.oif_index as u32)?;
    }
    chan.request(b.finish(), seq).await?;
    info!(?spec.destination, "route removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_defaults_to_v4_for_default_route_with_v4_gateway() {
        let spec = RouteSpec {
            destination: None,
            hops: vec![NextHop {
                gateway: Some("192.0.2.1".parse().unwrap()),
                oif_index: 3,
                weight: 1,
            }],
            priority: None,
            table: RT_TABLE_MAIN,
        };
        assert_eq!(spec.family(), AF_INET);
    }

    #[test]
    fn family_follows_v6_destination() {
        let spec = RouteSpec {
            destination: Some(("2001:db8::".parse().unwrap(), 32)),
            hops: vec![],
            priority: None,
            table: RT_TABLE_MAIN,
        };
        assert_eq!(spec.family(), AF_INET6);
    }

    #[test]
    fn multipath_round_trip_through_builder_and_walker() {
        let spec = RouteSpec {
            destination: Some(("198.51.100.0".parse().unwrap(), 24)),
            hops: vec![
                NextHop { gateway: Some("192.0.2.1".parse().unwrap()), oif_index: 3, weight: 1 },
                NextHop { gateway: Some("192.0.2.2".parse().unwrap()), oif_index: 4, weight: 2 },
            ],
            priority: None,
            table: RT_TABLE_MAIN,
        };
        let header = NlHeader::request(RTM_NEWROUTE, 0, 1, 1);
        let payload = rtmsg(AF_INET, 24, RT_TABLE_MAIN, RTPROT_BOOT, RT_SCOPE_UNIVERSE, RTN_UNICAST);
        let mut b = MessageBuilder::new(BUF_MULTIPATH, header, &payload).unwrap();
        b.attr(RTA_DST, &addr_bytes(spec.destination.unwrap().0)).unwrap();
        let mp = b.begin_nested(RTA_MULTIPATH).unwrap();
        for hop in &spec.hops {
            let rtnh_start = b.len();
            let mut rtnh = vec![0u8; 8];
            rtnh[2] = hop.weight.saturating_sub(1);
            rtnh[4..8].copy_from_slice(&hop.oif_index.to_ne_bytes());
            b.raw(&rtnh).unwrap();
            b.attr(RTA_GATEWAY, &addr_bytes(hop.gateway.unwrap())).unwrap();
            let rtnh_len = (b.len() - rtnh_start) as u16;
            b.patch_u16(rtnh_start, rtnh_len);
        }
        b.end_nested(mp).unwrap();
        let bytes = b.finish();

        let parsed = parse_route(&bytes[16..]).unwrap();
        assert_eq!(parsed.hops.len(), 2);
        assert_eq!(parsed.hops[0].oif_index, 3);
        assert_eq!(parsed.hops[1].oif_index, 4);
        assert_eq!(parsed.hops[1].weight, 2);
    }
}
