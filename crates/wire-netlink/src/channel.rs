//! Kernel control-plane channel: a `NETLINK_ROUTE` socket, framed
//! request/reply, and multicast event draining.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, NativeEndian};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace, warn};

use crate::abi::{
    NLMSG_DONE, NLMSG_ERROR, NLMSG_NOOP, NLM_F_MULTI, RTNLGRP_IPV4_IFADDR, RTNLGRP_IPV4_ROUTE,
    RTNLGRP_IPV4_RULE, RTNLGRP_IPV6_IFADDR, RTNLGRP_IPV6_ROUTE, RTNLGRP_IPV6_RULE, RTNLGRP_LINK,
    RTNLGRP_NEIGH,
};
use crate::error::{ChannelError, ErrorKind};
use crate::message::BUF_RECV;

/// Multicast change groups a caller can subscribe to on [`Channel::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Group {
    Link,
    Ipv4Addr,
    Ipv6Addr,
    Ipv4Route,
    Ipv6Route,
    Neighbor,
    Rule,
}

impl Group {
    fn bit(self) -> u32 {
        let group_number = match self {
            Group::Link => RTNLGRP_LINK,
            Group::Ipv4Addr => RTNLGRP_IPV4_IFADDR,
            Group::Ipv6Addr => RTNLGRP_IPV6_IFADDR,
            Group::Ipv4Route => RTNLGRP_IPV4_ROUTE,
            Group::Ipv6Route => RTNLGRP_IPV6_ROUTE,
            Group::Neighbor => RTNLGRP_NEIGH,
            Group::Rule => RTNLGRP_IPV4_RULE | RTNLGRP_IPV6_RULE,
        };
        // rtnetlink groups are bit numbers, not bit positions already shifted,
        // except Rule above which or's two positions together.
        if self == Group::Rule {
            (1u32 << (RTNLGRP_IPV4_RULE - 1)) | (1u32 << (RTNLGRP_IPV6_RULE - 1))
        } else {
            1u32 << (group_number - 1)
        }
    }
}

/// A decoded multicast change notification, handed to the bound handler
/// from [`Channel::poll`].
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub msg_type: u16,
    pub payload: Vec<u8>,
}

/// One multipart or single-message reply.
pub struct Reply {
    /// Concatenated payload bytes of every non-error/non-done message in
    /// the reply, in arrival order (each still framed with its own
    /// fixed struct + attributes; callers use [`crate::attr`] to decode).
    pub messages: Vec<Vec<u8>>,
}

/// The kernel control-plane channel. One instance is used from one task
/// at a time; `request` serializes internally so a caller never needs to
/// hold an external lock.
pub struct Channel {
    socket: Arc<Socket>,
    seq: AtomicU32,
    pid: u32,
    lock: AsyncMutex<()>,
}

impl Channel {
    /// Open a netlink route socket, optionally joining multicast groups.
    pub fn open(groups: HashSet<Group>) -> Result<Self, ChannelError> {
        let mut socket = Socket::new(NETLINK_ROUTE).map_err(ChannelError::Open)?;
        let group_mask = groups.iter().fold(0u32, |acc, g| acc | g.bit());
        let pid = std::process::id();
        socket
            .bind(&SocketAddr::new(0, group_mask))
            .map_err(ChannelError::Open)?;
        let local = socket.address().map_err(ChannelError::Open)?;
        debug!(pid = local.port_number(), groups = group_mask, "opened kernel channel");

        Ok(Self {
            socket: Arc::new(socket),
            seq: AtomicU32::new(1),
            pid,
            lock: AsyncMutex::new(()),
        })
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send a fully built request and collect its reply, reassembling a
    /// multipart dump into a single [`Reply`].
    pub async fn request(&self, built: Vec<u8>, seq: u32) -> Result<Reply, ChannelError> {
        let _serialize = self.lock.lock().await;
        let socket = Arc::clone(&self.socket);

        tokio::task::spawn_blocking(move || Self::request_blocking(&socket, &built, seq))
            .await
            .map_err(|join_err| ChannelError::Io(io::Error::other(join_err)))?
    }

    fn request_blocking(socket: &Socket, built: &[u8], seq: u32) -> Result<Reply, ChannelError> {
        socket.send(built, 0).map_err(ChannelError::Io)?;

        let mut messages = Vec::new();
        let mut recv_buf = vec![0u8; BUF_RECV];
        loop {
            let n = socket.recv(&mut recv_buf, 0).map_err(ChannelError::Io)?;
            let mut frames = &recv_buf[..n];
            loop {
                if frames.len() < 16 {
                    break;
                }
                let len = NativeEndian::read_u32(&frames[0..4]) as usize;
                let msg_type = NativeEndian::read_u16(&frames[4..6]);
                let flags = NativeEndian::read_u16(&frames[6..8]);
                let msg_seq = NativeEndian::read_u32(&frames[8..12]);
                if len < 16 || len > frames.len() {
                    return Err(ChannelError::Malformed(format!(
                        "frame length {len} out of range"
                    )));
                }
                if msg_seq != seq {
                    trace!(expected = seq, got = msg_seq, "ignoring unrelated reply");
                    frames = &frames[align4(len)..];
                    continue;
                }

                let payload = &frames[16..len];
                match msg_type {
                    NLMSG_NOOP => {}
                    NLMSG_ERROR => {
                        let code = payload
                            .get(0..4)
                            .map(|b| NativeEndian::read_i32(b))
                            .ok_or_else(|| ChannelError::Malformed("truncated nlmsgerr".into()))?;
                        if code == 0 {
                            return Ok(Reply { messages });
                        }
                        return Err(ChannelError::Request {
                            kind: ErrorKind::from_errno(code),
                            source: Some(io::Error::from_raw_os_error(-code)),
                        });
                    }
                    NLMSG_DONE => {
                        return Ok(Reply { messages });
                    }
                    _ => {
                        messages.push(payload.to_vec());
                        if flags & NLM_F_MULTI == 0 {
                            return Ok(Reply { messages });
                        }
                    }
                }
                frames = &frames[align4(len)..];
            }
        }
    }

    /// Drain up to `max` pending multicast events with a bounded wait,
    /// dispatching each to `handler`. Returns the number drained.
    pub async fn poll<F>(&self, timeout: std::time::Duration, max: usize, mut handler: F) -> usize
    where
        F: FnMut(ChangeEvent),
    {
        let socket = Arc::clone(&self.socket);
        let events = tokio::task::spawn_blocking(move || Self::poll_blocking(&socket, timeout, max))
            .await
            .unwrap_or_else(|e| {
                warn!("event poll task panicked: {e}");
                Vec::new()
            });
        let count = events.len();
        for ev in events {
            handler(ev);
        }
        count
    }

    fn poll_blocking(socket: &Socket, timeout: std::time::Duration, max: usize) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        if socket.set_rx_timeout(Some(timeout)).is_err() {
            warn!("failed to set netlink recv timeout; poll may block");
        }
        let mut buf = vec![0u8; BUF_RECV];
        while out.len() < max {
            let n = match socket.recv(&mut buf, 0) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                    break
                }
                Err(e) => {
                    warn!("error polling kernel channel: {e}");
                    break;
                }
            };
            let mut frames = &buf[..n];
            while frames.len() >= 16 && out.len() < max {
                let len = NativeEndian::read_u32(&frames[0..4]) as usize;
                if len < 16 || len > frames.len() {
                    break;
                }
                let msg_type = NativeEndian::read_u16(&frames[4..6]);
                if !matches!(msg_type, NLMSG_NOOP | NLMSG_ERROR | NLMSG_DONE) {
                    out.push(ChangeEvent {
                        msg_type,
                        payload: frames[16..len].to_vec(),
                    });
                }
                frames = &frames[align4(len)..];
            }
        }
        out
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_group_ors_both_address_families() {
        let bits = Group::Rule.bit();
        assert_eq!(bits & (1 << (RTNLGRP_IPV4_RULE - 1)), 1 << (RTNLGRP_IPV4_RULE - 1));
        assert_eq!(bits & (1 << (RTNLGRP_IPV6_RULE - 1)), 1 << (RTNLGRP_IPV6_RULE - 1));
    }
}
