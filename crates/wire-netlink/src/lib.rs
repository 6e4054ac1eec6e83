//! Netlink control-plane abstraction: the kernel channel, the hand-rolled
//! TLV message builder/walker, and the typed object layer built on top
//! of them (links, bonds, bridges, VLANs, veth pairs, addresses, routes,
//! plus read-only neighbor/rule/qdisc enumeration).

pub mod abi;
pub mod attr;
pub mod channel;
pub mod error;
pub mod message;
pub mod object;

pub use channel::{ChangeEvent, Channel, Group, Reply};
pub use error::{ChannelError, ErrorKind};
pub use message::{BuildError, MessageBuilder, NlHeader};
