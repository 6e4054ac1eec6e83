//! Typed object layer: one module per rtnetlink object class, each
//! exposing `list`/`get_by_name`/`create`/`delete`/... built on
//! [`crate::channel::Channel`] and [`crate::message::MessageBuilder`].

pub mod address;
pub mod bond;
pub mod bridge;
pub mod link;
pub mod neighbor;
pub mod qdisc;
pub mod route;
pub mod rule;
pub mod vlan;
pub mod veth;
