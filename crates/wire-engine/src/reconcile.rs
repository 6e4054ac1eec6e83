//! Reconciler (component H): applies an ordered change list through the
//! typed object layer, with bounded retries on transient kernel errors
//! and idempotent treatment of `AlreadyExists`/`NotFound`.

use std::time::{Duration, Instant, SystemTime};

use tracing::{info, warn};
use wire_model::state::NetworkState;
use wire_netlink::object::{address, bond, bridge, link, route, veth, vlan};
use wire_netlink::object::address::CidrAddress;
use wire_netlink::object::bond::BondSpec;
use wire_netlink::object::bridge::BridgeSpec;
use wire_netlink::object::route::{NextHop, RouteSpec};
use wire_netlink::object::veth::VethSpec;
use wire_netlink::{Channel, ChannelError, ErrorKind};

use crate::diff::Change;

#[derive(Clone, Copy, Debug)]
pub struct ReconcilePolicy {
    pub stop_on_error: bool,
    pub dry_run: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            dry_run: false,
            max_retries: 3,
            retry_delay_ms: 200,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReconcileResult {
    pub success: bool,
    pub error: Option<String>,
    pub change: Change,
}

#[derive(Clone, Debug)]
pub struct ReconcileStats {
    pub total: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub results: Vec<ReconcileResult>,
}

/// Whether a create/delete outcome of `kind` should be upgraded to
/// success per the idempotence policy of §4.H/§9.
fn is_idempotent(kind: ErrorKind, op: Op) -> bool {
    matches!(
        (kind, op),
        (ErrorKind::AlreadyExists, Op::Create) | (ErrorKind::NotFound, Op::Delete)
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Create,
    Delete,
    Modify,
}

/// Resolve an interface name to its live kernel-assigned index "at the
/// moment of application" (§4.H.3): desired-state indices may still be
/// synthesized placeholders for objects this same batch is creating.
async fn resolve_live_index(chan: &Channel, name: &str) -> Result<i32, ChannelError> {
    link::get_by_name(chan, name).await.map(|i| i.index)
}

pub async fn reconcile(
    chan: &Channel,
    desired: &NetworkState,
    changes: Vec<Change>,
    policy: &ReconcilePolicy,
) -> ReconcileStats {
    let start_time = SystemTime::now();
    let total = changes.len();
    let mut results = Vec::with_capacity(total);
    let mut applied = 0;
    let mut failed = 0;
    let mut skipped = 0;
    let mut last_up: Option<(String, Instant)> = None;

    for change in changes {
        if policy.dry_run {
            results.push(ReconcileResult {
                success: true,
                error: None,
                change,
            });
            applied += 1;
            continue;
        }

        if let (Some(target), Some((last_name, at))) = (change.subject_name(), &last_up) {
            if target == last_name {
                let settle = Duration::from_millis(200);
                let elapsed = at.elapsed();
                if elapsed < settle {
                    tokio::time::sleep(settle - elapsed).await;
                }
            }
        }

        let outcome = apply_one(chan, desired, &change, policy).await;
        match outcome {
            Ok(raised_up) => {
                if let Some(name) = raised_up {
                    last_up = Some((name, Instant::now()));
                }
                info!(change = ?change, "change applied");
                applied += 1;
                results.push(ReconcileResult {
                    success: true,
                    error: None,
                    change,
                });
            }
            Err(e) => {
                warn!(change = ?change, error = %e, "change failed");
                failed += 1;
                let stop_on_error = policy.stop_on_error;
                results.push(ReconcileResult {
                    success: false,
                    error: Some(e.to_string()),
                    change,
                });
                if stop_on_error {
                    skipped = total - results.len();
                    break;
                }
            }
        }
    }

    ReconcileStats {
        total,
        applied,
        failed,
        skipped,
        start_time,
        end_time: SystemTime::now(),
        results,
    }
}

/// Apply a single change, retrying transient kernel errors up to
/// `policy.max_retries`. Returns `Ok(Some(name))` when the change raised
/// an interface's UP flag, so the caller can apply the post-UP settle
/// delay before the next change on that same interface.
async fn apply_one(
    chan: &Channel,
    desired: &NetworkState,
    change: &Change,
    policy: &ReconcilePolicy,
) -> Result<Option<String>, ChannelError> {
    let mut attempt = 0;
    loop {
        let result = apply_once(chan, desired, change).await;
        match result {
            Ok(raised_up) => return Ok(raised_up),
            Err(ChannelError::Request { kind, .. }) if is_idempotent(kind, op_of(change)) => {
                return Ok(None);
            }
            Err(ChannelError::Request { kind, source }) if kind.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(attempt, kind = %kind, "retrying change after transient kernel error");
                tokio::time::sleep(Duration::from_millis(policy.retry_delay_ms)).await;
                let _ = source;
            }
            Err(e) => return Err(e),
        }
    }
}

fn op_of(change: &Change) -> Op {
    match change {
        Change::BondAdd(_) | Change::BridgeAdd(_) | Change::VlanAdd(_) | Change::VethAdd(_) | Change::AddressAdd(_) | Change::RouteAdd(_) => {
            Op::Create
        }
        Change::BondRemove(_)
        | Change::BridgeRemove(_)
        | Change::VlanRemove(_)
        | Change::VethRemove(_)
        | Change::AddressRemove(_)
        | Change::RouteRemove(_)
        | Change::BondMemberRemove { .. }
        | Change::BridgeMemberRemove { .. } => Op::Delete,
        Change::BondModify { .. }
        | Change::BridgeModify { .. }
        | Change::BondMemberAdd { .. }
        | Change::BridgeMemberAdd { .. }
        | Change::InterfaceModify { .. } => Op::Modify,
    }
}

async fn apply_once(chan: &Channel, desired: &NetworkState, change: &Change) -> Result<Option<String>, ChannelError> {
    match change {
        Change::BondAdd(b) => {
            bond::create(
                chan,
                &BondSpec {
                    name: b.name.clone(),
                    mode: b.mode,
                    miimon: b.miimon,
                    updelay: b.updelay,
                    downdelay: b.downdelay,
                    xmit_hash_policy: b.xmit_hash_policy.clone(),
                    lacp_rate: b.lacp_rate.clone(),
                    ad_select: b.ad_select.clone(),
                },
            )
            .await?;
            Ok(None)
        }
        Change::BondRemove(b) => {
            bond::delete(chan, b.index).await?;
            Ok(None)
        }
        Change::BondModify { name, new, .. } => {
            let index = resolve_live_index(chan, name).await?;
            bond::modify(
                chan,
                index,
                &BondSpec {
                    name: name.clone(),
                    mode: new.mode,
                    miimon: new.miimon,
                    updelay: new.updelay,
                    downdelay: new.downdelay,
                    xmit_hash_policy: new.xmit_hash_policy.clone(),
                    lacp_rate: new.lacp_rate.clone(),
                    ad_select: new.ad_select.clone(),
                },
            )
            .await?;
            Ok(None)
        }
        Change::BondMemberAdd { bond: bond_name, member } => {
            let bond_index = resolve_live_index(chan, bond_name).await?;
            let member_index = resolve_live_index(chan, member).await?;
            bond::attach_member(chan, bond_index, member_index).await?;
            Ok(None)
        }
        Change::BondMemberRemove { member, .. } => {
            let member_index = resolve_live_index(chan, member).await?;
            bond::detach_member(chan, member_index).await?;
            Ok(None)
        }

        Change::BridgeAdd(br) => {
            bridge::create(
                chan,
                &BridgeSpec {
                    name: br.name.clone(),
                    stp_enabled: br.stp_enabled,
                    forward_delay_cs: br.forward_delay,
                    hello_time_cs: br.hello_time,
                    max_age_cs: br.max_age,
                },
            )
            .await?;
            Ok(None)
        }
        Change::BridgeRemove(br) => {
            bridge::delete(chan, br.index).await?;
            Ok(None)
        }
        Change::BridgeModify { name, new, .. } => {
            let index = resolve_live_index(chan, name).await?;
            bridge::modify(
                chan,
                index,
                &BridgeSpec {
                    name: name.clone(),
                    stp_enabled: new.stp_enabled,
                    forward_delay_cs: new.forward_delay,
                    hello_time_cs: new.hello_time,
                    max_age_cs: new.max_age,
                },
            )
            .await?;
            Ok(None)
        }
        Change::BridgeMemberAdd { bridge: bridge_name, member } => {
            let bridge_index = resolve_live_index(chan, bridge_name).await?;
            let member_index = resolve_live_index(chan, member).await?;
            bridge::attach_member(chan, bridge_index, member_index).await?;
            Ok(None)
        }
        Change::BridgeMemberRemove { member, .. } => {
            let member_index = resolve_live_index(chan, member).await?;
            bridge::detach_member(chan, member_index).await?;
            Ok(None)
        }

        // VLAN creation during reconciliation is deliberately
        // unimplemented (§9 open questions): resolving the parent's
        // name from a synthesized `parent_index` requires the desired
        // state the diff was computed against, which the daemon's
        // drift-correction path does not thread through uniformly.
        // Preserved as a recorded failure rather than guessed at.
        Change::VlanAdd(v) => Err(ChannelError::Request {
            kind: ErrorKind::Other(0),
            source: Some(std::io::Error::other(format!(
                "vlan creation for {:?} not implemented during reconciliation",
                v.name
            ))),
        }),
        Change::VlanRemove(v) => {
            vlan::delete(chan, v.index).await?;
            Ok(None)
        }

        Change::VethAdd(v) => {
            let peer_name = desired
                .find_interface_by_index(v.peer_index)
                .map(|i| i.name.clone())
                .ok_or_else(|| ChannelError::Request {
                    kind: ErrorKind::NotFound,
                    source: None,
                })?;
            veth::create(
                chan,
                &VethSpec {
                    name: v.name.clone(),
                    peer_name,
                },
            )
            .await?;
            Ok(None)
        }
        Change::VethRemove(v) => {
            veth::delete(chan, v.index).await?;
            Ok(None)
        }

        Change::InterfaceModify { name, old_up, new_up, old_mtu, new_mtu } => {
            let index = resolve_live_index(chan, name).await?;
            if old_mtu != new_mtu {
                link::set_mtu(chan, index, *new_mtu).await?;
            }
            if old_up != new_up {
                link::set_up(chan, index, *new_up).await?;
                if *new_up {
                    return Ok(Some(name.clone()));
                }
            }
            Ok(None)
        }

        Change::AddressAdd(a) => {
            let index = resolve_live_index(chan, &a.owner_name).await?;
            address::add(chan, index, CidrAddress::new(a.addr, a.prefix_len)).await?;
            Ok(None)
        }
        Change::AddressRemove(a) => {
            let index = resolve_live_index(chan, &a.owner_name).await?;
            address::remove(chan, index, CidrAddress::new(a.addr, a.prefix_len)).await?;
            Ok(None)
        }

        Change::RouteAdd(r) => {
            let oif = if r.oif != 0 {
                let name = desired
                    .find_interface_by_index(r.oif)
                    .map(|i| i.name.clone())
                    .ok_or_else(|| ChannelError::Request {
                        kind: ErrorKind::NotFound,
                        source: None,
                    })?;
                resolve_live_index(chan, &name).await?
            } else {
                0
            };
            let spec = RouteSpec {
                destination: r.destination,
                hops: vec![NextHop {
                    gateway: r.gateway,
                    oif_index: oif,
                    weight: 1,
                }],
                priority: r.priority,
                table: r.table,
            };
            route::add(chan, &spec).await?;
            Ok(None)
        }
        Change::RouteRemove(r) => {
            let spec = RouteSpec {
                destination: r.destination,
                hops: vec![NextHop {
                    gateway: r.gateway,
                    oif_index: r.oif,
                    weight: 1,
                }],
                priority: r.priority,
                table: r.table,
            };
            route::remove(chan, &spec).await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_outcomes_match_spec_table() {
        assert!(is_idempotent(ErrorKind::AlreadyExists, Op::Create));
        assert!(is_idempotent(ErrorKind::NotFound, Op::Delete));
        assert!(!is_idempotent(ErrorKind::AlreadyExists, Op::Delete));
        assert!(!is_idempotent(ErrorKind::Busy, Op::Create));
    }

    #[test]
    fn op_of_classifies_every_change_variant() {
        use wire_model::types::{Bond, BondMode, Family, Route};
        let bond = Bond {
            name: "bond0".into(),
            index: 1000,
            mode: BondMode::BalanceRr,
            miimon: 100,
            updelay: 0,
            downdelay: 0,
            xmit_hash_policy: None,
            lacp_rate: None,
            ad_select: None,
            members: vec![],
        };
        assert_eq!(op_of(&Change::BondAdd(bond.clone())), Op::Create);
        assert_eq!(op_of(&Change::BondRemove(bond)), Op::Delete);
        assert_eq!(
            op_of(&Change::RouteRemove(Route {
                family: Family::Inet,
                destination: None,
                gateway: None,
                oif: 2,
                priority: None,
                table: 254,
                protocol: 3,
                scope: 0,
                route_type: 1,
            })),
            Op::Delete
        );
    }
}
