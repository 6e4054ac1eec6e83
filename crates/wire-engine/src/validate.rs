//! Pre-Apply Validator (component I): inspects a command batch against
//! live state before any reconciliation is attempted. Runs in two
//! passes — a tracking pass that discovers what the batch creates and
//! deletes, then a check pass that evaluates each command against
//! live ∪ pending.

use std::collections::HashSet;
use std::net::IpAddr;

use wire_model::command::{Action, Command, Subject};
use wire_model::state::NetworkState;
use wire_netlink::object::address::CidrAddress;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueCode {
    InterfaceAlreadyExists,
    DependencyMissing,
    ParentMissing,
    GatewayUnreachable,
    RemovingDefaultRoute,
    BringingDownManagementInterface,
    RemovingOnlyAddress,
    RouteConflict,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCode::InterfaceAlreadyExists => "InterfaceAlreadyExists",
            IssueCode::DependencyMissing => "DependencyMissing",
            IssueCode::ParentMissing => "ParentMissing",
            IssueCode::GatewayUnreachable => "GatewayUnreachable",
            IssueCode::RemovingDefaultRoute => "RemovingDefaultRoute",
            IssueCode::BringingDownManagementInterface => "BringingDownManagementInterface",
            IssueCode::RemovingOnlyAddress => "RemovingOnlyAddress",
            IssueCode::RouteConflict => "RouteConflict",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Issue {
    pub severity: Severity,
    pub code: IssueCode,
    pub formatted_message: String,
    pub suggestion: Option<String>,
    pub command_index: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
    pub items: Vec<Issue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, code: IssueCode, command_index: usize, message: impl Into<String>, suggestion: Option<String>) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
        self.items.push(Issue {
            severity,
            code,
            formatted_message: message.into(),
            suggestion,
            command_index,
        });
    }

    /// Whether the batch has any error-severity issue, which `wire-cli`
    /// treats as an abort-before-any-kernel-call condition.
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

/// Names this batch will create or remove, by subject kind, folded
/// across the whole command list regardless of order — the tracking
/// pass of §4.I.
#[derive(Default)]
struct Pending {
    created: HashSet<(&'static str, String)>,
    deleted: HashSet<(&'static str, String)>,
}

impl Pending {
    fn build(commands: &[Command]) -> Self {
        let mut pending = Self::default();
        for cmd in commands {
            let key = (cmd.subject.kind(), cmd.subject.name().unwrap_or_default().to_string());
            match cmd.action {
                Action::Create => {
                    pending.created.insert(key);
                }
                Action::Delete => {
                    pending.deleted.insert(key);
                }
                _ => {}
            }
        }
        pending
    }

    fn will_exist(&self, live: &NetworkState, subject: &Subject) -> bool {
        let Some(name) = subject.name() else { return false };
        let key = (subject.kind(), name.to_string());
        if self.deleted.contains(&key) {
            return false;
        }
        exists_live(live, subject) || self.created.contains(&key)
    }
}

fn exists_live(live: &NetworkState, subject: &Subject) -> bool {
    match subject {
        Subject::Interface(n) => live.find_interface(n).is_some(),
        Subject::Bond(n) => live.find_bond(n).is_some(),
        Subject::Bridge(n) => live.find_bridge(n).is_some(),
        Subject::Vlan(n) => live.find_vlan(n).is_some(),
        Subject::Veth(n) => live.find_veth(n).is_some(),
        Subject::Route(_) => false,
    }
}

pub fn validate(commands: &[Command], live: &NetworkState) -> ValidationReport {
    let mut report = ValidationReport::default();
    let pending = Pending::build(commands);
    let mut route_destinations_seen: HashSet<String> = HashSet::new();

    for (index, cmd) in commands.iter().enumerate() {
        check_create_conflict(index, cmd, live, &mut report);
        check_dependency(index, cmd, live, &pending, &mut report);
        check_route(index, cmd, live, &mut route_destinations_seen, &mut report);
        check_down_and_address_removal(index, cmd, live, &mut report);
    }

    report
}

fn check_create_conflict(index: usize, cmd: &Command, live: &NetworkState, report: &mut ValidationReport) {
    if cmd.action != Action::Create {
        return;
    }
    if exists_live(live, &cmd.subject) {
        report.push(
            Severity::Error,
            IssueCode::InterfaceAlreadyExists,
            index,
            format!("{} already exists", cmd.subject),
            Some(format!("remove the `create` command for {} or delete it first", cmd.subject)),
        );
    }
}

fn check_dependency(index: usize, cmd: &Command, live: &NetworkState, pending: &Pending, report: &mut ValidationReport) {
    match (&cmd.subject, &cmd.action) {
        (Subject::Bond(bond), Action::Add(member)) => {
            if !pending.will_exist(live, &Subject::Interface(member.clone())) {
                report.push(
                    Severity::Error,
                    IssueCode::DependencyMissing,
                    index,
                    format!("bond {bond} cannot enslave {member}: no such interface"),
                    Some(format!("create interface {member} before enslaving it to {bond}")),
                );
            }
        }
        (Subject::Bridge(bridge), Action::Add(member)) => {
            if !pending.will_exist(live, &Subject::Interface(member.clone())) {
                report.push(
                    Severity::Error,
                    IssueCode::DependencyMissing,
                    index,
                    format!("bridge {bridge} cannot attach {member}: no such interface"),
                    Some(format!("create interface {member} before attaching it to {bridge}")),
                );
            }
        }
        (Subject::Vlan(vlan), Action::Create) => {
            if let Some(parent) = cmd.attr("on") {
                if !pending.will_exist(live, &Subject::Interface(parent.to_string())) {
                    report.push(
                        Severity::Error,
                        IssueCode::ParentMissing,
                        index,
                        format!("vlan {vlan} has no parent interface {parent}"),
                        Some(format!("create {parent} before the vlan that stacks on it")),
                    );
                }
            }
        }
        (Subject::Veth(veth), Action::Create) => {
            if let Some(peer) = cmd.attr("peer") {
                if pending.will_exist(live, &Subject::Interface(peer.to_string())) && !pending.created.contains(&("veth", veth.clone())) {
                    // peer name collides with an existing non-veth interface; surfaced as a dependency
                    // problem rather than silently shadowing it.
                    report.push(
                        Severity::Error,
                        IssueCode::DependencyMissing,
                        index,
                        format!("veth {veth} peer name {peer} collides with an existing interface"),
                        None,
                    );
                }
            }
        }
        (Subject::Interface(name), Action::Set { attr, value }) if attr == "address" => {
            if CidrAddress::parse(value).is_none() {
                report.push(
                    Severity::Error,
                    IssueCode::DependencyMissing,
                    index,
                    format!("invalid address {value} for interface {name}"),
                    None,
                );
            }
        }
        _ => {}
    }
}

fn check_route(
    index: usize,
    cmd: &Command,
    live: &NetworkState,
    seen_destinations: &mut HashSet<String>,
    report: &mut ValidationReport,
) {
    let Subject::Route(dest) = &cmd.subject else { return };
    match &cmd.action {
        Action::Delete if dest == "default" => {
            report.push(
                Severity::Warning,
                IssueCode::RemovingDefaultRoute,
                index,
                "removing the default route".to_string(),
                Some("confirm this host has another way to reach the rest of the network".to_string()),
            );
        }
        Action::Create | Action::None => {
            if !seen_destinations.insert(dest.clone()) {
                report.push(
                    Severity::Warning,
                    IssueCode::RouteConflict,
                    index,
                    format!("duplicate route for destination {dest} in this batch"),
                    Some("the last matching command wins; remove the earlier duplicate".to_string()),
                );
            }
            if let Some(via) = cmd.attr("via") {
                if let Ok(gateway) = via.parse::<IpAddr>() {
                    if !gateway_reachable(live, gateway) {
                        report.push(
                            Severity::Warning,
                            IssueCode::GatewayUnreachable,
                            index,
                            format!("gateway {gateway} is not directly reachable from any configured interface"),
                            Some("add an address on the gateway's subnet or a route that covers it".to_string()),
                        );
                    }
                }
            }
        }
        _ => {}
    }
}

/// Whether `gateway` falls inside one of `live`'s addresses' subnets,
/// or is covered by an existing non-default route.
fn gateway_reachable(live: &NetworkState, gateway: IpAddr) -> bool {
    let directly_connected = live.addresses.iter().any(|a| in_same_subnet(a.addr, a.prefix_len, gateway));
    let routed = live.routes.iter().any(|r| {
        !r.is_default()
            && r.destination
                .map(|(dst, plen)| in_same_subnet(dst, plen, gateway))
                .unwrap_or(false)
    });
    directly_connected || routed
}

fn in_same_subnet(base: IpAddr, prefix_len: u8, addr: IpAddr) -> bool {
    match (base, addr) {
        (IpAddr::V4(b), IpAddr::V4(a)) => {
            let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len as u32) };
            (u32::from(b) & mask) == (u32::from(a) & mask)
        }
        (IpAddr::V6(b), IpAddr::V6(a)) => {
            let mask = if prefix_len == 0 { 0u128 } else { u128::MAX << (128 - prefix_len as u32) };
            (u128::from(b) & mask) == (u128::from(a) & mask)
        }
        _ => false,
    }
}

fn check_down_and_address_removal(index: usize, cmd: &Command, live: &NetworkState, report: &mut ValidationReport) {
    let Subject::Interface(name) = &cmd.subject else { return };

    let is_down_set = matches!(&cmd.action, Action::Set { attr, value } if attr == "state" && value == "down");
    if is_down_set {
        if let Some(iface) = live.find_interface(name) {
            let addr_count = live.addresses_for(iface.index).len();
            let only_addressed_interface = addr_count > 0
                && live
                    .interfaces
                    .iter()
                    .filter(|other| other.index != iface.index)
                    .all(|other| live.addresses_for(other.index).is_empty());
            if only_addressed_interface {
                report.push(
                    Severity::Warning,
                    IssueCode::BringingDownManagementInterface,
                    index,
                    format!("{name} is the only interface carrying an address; bringing it down may cut off management access"),
                    Some("confirm another interface or out-of-band path remains reachable".to_string()),
                );
            }
        }
    }

    // `remove <cidr>` on an interface subject, by the same convention the
    // builder uses for `address=<cidr>` on `set`, is the only place an
    // address removal enters the command grammar today.
    if let Action::Remove(value) = &cmd.action {
        if CidrAddress::parse(value).is_some() {
            if let Some(iface) = live.find_interface(name) {
                if live.addresses_for(iface.index).len() == 1 {
                    report.push(
                        Severity::Warning,
                        IssueCode::RemovingOnlyAddress,
                        index,
                        format!("removing the only address configured on {name}"),
                        Some("confirm this interface no longer needs reachability at this address".to_string()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wire_model::types::{Interface, LinkKind};

    fn iface(name: &str, index: i32) -> Interface {
        Interface {
            name: name.into(),
            index,
            flags: 0,
            mtu: 1500,
            mac: None,
            operstate: 0,
            link_kind: LinkKind::Physical,
            master_index: None,
        }
    }

    #[test]
    fn creating_an_existing_bond_is_an_error() {
        let mut live = NetworkState::new();
        live.push_interface(iface("bond0", 2));
        live.bonds.push(wire_model::types::Bond {
            name: "bond0".into(),
            index: 2,
            mode: wire_model::types::BondMode::BalanceRr,
            miimon: 100,
            updelay: 0,
            downdelay: 0,
            xmit_hash_policy: None,
            lacp_rate: None,
            ad_select: None,
            members: vec![],
        });
        let commands = vec![Command::new(Subject::Bond("bond0".into()), Action::Create)];
        let report = validate(&commands, &live);
        assert_eq!(report.errors, 1);
        assert_eq!(report.items[0].code, IssueCode::InterfaceAlreadyExists);
    }

    #[test]
    fn vlan_create_in_same_batch_as_parent_create_is_not_flagged() {
        let live = NetworkState::new();
        let commands = vec![
            Command::new(Subject::Interface("eth9".into()), Action::Create),
            Command::new(Subject::Vlan("eth9.100".into()), Action::Create)
                .with_attr("id", "100")
                .with_attr("on", "eth9"),
        ];
        let report = validate(&commands, &live);
        assert!(!report.items.iter().any(|i| i.code == IssueCode::ParentMissing));
    }

    #[test]
    fn vlan_create_with_dangling_parent_is_flagged() {
        let live = NetworkState::new();
        let commands = vec![Command::new(Subject::Vlan("eth9.100".into()), Action::Create)
            .with_attr("id", "100")
            .with_attr("on", "eth9")];
        let report = validate(&commands, &live);
        assert_eq!(report.errors, 1);
        assert_eq!(report.items[0].code, IssueCode::ParentMissing);
    }

    #[test]
    fn removing_default_route_is_a_warning() {
        let live = NetworkState::new();
        let commands = vec![Command::new(Subject::Route("default".into()), Action::Delete)];
        let report = validate(&commands, &live);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.items[0].code, IssueCode::RemovingDefaultRoute);
    }

    #[test]
    fn bringing_down_the_only_addressed_interface_warns() {
        let mut live = NetworkState::new();
        live.push_interface(iface("eth0", 2));
        live.addresses.push(wire_model::types::Address {
            owner_index: 2,
            owner_name: "eth0".into(),
            family: wire_model::types::Family::Inet,
            addr: "192.0.2.1".parse().unwrap(),
            prefix_len: 24,
            scope: 0,
            flags: 0,
        });
        let commands = vec![Command::new(
            Subject::Interface("eth0".into()),
            Action::Set { attr: "state".into(), value: "down".into() },
        )];
        let report = validate(&commands, &live);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.items[0].code, IssueCode::BringingDownManagementInterface);
    }
}
