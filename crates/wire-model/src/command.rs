//! The `Subject`/`Action`/`Command` sum types: the literal grammar every
//! consumer (desired builder, resolver, validator, CLI preview
//! formatter) matches on exhaustively. This is the seam an external
//! natural-language front end would plug into; `wire-cli` and
//! `wire-daemon::config` are the only producers in this crate.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Subject {
    Interface(String),
    Bond(String),
    Bridge(String),
    Vlan(String),
    Veth(String),
    /// A route keyed by its destination, `"default"` or `"<addr>/<prefix>"`.
    Route(String),
}

impl Subject {
    /// The name this subject identifies in the state model, where that
    /// concept applies (every variant except `Route`, which is keyed by
    /// destination rather than by interface name).
    pub fn name(&self) -> Option<&str> {
        match self {
            Subject::Interface(n) | Subject::Bond(n) | Subject::Bridge(n) | Subject::Vlan(n) | Subject::Veth(n) => {
                Some(n)
            }
            Subject::Route(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Subject::Interface(_) => "interface",
            Subject::Bond(_) => "bond",
            Subject::Bridge(_) => "bridge",
            Subject::Vlan(_) => "vlan",
            Subject::Veth(_) => "veth",
            Subject::Route(_) => "route",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Interface(n) => write!(f, "interface {n}"),
            Subject::Bond(n) => write!(f, "bond {n}"),
            Subject::Bridge(n) => write!(f, "bridge {n}"),
            Subject::Vlan(n) => write!(f, "vlan {n}"),
            Subject::Veth(n) => write!(f, "veth {n}"),
            Subject::Route(dst) => write!(f, "route {dst}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Create,
    Delete,
    Add(String),
    Remove(String),
    Set { attr: String, value: String },
    None,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Delete => write!(f, "delete"),
            Action::Add(m) => write!(f, "add {m}"),
            Action::Remove(m) => write!(f, "remove {m}"),
            Action::Set { attr, value } => write!(f, "set {attr}={value}"),
            Action::None => write!(f, "none"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub subject: Subject,
    pub action: Action,
    pub attributes: BTreeMap<String, String>,
}

impl Command {
    pub fn new(subject: Subject, action: Action) -> Self {
        Self {
            subject,
            action,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.subject, self.action)?;
        for (k, v) in &self.attributes {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_name_is_none_for_routes() {
        assert_eq!(Subject::Route("default".into()).name(), None);
        assert_eq!(Subject::Bond("bond0".into()).name(), Some("bond0"));
    }

    #[test]
    fn display_renders_attributes_in_key_order() {
        let cmd = Command::new(Subject::Bond("bond0".into()), Action::Create)
            .with_attr("mode", "active-backup")
            .with_attr("miimon", "100");
        assert_eq!(cmd.to_string(), "bond bond0 create miimon=100 mode=active-backup");
    }
}
