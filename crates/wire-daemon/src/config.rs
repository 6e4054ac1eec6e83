//! Configuration loading (component M): parses the line-oriented config
//! file into the `Command` sequence `wire-model::desired` folds onto a
//! live baseline.
//!
//! Grammar, one statement per line: `<kind> <name> <verb> [arg]
//! [key=value ...]`. `#` introduces a trailing comment; blank lines are
//! skipped. `kind` is one of `interface, bond, bridge, vlan, veth,
//! route`; `verb` one of `create, delete, add, remove, set, none`. `add`
//! and `remove` take the member name as `arg`; `set` takes its single
//! `attr=value` pair as `arg`; any further `key=value` tokens become
//! `Command::attributes`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use wire_model::command::{Action, Command, Subject};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wire/network.conf";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("{path}:{line}: {message}")]
    ParseError { path: PathBuf, line: usize, message: String },
}

pub fn load(path: impl AsRef<Path>) -> Result<Vec<Command>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, path)
}

pub fn parse(text: &str, path: &Path) -> Result<Vec<Command>, ConfigError> {
    let mut commands = Vec::new();
    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        commands.push(parse_line(line, path, line_no)?);
    }
    Ok(commands)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_line(line: &str, path: &Path, line_no: usize) -> Result<Command, ConfigError> {
    let mut tokens = line.split_whitespace();
    let err = |message: String| ConfigError::ParseError {
        path: path.to_path_buf(),
        line: line_no,
        message,
    };

    let kind = tokens.next().ok_or_else(|| err("missing subject kind".into()))?;
    let name = tokens.next().ok_or_else(|| err("missing subject name".into()))?;
    let verb = tokens.next().ok_or_else(|| err("missing verb".into()))?;

    let subject = match kind {
        "interface" => Subject::Interface(name.to_string()),
        "bond" => Subject::Bond(name.to_string()),
        "bridge" => Subject::Bridge(name.to_string()),
        "vlan" => Subject::Vlan(name.to_string()),
        "veth" => Subject::Veth(name.to_string()),
        "route" => Subject::Route(name.to_string()),
        other => return Err(err(format!("unknown subject kind '{other}'"))),
    };

    let mut command = match verb {
        "create" => Command::new(subject, Action::Create),
        "delete" => Command::new(subject, Action::Delete),
        "none" => Command::new(subject, Action::None),
        "add" => {
            let member = tokens.next().ok_or_else(|| err("'add' requires a member name".into()))?;
            Command::new(subject, Action::Add(member.to_string()))
        }
        "remove" => {
            let member = tokens
                .next()
                .ok_or_else(|| err("'remove' requires a member name".into()))?;
            Command::new(subject, Action::Remove(member.to_string()))
        }
        "set" => {
            let pair = tokens.next().ok_or_else(|| err("'set' requires an attr=value pair".into()))?;
            let (attr, value) = split_attr(pair).ok_or_else(|| err(format!("malformed attr=value '{pair}'")))?;
            Command::new(subject, Action::Set { attr, value })
        }
        other => return Err(err(format!("unknown verb '{other}'"))),
    };

    for token in tokens {
        let (key, value) = split_attr(token).ok_or_else(|| err(format!("malformed attr=value '{token}'")))?;
        command = command.with_attr(key, value);
    }

    Ok(command)
}

fn split_attr(token: &str) -> Option<(String, String)> {
    let (k, v) = token.split_once('=')?;
    Some((k.to_string(), v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_and_comments_are_skipped() {
        let text = "\n# a comment\n   \ninterface eth0 set state=up\n";
        let commands = parse(text, Path::new("test.conf")).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn bond_create_with_attributes_round_trips() {
        let text = "bond bond0 create mode=802.3ad miimon=100";
        let commands = parse(text, Path::new("test.conf")).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].subject, Subject::Bond("bond0".into()));
        assert_eq!(commands[0].action, Action::Create);
        assert_eq!(commands[0].attr("mode"), Some("802.3ad"));
        assert_eq!(commands[0].attr("miimon"), Some("100"));
    }

    #[test]
    fn add_member_parses_to_action_add() {
        let text = "bond bond0 add eth0";
        let commands = parse(text, Path::new("test.conf")).unwrap();
        assert_eq!(commands[0].action, Action::Add("eth0".into()));
    }

    #[test]
    fn set_verb_parses_attr_value_pair() {
        let text = "interface eth0 set state=up";
        let commands = parse(text, Path::new("test.conf")).unwrap();
        assert_eq!(
            commands[0].action,
            Action::Set { attr: "state".into(), value: "up".into() }
        );
    }

    #[test]
    fn unknown_verb_is_a_parse_error_with_line_number() {
        let text = "interface eth0 frobnicate\n";
        let err = parse(text, Path::new("test.conf")).unwrap_err();
        match err {
            ConfigError::ParseError { line, .. } => assert_eq!(line, 1),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn route_default_with_gateway() {
        let text = "route default create via=10.0.0.1 dev=eth0";
        let commands = parse(text, Path::new("test.conf")).unwrap();
        assert_eq!(commands[0].subject, Subject::Route("default".into()));
        assert_eq!(commands[0].attr("via"), Some("10.0.0.1"));
    }
}
