//! History (component O): periodic snapshots of live state to
//! `/var/lib/wire/snapshots/`, pruned to a bounded count so the daemon
//! never grows its own disk footprint unbounded.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use wire_model::state::NetworkState;

pub const DEFAULT_SNAPSHOT_DIR: &str = "/var/lib/wire/snapshots";
pub const DEFAULT_MAX_SNAPSHOTS: usize = 20;

pub struct History {
    dir: PathBuf,
    max_snapshots: usize,
}

impl History {
    pub fn new(dir: impl Into<PathBuf>, max_snapshots: usize) -> Self {
        Self { dir: dir.into(), max_snapshots }
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Render `state` as a config-like snapshot and write it under
    /// `snapshot_<unix_seconds>.conf`, then prune older files beyond
    /// `max_snapshots`.
    pub fn snapshot(&self, state: &NetworkState, unix_seconds: u64) -> std::io::Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.dir.join(format!("snapshot_{unix_seconds}.conf"));
        std::fs::write(&path, render(state))?;
        if let Err(e) = self.prune() {
            warn!("failed to prune old snapshots in {:?}: {e}", self.dir);
        }
        debug!(path = %path.display(), "wrote state snapshot");
        Ok(path)
    }

    fn prune(&self) -> std::io::Result<()> {
        let mut entries: Vec<(u64, PathBuf)> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                snapshot_timestamp(&path).map(|ts| (ts, path))
            })
            .collect();
        if entries.len() <= self.max_snapshots {
            return Ok(());
        }
        entries.sort_by_key(|(ts, _)| *ts);
        let excess = entries.len() - self.max_snapshots;
        for (_, path) in entries.into_iter().take(excess) {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn snapshot_timestamp(path: &Path) -> Option<u64> {
    let name = path.file_stem()?.to_str()?;
    name.strip_prefix("snapshot_")?.parse().ok()
}

fn render(state: &NetworkState) -> String {
    let mut out = String::new();
    for iface in &state.interfaces {
        out.push_str(&format!(
            "# interface {} index={} mtu={} up={}\n",
            iface.name,
            iface.index,
            iface.mtu,
            iface.flags & 0x1 != 0
        ));
    }
    for addr in &state.addresses {
        out.push_str(&format!(
            "# address {}/{} on {}\n",
            addr.addr, addr.prefix_len, addr.owner_name
        ));
    }
    for bond in &state.bonds {
        out.push_str(&format!("# bond {} members={}\n", bond.name, bond.members.len()));
    }
    for bridge in &state.bridges {
        out.push_str(&format!("# bridge {} ports={}\n", bridge.name, bridge.ports.len()));
    }
    for vlan in &state.vlans {
        out.push_str(&format!("# vlan {} id={}\n", vlan.name, vlan.vlan_id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_writes_a_file_named_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path(), 20);
        let state = NetworkState::new();
        let path = history.snapshot(&state, 1_700_000_000).unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "snapshot_1700000000.conf");
    }

    #[test]
    fn prune_keeps_only_the_newest_max_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path(), 2);
        let state = NetworkState::new();
        for ts in [100u64, 200, 300] {
            history.snapshot(&state, ts).unwrap();
        }
        let remaining: Vec<u64> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| snapshot_timestamp(&e.path()))
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&100));
    }
}
