//! File watch (component K): a debounced `notify` watcher over the
//! config path.
//!
//! If the config file does not exist yet at startup, the watch falls
//! back to the parent directory and filters events by file name; once a
//! create event for that name arrives it re-arms by re-watching the file
//! directly on the next [`Watcher::poll`] call. Raw filesystem events are
//! coalesced: [`Watcher::poll`] only reports a change once at least
//! [`DEBOUNCE`] has elapsed since the last raw event it observed.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tracing::{debug, warn};

pub const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct Watcher {
    _inner: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    config_path: PathBuf,
    file_name: std::ffi::OsString,
    watching_parent: bool,
    last_event_at: Option<Instant>,
    pending: bool,
}

impl Watcher {
    pub fn new(config_path: impl Into<PathBuf>) -> notify::Result<Self> {
        let config_path = config_path.into();
        let file_name = config_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut inner = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        let watching_parent = !config_path.exists();
        let watch_target: &Path = if watching_parent {
            config_path.parent().unwrap_or_else(|| Path::new("."))
        } else {
            &config_path
        };
        inner.watch(watch_target, RecursiveMode::NonRecursive)?;
        if watching_parent {
            debug!(
                path = %config_path.display(),
                watching = %watch_target.display(),
                "config file missing at startup, watching parent directory"
            );
        }

        Ok(Self {
            _inner: inner,
            rx,
            config_path,
            file_name,
            watching_parent,
            last_event_at: None,
            pending: false,
        })
    }

    /// Drain any pending raw events, re-arming onto the file directly if
    /// it has just been created while we were watching the parent, and
    /// report whether a debounced change is ready to act on.
    pub fn poll(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => self.observe(event),
                Ok(Err(e)) => warn!("file watch error: {e}"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        match self.last_event_at {
            Some(at) if self.pending && at.elapsed() >= DEBOUNCE => {
                self.pending = false;
                true
            }
            _ => false,
        }
    }

    fn observe(&mut self, event: Event) {
        if self.watching_parent {
            let created_our_file = matches!(event.kind, EventKind::Create(_))
                && event.paths.iter().any(|p| p.file_name() == Some(self.file_name.as_os_str()));
            if created_our_file {
                if let Err(e) = self._inner.watch(&self.config_path, RecursiveMode::NonRecursive) {
                    warn!("failed to re-arm watch on {:?}: {e}", self.config_path);
                } else {
                    self.watching_parent = false;
                    debug!(path = %self.config_path.display(), "config file created, watching directly");
                }
            } else if !event.paths.iter().any(|p| p.file_name() == Some(self.file_name.as_os_str())) {
                return;
            }
        }

        self.last_event_at = Some(Instant::now());
        self.pending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;

    #[test]
    fn falls_back_to_parent_directory_when_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.conf");
        let watcher = Watcher::new(&path).unwrap();
        assert!(watcher.watching_parent);
    }

    #[test]
    fn watches_file_directly_when_it_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.conf");
        fs::write(&path, "interface eth0 set state=up\n").unwrap();
        let watcher = Watcher::new(&path).unwrap();
        assert!(!watcher.watching_parent);
    }

    #[test]
    fn a_write_is_reported_only_after_the_debounce_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.conf");
        fs::write(&path, "interface eth0 set state=up\n").unwrap();
        let mut watcher = Watcher::new(&path).unwrap();

        fs::write(&path, "interface eth0 set state=down\n").unwrap();
        sleep(Duration::from_millis(100));
        assert!(!watcher.poll());

        sleep(Duration::from_millis(500));
        assert!(watcher.poll());
    }
}
