//! Hot reload of the `[socket]` section.
//!
//! The file is re-read on every modify/create event. A reload that fails to
//! parse or validate is logged and ignored; the last good options stay
//! published. Subscribers only wake when the resolved options change.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::SocketConfig;
use crate::net::options::SocketOptions;

/// Publishes the socket options found in a config file.
pub struct SocketOptionsWatcher {
    path: PathBuf,
    current: watch::Sender<Option<SocketOptions>>,
}

impl SocketOptionsWatcher {
    /// `initial` is what the server was started with; the receiver starts there.
    pub fn new(
        path: &Path,
        initial: Option<SocketOptions>,
    ) -> (Self, watch::Receiver<Option<SocketOptions>>) {
        let (current, updates) = watch::channel(initial);
        (
            Self {
                path: path.to_path_buf(),
                current,
            },
            updates,
        )
    }

    /// Re-read the file now. Returns whether the published options changed.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let config = load_config(&self.path)?;
        let next = config.socket.as_ref().map(SocketConfig::to_options);

        let changed = self.current.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        Ok(changed)
    }

    /// Start watching. Keep the returned watcher alive to keep reloading.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match self.reload() {
                        Ok(true) => tracing::info!(path = ?self.path, "Socket options reloaded"),
                        Ok(false) => tracing::debug!(path = ?self.path, "Config changed, socket options unchanged"),
                        Err(e) => tracing::error!(
                            path = ?self.path,
                            error = %e,
                            "Config reload rejected, keeping current socket options"
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Watching config for socket option changes");
        Ok(watcher)
    }
}
