//! Shared, atomically swappable configuration and its file watcher.
//!
//! [`ConfigHandle`] hands out `Arc<GlobalConfig>` snapshots. A reload
//! re-reads the whole file into a fresh, validated [`GlobalConfig`] and
//! swaps the pointer; readers holding an older snapshot keep using it until
//! they finish their action.
//!
//! [`ConfigWatcher`] uses the `notify` crate to trigger that reload on file
//! changes. An invalid file never replaces a working configuration.
//!
//! ## Thread safety
//!
//! The pointer lives in a `std::sync::RwLock` so the synchronous `notify`
//! callback can swap it without an async context.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Cloneable handle to the current configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<GlobalConfig>>>,
    source: Option<PathBuf>,
}

impl ConfigHandle {
    /// Wrap an in-memory configuration with no backing file.
    #[must_use]
    pub fn fixed(config: GlobalConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            source: None,
        }
    }

    /// Load the configuration from `path` and remember it for reloads.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file is unreadable or invalid.
    pub fn from_path(path: &Path) -> Result<Self> {
        let config = GlobalConfig::load_from_path(path)?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            source: Some(path.to_path_buf()),
        })
    }

    /// Snapshot of the configuration in effect right now.
    #[must_use]
    pub fn current(&self) -> Arc<GlobalConfig> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new configuration.
    pub fn replace(&self, config: GlobalConfig) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(config);
    }

    /// Re-read the backing file and swap it in.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if there is no backing file or the new
    /// content is invalid; the previous configuration stays in effect.
    pub fn reload(&self) -> Result<()> {
        let path = self
            .source
            .as_deref()
            .ok_or_else(|| AppError::Config("configuration has no backing file".into()))?;
        let fresh = GlobalConfig::load_from_path(path)?;
        self.replace(fresh);
        info!(path = %path.display(), "configuration reloaded");
        Ok(())
    }

    /// Path the configuration was loaded from.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Returns `true` for file-system events that indicate the watched file was
/// written or replaced.
fn is_config_change(event: &Event, file: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == file.file_name())
}

/// Reloads a [`ConfigHandle`] whenever its file changes.
///
/// Dropping the watcher stops the underlying OS watch.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching the file behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the handle has no backing file or the
    /// OS watcher cannot be created.
    pub fn spawn(handle: &ConfigHandle) -> Result<Self> {
        let config_path = handle
            .source()
            .ok_or_else(|| AppError::Config("configuration has no backing file".into()))?
            .to_path_buf();
        let handle_for_callback = handle.clone();
        let path_for_callback = config_path.clone();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_config_change(&event, &path_for_callback) => {
                    if let Err(err) = handle_for_callback.reload() {
                        warn!(
                            %err,
                            path = %path_for_callback.display(),
                            "failed to reload configuration; keeping previous values"
                        );
                    }
                }
                Err(err) => {
                    warn!(%err, "config file watcher error");
                }
                _ => {}
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create config file watcher: {err}")))?;

        // Watch the parent directory so write-then-rename saves are seen.
        let watch_target = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(&config_path);

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Config(format!(
                    "failed to watch config path '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %config_path.display(), "config watcher started");

        Ok(Self { _watcher: watcher })
    }
}
