//! Unit tests for `ConfigHandle` reloads and the file watcher.

use std::fs;
use std::path::Path;
use std::time::Duration;

use ticket_warden::config::GlobalConfig;
use ticket_warden::config_watcher::{ConfigHandle, ConfigWatcher};
use ticket_warden::AppError;

fn write_config(path: &Path, footer: &str) {
    let raw = format!("data_dir = \"/tmp/tw\"\n[[community]]\nid = \"g1\"\nfooter = \"{footer}\"\n");
    fs::write(path, raw).expect("write config");
}

fn footer(handle: &ConfigHandle) -> String {
    handle
        .current()
        .community("g1")
        .expect("g1 configured")
        .footer
        .clone()
}

#[test]
fn reload_swaps_in_new_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    write_config(&path, "before");

    let handle = ConfigHandle::from_path(&path).expect("load");
    let snapshot = handle.current();
    write_config(&path, "after");
    handle.reload().expect("reload");

    assert_eq!(footer(&handle), "after");
    assert_eq!(snapshot.community("g1").expect("g1").footer, "before");
    assert_eq!(handle.source(), Some(path.as_path()));
}

#[test]
fn invalid_file_keeps_previous_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    write_config(&path, "stable");
    let handle = ConfigHandle::from_path(&path).expect("load");

    fs::write(&path, "data_dir = \"/tmp\"\nhistory_limit = 0\n").expect("write");
    assert!(matches!(handle.reload(), Err(AppError::Config(_))));
    assert_eq!(footer(&handle), "stable");
}

#[test]
fn fixed_handle_cannot_reload_or_watch() {
    let config = GlobalConfig::from_toml_str("data_dir = \"/tmp\"").expect("parse");
    let handle = ConfigHandle::fixed(config);
    assert!(handle.source().is_none());
    assert!(matches!(handle.reload(), Err(AppError::Config(_))));
    assert!(ConfigWatcher::spawn(&handle).is_err());
}

#[test]
fn replace_is_visible_to_clones() {
    let config = GlobalConfig::from_toml_str("data_dir = \"/tmp\"").expect("parse");
    let handle = ConfigHandle::fixed(config.clone());
    let clone = handle.clone();

    let mut changed = config;
    changed.close_grace_ms = 1;
    handle.replace(changed);

    assert_eq!(clone.current().close_grace_ms, 1);
}

#[tokio::test]
async fn watcher_reloads_on_file_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    write_config(&path, "initial");
    let handle = ConfigHandle::from_path(&path).expect("load");
    let _watcher = ConfigWatcher::spawn(&handle).expect("watch");

    tokio::time::sleep(Duration::from_millis(100)).await;
    write_config(&path, "edited");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while footer(&handle) != "edited" {
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher did not pick up the change"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
