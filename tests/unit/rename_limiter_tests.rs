//! Unit tests for `RenameLimiter` against the in-memory platform.
//!
//! Timings are scaled down so every test finishes within a second or two
//! of real time.

use std::sync::Arc;
use std::time::Duration;

use ticket_warden::platform::memory::InMemoryPlatform;
use ticket_warden::rename_limiter::{RenameLimiter, RenameTimings};

const SLACK: Duration = Duration::from_millis(15);

fn timings() -> RenameTimings {
    RenameTimings {
        min_interval: Duration::from_millis(200),
        max_delay: Duration::from_millis(1000),
        short_debounce: Duration::from_millis(10),
        long_debounce: Duration::from_millis(20),
        failure_backoff: Duration::from_millis(100),
    }
}

fn setup() -> (Arc<InMemoryPlatform>, RenameLimiter, String) {
    let platform = Arc::new(InMemoryPlatform::new());
    let channel = platform.insert_channel("g1", "start");
    let limiter = RenameLimiter::new(platform.clone(), timings());
    (platform, limiter, channel)
}

fn name_of(platform: &InMemoryPlatform, channel: &str) -> Option<String> {
    platform.channel(channel).map(|c| c.name)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn burst_collapses_into_last_name() {
    let (platform, limiter, channel) = setup();

    limiter.request_rename(&channel, "first");
    limiter.request_rename(&channel, "second");
    limiter.request_rename(&channel, "third");

    eventually("rename", || name_of(&platform, &channel).as_deref() == Some("third")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let calls = platform.rename_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "third");
    assert_eq!(limiter.desired_name(&channel).as_deref(), Some("third"));
}

#[tokio::test]
async fn matching_name_issues_no_call() {
    let (platform, limiter, channel) = setup();

    limiter.request_rename(&channel, "start");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(platform.rename_calls().is_empty());
}

#[tokio::test]
async fn consecutive_renames_respect_min_interval() {
    let (platform, limiter, channel) = setup();

    limiter.request_rename(&channel, "one");
    eventually("first rename", || name_of(&platform, &channel).as_deref() == Some("one")).await;
    limiter.request_rename(&channel, "two");
    eventually("second rename", || name_of(&platform, &channel).as_deref() == Some("two")).await;

    let calls = platform.rename_calls();
    assert_eq!(calls.len(), 2);
    let gap = calls[1].at.duration_since(calls[0].at);
    assert!(gap + SLACK >= timings().min_interval, "calls only {gap:?} apart");
}

#[tokio::test]
async fn failed_call_is_retried_after_backoff() {
    let (platform, limiter, channel) = setup();
    platform.fail_next_renames(1);

    limiter.request_rename(&channel, "retry");
    eventually("retried rename", || name_of(&platform, &channel).as_deref() == Some("retry")).await;

    let calls = platform.rename_calls();
    assert_eq!(calls.len(), 2);
    let gap = calls[1].at.duration_since(calls[0].at);
    assert!(gap + SLACK >= timings().failure_backoff, "retried after {gap:?}");
}

#[tokio::test]
async fn rate_limit_hint_is_honoured() {
    let (platform, limiter, channel) = setup();
    let hint = Duration::from_millis(400);
    platform.rate_limit_next_rename(hint);

    limiter.request_rename(&channel, "slow");
    eventually("rename after hint", || name_of(&platform, &channel).as_deref() == Some("slow")).await;

    let calls = platform.rename_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at.duration_since(calls[0].at) + SLACK >= hint);
}

#[tokio::test]
async fn missing_channel_drops_entry() {
    let (platform, limiter, _) = setup();

    limiter.request_rename("gone", "anything");
    assert_eq!(limiter.desired_name("gone").as_deref(), Some("anything"));

    eventually("entry dropped", || limiter.desired_name("gone").is_none()).await;
    assert!(platform.rename_calls().is_empty());
}

#[tokio::test]
async fn in_flight_call_finishes_before_replacement_is_issued() {
    let (platform, limiter, channel) = setup();
    let latency = Duration::from_millis(300);
    platform.set_rename_latency(latency);

    limiter.request_rename(&channel, "a");
    eventually("first call issued", || !platform.rename_calls().is_empty()).await;
    limiter.request_rename(&channel, "b");

    eventually("final name", || name_of(&platform, &channel).as_deref() == Some("b")).await;

    let calls = platform.rename_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, "a");
    assert_eq!(calls[1].name, "b");
    assert!(calls[1].at.duration_since(calls[0].at) + SLACK >= latency);
}

#[tokio::test]
async fn forget_cancels_pending_rename() {
    let (platform, limiter, channel) = setup();

    limiter.request_rename(&channel, "never");
    limiter.forget(&channel);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(platform.rename_calls().is_empty());
    assert!(limiter.desired_name(&channel).is_none());
}

#[tokio::test]
async fn requests_after_shutdown_are_ignored() {
    let (platform, limiter, channel) = setup();
    limiter.shutdown().await;

    limiter.request_rename(&channel, "late");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(platform.rename_calls().is_empty());
    assert!(limiter.desired_name(&channel).is_none());
}

#[tokio::test]
async fn shutdown_cancels_waiting_tasks() {
    let (platform, limiter, channel) = setup();
    platform.fail_next_renames(1);

    limiter.request_rename(&channel, "x");
    eventually("first attempt", || !platform.rename_calls().is_empty()).await;
    limiter.shutdown().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(platform.rename_calls().len(), 1);
    assert_eq!(name_of(&platform, &channel).as_deref(), Some("start"));
}

#[test]
fn timings_follow_config() {
    let config = ticket_warden::config::RenameConfig::default();
    let t = RenameTimings::from(&config);
    assert_eq!(t.min_interval, Duration::from_millis(3000));
    assert_eq!(t.short_debounce, Duration::from_millis(250));
    assert_eq!(RenameTimings::default(), t);
}

#[tokio::test(start_paused = true)]
async fn debounce_lengthens_after_a_recent_rename() {
    let platform = Arc::new(InMemoryPlatform::new());
    let channel = platform.insert_channel("g1", "start");
    let timings = RenameTimings {
        min_interval: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        short_debounce: Duration::from_millis(100),
        long_debounce: Duration::from_secs(2),
        failure_backoff: Duration::from_secs(1),
    };
    let limiter = RenameLimiter::new(platform.clone(), timings);

    // Idle channel: short debounce.
    let asked = tokio::time::Instant::now();
    limiter.request_rename(&channel, "first");
    eventually("first rename", || platform.rename_calls().len() == 1).await;
    let waited = platform.rename_calls()[0].at - asked;
    assert!(waited >= timings.short_debounce, "{waited:?}");
    assert!(waited < timings.long_debounce, "{waited:?}");

    // Renamed moments ago: long debounce.
    let asked = tokio::time::Instant::now();
    limiter.request_rename(&channel, "second");
    eventually("second rename", || platform.rename_calls().len() == 2).await;
    let waited = platform.rename_calls()[1].at - asked;
    assert!(waited >= timings.long_debounce, "{waited:?}");

    // Idle for longer than max_delay: short again.
    tokio::time::sleep(timings.max_delay + Duration::from_secs(1)).await;
    let asked = tokio::time::Instant::now();
    limiter.request_rename(&channel, "third");
    eventually("third rename", || platform.rename_calls().len() == 3).await;
    let waited = platform.rename_calls()[2].at - asked;
    assert!(waited >= timings.short_debounce, "{waited:?}");
    assert!(waited < timings.long_debounce, "{waited:?}");
    assert_eq!(name_of(&platform, &channel).as_deref(), Some("third"));
}
