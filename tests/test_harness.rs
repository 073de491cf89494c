//! Shared helpers for session integration tests.

use std::time::Duration;

use cmdqueue::config::{RetentionPolicy, SessionConfig};
use cmdqueue::scheduler::CommandSpec;
use cmdqueue::session::Session;

/// `sh -c <script>`
pub fn sh(script: &str) -> CommandSpec {
    CommandSpec::new(["sh", "-c", script])
}

/// Session over `commands` that keeps every finished record.
pub fn test_session(max_concurrent: usize, commands: Vec<CommandSpec>) -> Session {
    let config = SessionConfig::new(max_concurrent)
        .with_commands(commands)
        .with_retention(RetentionPolicy::unbounded());
    Session::new(config).unwrap()
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition() {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    condition()
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> bool,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}

/// Wait until `count` jobs have real process ids and return them, most
/// recently started first.
#[allow(dead_code)]
pub async fn wait_for_running(session: &Session, count: usize) -> Vec<i64> {
    assert_eventually(
        || {
            session
                .active_view()
                .iter()
                .filter(|id| **id >= 0)
                .count()
                >= count
        },
        Duration::from_secs(5),
        "jobs never started",
    )
    .await;
    session
        .active_view()
        .into_iter()
        .filter(|id| *id >= 0)
        .collect()
}
