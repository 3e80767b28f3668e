//! Bulk reset of rate limit counters.
//!
//! Operators use this to un-throttle traffic during testing or incident
//! response. It runs outside request serving and is not meant to run
//! concurrently with itself.
//!
//! The prefix list below is maintained by hand. Every policy prefix must
//! appear here, or the reset will silently leave that policy's counters
//! in place. The `reset` integration tests check the two stay in sync.

use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::DEFAULT_KEY_PREFIX;
use crate::store::CounterStore;

/// Key prefixes cleared by a bulk reset.
pub const RESET_PREFIXES: &[&str] = &[
    "general",
    "auth",
    "tenant",
    "user",
    "order",
    DEFAULT_KEY_PREFIX,
];

/// Outcome of resetting one key pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternReport {
    /// The glob pattern that was scanned
    pub pattern: String,
    /// Keys found matching the pattern
    pub found: usize,
    /// Keys actually deleted
    pub deleted: u64,
}

/// Glob pattern covering every counter under `prefix`.
pub fn pattern_for(prefix: &str) -> String {
    format!("{}:*", prefix)
}

/// Delete every counter under each prefix.
///
/// Stops at the first store failure; patterns already processed stay reset.
pub async fn reset_counters(
    store: &dyn CounterStore,
    prefixes: &[&str],
) -> Result<Vec<PatternReport>> {
    let mut reports = Vec::with_capacity(prefixes.len());
    reset_counters_with(store, prefixes, |report| reports.push(report.clone())).await?;
    Ok(reports)
}

/// Like [`reset_counters`], but hands each pattern's report to `on_report`
/// as soon as that pattern is done, so counts for patterns cleared before a
/// failure are never lost.
pub async fn reset_counters_with<F>(
    store: &dyn CounterStore,
    prefixes: &[&str],
    mut on_report: F,
) -> Result<()>
where
    F: FnMut(&PatternReport),
{
    for prefix in prefixes {
        let pattern = pattern_for(prefix);

        let keys = match store.keys_matching(&pattern).await {
            Ok(keys) => keys,
            Err(source) => return Err(TurnstileError::Reset { pattern, source }),
        };

        let deleted = match store.delete(&keys).await {
            Ok(deleted) => deleted,
            Err(source) => return Err(TurnstileError::Reset { pattern, source }),
        };

        info!(pattern = %pattern, found = keys.len(), deleted, "Reset rate limit counters");

        on_report(&PatternReport {
            pattern,
            found: keys.len(),
            deleted,
        });
    }

    Ok(())
}
