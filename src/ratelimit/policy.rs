//! Fixed-window rate limit policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::identity::{KeyResolver, RequestIdentityContext};
use super::rules::{FailureMode, PolicySettings};
use crate::store::{CounterStore, StoreError};

/// Default bound on a policy's store calls.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The counter store answered.
    Store,
    /// The store failed and the policy let the request through.
    FailOpen,
    /// The store failed and the policy rejected the request.
    FailClosed,
}

/// The outcome of evaluating one policy for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The policy's quota
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the window resets
    pub reset_after: Duration,
    /// Wall-clock instant the window resets
    pub reset_at: DateTime<Utc>,
    /// Where this decision came from
    pub source: DecisionSource,
}

impl Decision {
    /// Whether quota headers should be emitted for this decision.
    pub fn has_quota(&self) -> bool {
        self.source == DecisionSource::Store
    }

    /// Seconds until reset, rounded up.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// A single, independently configured rate limit.
///
/// Policies share one counter store but never each other's counters: keys
/// are namespaced by the policy prefix. Evaluation is one atomic store
/// increment plus a TTL read, bounded together by `store_timeout`.
pub struct RateLimitPolicy {
    name: String,
    settings: PolicySettings,
    window: Duration,
    store: Arc<dyn CounterStore>,
    store_timeout: Duration,
}

impl std::fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimitPolicy {
    /// Create a policy backed by `store`.
    pub fn new(
        name: impl Into<String>,
        settings: PolicySettings,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        let window = settings.window_duration();
        Self {
            name: name.into(),
            settings,
            window,
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the bound on store calls made during evaluation.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    pub fn message(&self) -> &str {
        &self.settings.message
    }

    pub fn max_requests(&self) -> u64 {
        self.settings.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn key_resolver(&self) -> KeyResolver {
        self.settings.key_by
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.settings.failure_mode
    }

    /// The store key this policy counts a request against.
    pub fn counter_key(&self, ctx: &RequestIdentityContext) -> String {
        format!(
            "{}:{}",
            self.settings.effective_prefix(),
            self.settings.key_by.resolve(ctx)
        )
    }

    /// Count the request and decide whether it may proceed.
    ///
    /// The increment and the TTL read share one `store_timeout` budget. Once
    /// the increment has answered, the decision rests on its count alone; a
    /// failed TTL read only costs precision in the reset time.
    pub async fn evaluate(&self, ctx: &RequestIdentityContext) -> Decision {
        let key = self.counter_key(ctx);
        let deadline = Instant::now() + self.store_timeout;

        trace!(policy = %self.name, key = %key, "Evaluating rate limit");

        let count = match timeout_at(deadline, self.store.increment(&key, self.window)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => return self.store_failure(&key, e),
            Err(_) => return self.store_failure(&key, StoreError::Timeout(self.store_timeout)),
        };

        let ttl = match timeout_at(deadline, self.store.ttl(&key)).await {
            Ok(Ok(ttl)) => ttl,
            Ok(Err(e)) => {
                debug!(policy = %self.name, key = %key, error = %e, "Counter TTL unavailable");
                None
            }
            Err(_) => {
                debug!(policy = %self.name, key = %key, "Counter TTL read timed out");
                None
            }
        };

        self.decide(&key, count, ttl)
    }

    fn decide(&self, key: &str, count: u64, ttl: Option<Duration>) -> Decision {
        let limit = self.settings.max_requests;
        let allowed = count <= limit;
        // Missing when the TTL read failed or the counter expired in between
        let reset_after = ttl.unwrap_or(self.window);

        if !allowed {
            debug!(
                policy = %self.name,
                key = %key,
                count = count,
                limit = limit,
                "Rate limit exceeded"
            );
        }

        Decision {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            reset_after,
            reset_at: reset_at(reset_after),
            source: DecisionSource::Store,
        }
    }

    fn store_failure(&self, key: &str, error: StoreError) -> Decision {
        let limit = self.settings.max_requests;
        match self.settings.failure_mode {
            FailureMode::Open => {
                warn!(
                    policy = %self.name,
                    key = %key,
                    error = %error,
                    "Counter store unavailable, allowing request"
                );
                Decision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_after: self.window,
                    reset_at: reset_at(self.window),
                    source: DecisionSource::FailOpen,
                }
            }
            FailureMode::Closed => {
                warn!(
                    policy = %self.name,
                    key = %key,
                    error = %error,
                    "Counter store unavailable, rejecting request"
                );
                Decision {
                    allowed: false,
                    limit,
                    remaining: 0,
                    reset_after: self.window,
                    reset_at: reset_at(self.window),
                    source: DecisionSource::FailClosed,
                }
            }
        }
    }
}

fn reset_at(after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|after| Utc::now().checked_add_signed(after))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
