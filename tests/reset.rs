//! Bulk reset tests, including the coupling between the reset prefix list
//! and the prefixes the policies actually write under.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use turnstile::error::TurnstileError;
use turnstile::ratelimit::{
    KeyPrefix, PolicyRegistry, PolicySet, RequestIdentityContext, DEFAULT_KEY_PREFIX,
    DEFAULT_STORE_TIMEOUT,
};
use turnstile::reset::{
    pattern_for, reset_counters, reset_counters_with, PatternReport, RESET_PREFIXES,
};
use turnstile::store::{CounterStore, MemoryCounterStore, StoreError};

#[test]
fn test_reset_list_covers_every_key_prefix() {
    for prefix in KeyPrefix::ALL {
        assert!(
            RESET_PREFIXES.contains(&prefix.as_str()),
            "reset tool does not clear '{}' counters",
            prefix
        );
    }
    assert!(RESET_PREFIXES.contains(&DEFAULT_KEY_PREFIX));
}

#[test]
fn test_reset_list_covers_every_default_policy() {
    for (name, settings) in PolicySet::default().iter() {
        assert!(
            RESET_PREFIXES.contains(&settings.effective_prefix()),
            "policy '{}' writes under '{}', which the reset tool does not clear",
            name,
            settings.effective_prefix()
        );
    }
}

#[test]
fn test_reset_list_has_no_unknown_prefixes() {
    for prefix in RESET_PREFIXES {
        let known = *prefix == DEFAULT_KEY_PREFIX
            || KeyPrefix::ALL.iter().any(|p| p.as_str() == *prefix);
        assert!(known, "reset tool clears unknown prefix '{}'", prefix);
    }
}

#[tokio::test]
async fn test_reset_clears_counters_written_by_policies() {
    let store = Arc::new(MemoryCounterStore::new());
    let registry = PolicyRegistry::new(&PolicySet::default(), store.clone(), DEFAULT_STORE_TIMEOUT);

    for octet in 1..=3u8 {
        let ctx = RequestIdentityContext::anonymous([10, 0, 0, octet].into())
            .with_user(format!("u-{}", octet))
            .with_tenant_header("acme");
        for policy in registry.all() {
            policy.evaluate(&ctx).await;
        }
    }

    // Counters for an unprefixed policy land under the store default
    store
        .increment(&format!("{}:10.0.0.1", DEFAULT_KEY_PREFIX), Duration::from_secs(60))
        .await
        .unwrap();

    assert!(!store.is_empty());

    let reports = reset_counters(&*store, RESET_PREFIXES).await.unwrap();
    assert_eq!(reports.len(), RESET_PREFIXES.len());

    for report in &reports {
        assert_eq!(report.found as u64, report.deleted, "pattern {}", report.pattern);
    }
    let found: usize = reports.iter().map(|r| r.found).sum();
    // general, auth: 3 IPs; user, order: 3 users; tenant: one shared tenant; plus rl
    assert_eq!(found, 3 + 3 + 3 + 3 + 1 + 1);

    for prefix in RESET_PREFIXES {
        let remaining = store.keys_matching(&pattern_for(prefix)).await.unwrap();
        assert!(remaining.is_empty(), "{} still has keys", prefix);
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_reset_on_empty_store() {
    let store = MemoryCounterStore::new();
    let reports = reset_counters(&store, RESET_PREFIXES).await.unwrap();

    assert!(reports.iter().all(|r| r.found == 0 && r.deleted == 0));
}

/// Memory store that fails scanning or deleting one pattern.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryCounterStore,
    fail_scan: Option<&'static str>,
    fail_delete: Option<&'static str>,
}

#[async_trait]
impl CounterStore for FaultyStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        self.inner.increment(key, window).await
    }
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.inner.ttl(key).await
    }
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        if self.fail_scan == Some(pattern) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.keys_matching(pattern).await
    }
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let failing = self
            .fail_delete
            .and_then(|pattern| pattern.strip_suffix('*'))
            .is_some_and(|prefix| keys.iter().any(|k| k.starts_with(prefix)));
        if failing {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.delete(keys).await
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

async fn seed(store: &FaultyStore) {
    let window = Duration::from_secs(60);
    for prefix in RESET_PREFIXES {
        store
            .increment(&format!("{}:10.0.0.1", prefix), window)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_reset_delete_failure_is_fatal_and_reports_prior_patterns() {
    let store = FaultyStore {
        fail_delete: Some("tenant:*"),
        ..Default::default()
    };
    seed(&store).await;

    let mut reports: Vec<PatternReport> = Vec::new();
    let result = reset_counters_with(&store, RESET_PREFIXES, |r| reports.push(r.clone())).await;

    match result {
        Err(TurnstileError::Reset { pattern, source }) => {
            assert_eq!(pattern, "tenant:*");
            assert!(matches!(source, StoreError::Unavailable(_)));
        }
        other => panic!("expected a reset failure, got {:?}", other),
    }

    // Patterns cleared before the failure were reported with their counts
    let patterns: Vec<_> = reports.iter().map(|r| r.pattern.as_str()).collect();
    assert_eq!(patterns, vec!["general:*", "auth:*"]);
    assert!(reports.iter().all(|r| r.found == 1 && r.deleted == 1));

    assert_eq!(store.inner.count("general:10.0.0.1"), None);
    assert_eq!(store.inner.count("tenant:10.0.0.1"), Some(1));
    assert_eq!(store.inner.count("order:10.0.0.1"), Some(1));
}

#[tokio::test]
async fn test_reset_scan_failure_is_fatal() {
    let store = FaultyStore {
        fail_scan: Some("auth:*"),
        ..Default::default()
    };
    seed(&store).await;

    let err = reset_counters(&store, RESET_PREFIXES).await.unwrap_err();

    assert!(matches!(err, TurnstileError::Reset { ref pattern, .. } if pattern == "auth:*"));
    assert!(err.to_string().contains("auth:*"));
    assert_eq!(store.inner.count("general:10.0.0.1"), None);
    assert_eq!(store.inner.count("auth:10.0.0.1"), Some(1));
}
