//! The deployment's named policies, built over one shared store.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::chain::PolicyChain;
use super::policy::RateLimitPolicy;
use super::rules::{PolicySet, PolicySettings};
use crate::store::CounterStore;

/// One live policy per configured prefix.
///
/// All policies receive the same store handle; there is no global store.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    pub general: Arc<RateLimitPolicy>,
    pub auth: Arc<RateLimitPolicy>,
    pub tenant: Arc<RateLimitPolicy>,
    pub user: Arc<RateLimitPolicy>,
    pub order: Arc<RateLimitPolicy>,
}

impl PolicyRegistry {
    /// Build every policy in `set` against `store`.
    pub fn new(set: &PolicySet, store: Arc<dyn CounterStore>, store_timeout: Duration) -> Self {
        let build = |name: &str, settings: &PolicySettings| {
            info!(
                policy = name,
                prefix = settings.effective_prefix(),
                max_requests = settings.max_requests,
                window_secs = settings.window_duration().as_secs(),
                key_by = %settings.key_by,
                failure_mode = ?settings.failure_mode,
                "Registered rate limit policy"
            );
            Arc::new(
                RateLimitPolicy::new(name, settings.clone(), store.clone())
                    .with_store_timeout(store_timeout),
            )
        };

        Self {
            general: build("general", &set.general),
            auth: build("auth", &set.auth),
            tenant: build("tenant", &set.tenant),
            user: build("user", &set.user),
            order: build("order", &set.order),
        }
    }

    /// All policies in a fixed order.
    pub fn all(&self) -> [&Arc<RateLimitPolicy>; 5] {
        [&self.general, &self.auth, &self.tenant, &self.user, &self.order]
    }

    /// Login and registration: coarse IP limit, then the strict auth limit.
    pub fn auth_chain(&self) -> PolicyChain {
        PolicyChain::default()
            .with(self.general.clone())
            .with(self.auth.clone())
    }

    /// Authenticated reads: coarse IP limit, then the per-user limit.
    pub fn user_chain(&self) -> PolicyChain {
        PolicyChain::default()
            .with(self.general.clone())
            .with(self.user.clone())
    }

    /// Order creation: coarse IP limit, then the per-user order limit.
    pub fn order_chain(&self) -> PolicyChain {
        PolicyChain::default()
            .with(self.general.clone())
            .with(self.order.clone())
    }

    /// Tenant-scoped routes: coarse IP limit, then the per-tenant limit.
    pub fn tenant_chain(&self) -> PolicyChain {
        PolicyChain::default()
            .with(self.general.clone())
            .with(self.tenant.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::identity::RequestIdentityContext;
    use crate::ratelimit::policy::DEFAULT_STORE_TIMEOUT;
    use crate::store::MemoryCounterStore;

    #[tokio::test]
    async fn test_registry_chains() {
        let store = Arc::new(MemoryCounterStore::new());
        let registry = PolicyRegistry::new(&PolicySet::default(), store, DEFAULT_STORE_TIMEOUT);

        let names = |chain: PolicyChain| -> Vec<String> {
            chain.policies().iter().map(|p| p.name().to_string()).collect()
        };

        assert_eq!(names(registry.auth_chain()), ["general", "auth"]);
        assert_eq!(names(registry.user_chain()), ["general", "user"]);
        assert_eq!(names(registry.order_chain()), ["general", "order"]);
        assert_eq!(names(registry.tenant_chain()), ["general", "tenant"]);
    }

    #[tokio::test]
    async fn test_policies_share_store_without_interfering() {
        let store = Arc::new(MemoryCounterStore::new());
        let registry =
            PolicyRegistry::new(&PolicySet::default(), store.clone(), DEFAULT_STORE_TIMEOUT);
        let ctx = RequestIdentityContext::anonymous("10.0.0.1".parse().unwrap());

        for policy in registry.all() {
            policy.evaluate(&ctx).await;
        }

        for prefix in ["general", "auth", "tenant", "user", "order"] {
            assert_eq!(store.count(&format!("{}:10.0.0.1", prefix)), Some(1));
        }
    }
}
