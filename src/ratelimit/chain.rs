//! Composition of several policies over the same request.

use std::sync::Arc;

use tracing::debug;

use super::identity::RequestIdentityContext;
use super::policy::{Decision, RateLimitPolicy};

/// Result of running a request through a chain of policies.
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// Every policy allowed the request.
    Admitted {
        /// Decisions in evaluation order
        decisions: Vec<Decision>,
    },
    /// A policy denied the request. Later policies were not evaluated.
    Denied {
        /// Name of the denying policy
        policy: String,
        /// Message configured on the denying policy
        message: String,
        /// The denying decision
        decision: Decision,
    },
}

impl ChainOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ChainOutcome::Admitted { .. })
    }

    /// The decision whose quota should be reported to the client.
    ///
    /// For a denial it is the denying decision. For an admission it is the
    /// store-backed decision with the least quota left.
    pub fn reported(&self) -> Option<&Decision> {
        match self {
            ChainOutcome::Denied { decision, .. } => Some(decision),
            ChainOutcome::Admitted { decisions } => decisions
                .iter()
                .filter(|d| d.has_quota())
                .min_by_key(|d| d.remaining),
        }
    }
}

/// An ordered list of policies that must all pass.
#[derive(Debug, Clone, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<RateLimitPolicy>>,
}

impl PolicyChain {
    pub fn new(policies: Vec<Arc<RateLimitPolicy>>) -> Self {
        Self { policies }
    }

    /// Append a policy, evaluated after the existing ones.
    pub fn with(mut self, policy: Arc<RateLimitPolicy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn policies(&self) -> &[Arc<RateLimitPolicy>] {
        &self.policies
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Evaluate policies in order, stopping at the first denial.
    pub async fn evaluate(&self, ctx: &RequestIdentityContext) -> ChainOutcome {
        let mut decisions = Vec::with_capacity(self.policies.len());

        for policy in &self.policies {
            let decision = policy.evaluate(ctx).await;

            if !decision.allowed {
                debug!(
                    policy = %policy.name(),
                    skipped = self.policies.len() - decisions.len() - 1,
                    "Request denied by policy chain"
                );
                return ChainOutcome::Denied {
                    policy: policy.name().to_string(),
                    message: policy.message().to_string(),
                    decision,
                };
            }

            decisions.push(decision);
        }

        ChainOutcome::Admitted { decisions }
    }
}
