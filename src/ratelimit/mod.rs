//! Rate limiting policies and their composition.

mod chain;
mod identity;
mod policy;
mod registry;
mod rules;

pub use chain::{ChainOutcome, PolicyChain};
pub use identity::{KeyResolver, RequestIdentityContext, UNKNOWN_IDENTITY};
pub use policy::{Decision, DecisionSource, RateLimitPolicy, DEFAULT_STORE_TIMEOUT};
pub use registry::PolicyRegistry;
pub use rules::{
    FailureMode, KeyPrefix, PolicyOverride, PolicySet, PolicySettings, TimeUnit, DEFAULT_KEY_PREFIX,
};
