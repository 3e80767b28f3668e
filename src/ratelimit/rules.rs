//! Rate limit policy configuration.
//!
//! A deployment runs a fixed set of policies, one per key prefix. Each can be
//! tuned independently for quota, window, identity rule and outage behavior.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::identity::KeyResolver;
use crate::error::{Result, TurnstileError};

/// Prefix used by the counter store for policies without an explicit prefix.
pub const DEFAULT_KEY_PREFIX: &str = "rl";

/// The known counter key prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPrefix {
    General,
    Auth,
    Tenant,
    User,
    Order,
}

impl KeyPrefix {
    pub const ALL: [KeyPrefix; 5] = [
        KeyPrefix::General,
        KeyPrefix::Auth,
        KeyPrefix::Tenant,
        KeyPrefix::User,
        KeyPrefix::Order,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::General => "general",
            KeyPrefix::Auth => "auth",
            KeyPrefix::Tenant => "tenant",
            KeyPrefix::User => "user",
            KeyPrefix::Order => "order",
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time unit for a policy window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// What a policy does when the counter store cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through and log a warning.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

/// Settings for a single policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySettings {
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length, in `unit`s
    pub window: u64,
    /// Unit of `window`
    pub unit: TimeUnit,
    /// Counter key prefix; the store default is used when unset
    pub prefix: Option<KeyPrefix>,
    /// How the counter identity is chosen
    pub key_by: KeyResolver,
    /// Message returned to throttled clients
    pub message: String,
    /// Behavior on store outage
    pub failure_mode: FailureMode,
}

/// Configured changes to one policy. Unset fields keep the policy's default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    pub max_requests: Option<u64>,
    pub window: Option<u64>,
    pub unit: Option<TimeUnit>,
    pub prefix: Option<KeyPrefix>,
    pub key_by: Option<KeyResolver>,
    pub message: Option<String>,
    pub failure_mode: Option<FailureMode>,
}

impl PolicyOverride {
    /// Apply the configured fields on top of `base`.
    pub fn apply(self, mut base: PolicySettings) -> PolicySettings {
        if let Some(max_requests) = self.max_requests {
            base.max_requests = max_requests;
        }
        if let Some(window) = self.window {
            base.window = window;
        }
        if let Some(unit) = self.unit {
            base.unit = unit;
        }
        if let Some(prefix) = self.prefix {
            base.prefix = Some(prefix);
        }
        if let Some(key_by) = self.key_by {
            base.key_by = key_by;
        }
        if let Some(message) = self.message {
            base.message = message;
        }
        if let Some(failure_mode) = self.failure_mode {
            base.failure_mode = failure_mode;
        }
        base
    }
}

fn default_message() -> String {
    "Too many requests, please try again later.".to_string()
}

impl PolicySettings {
    /// Create settings with the default message and fail-open behavior.
    pub fn new(max_requests: u64, window: u64, unit: TimeUnit) -> Self {
        Self {
            max_requests,
            window,
            unit,
            prefix: None,
            key_by: KeyResolver::Ip,
            message: default_message(),
            failure_mode: FailureMode::Open,
        }
    }

    pub fn with_prefix(mut self, prefix: KeyPrefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn keyed_by(mut self, resolver: KeyResolver) -> Self {
        self.key_by = resolver;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Total window length, saturating at `u64::MAX` seconds.
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.unit.duration().as_secs().saturating_mul(self.window))
    }

    /// The prefix this policy writes counters under.
    pub fn effective_prefix(&self) -> &'static str {
        self.prefix.map(|p| p.as_str()).unwrap_or(DEFAULT_KEY_PREFIX)
    }

    /// Check the settings for values that would make the policy meaningless.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(TurnstileError::Config(format!(
                "policy '{}': max_requests must be greater than zero",
                name
            )));
        }
        if self.window == 0 {
            return Err(TurnstileError::Config(format!(
                "policy '{}': window must be greater than zero",
                name
            )));
        }
        if u32::try_from(self.window).is_err() {
            return Err(TurnstileError::Config(format!(
                "policy '{}': window {} is too large",
                name, self.window
            )));
        }
        Ok(())
    }
}

/// The full set of policies a deployment runs.
///
/// Configuration only carries overrides: each named policy starts from its
/// own default and takes whatever fields are set for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PolicySetOverrides")]
pub struct PolicySet {
    pub general: PolicySettings,
    pub auth: PolicySettings,
    pub tenant: PolicySettings,
    pub user: PolicySettings,
    pub order: PolicySettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PolicySetOverrides {
    general: PolicyOverride,
    auth: PolicyOverride,
    tenant: PolicyOverride,
    user: PolicyOverride,
    order: PolicyOverride,
}

impl From<PolicySetOverrides> for PolicySet {
    fn from(overrides: PolicySetOverrides) -> Self {
        Self {
            general: overrides.general.apply(Self::default_general()),
            auth: overrides.auth.apply(Self::default_auth()),
            tenant: overrides.tenant.apply(Self::default_tenant()),
            user: overrides.user.apply(Self::default_user()),
            order: overrides.order.apply(Self::default_order()),
        }
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            general: Self::default_general(),
            auth: Self::default_auth(),
            tenant: Self::default_tenant(),
            user: Self::default_user(),
            order: Self::default_order(),
        }
    }
}

impl PolicySet {
    fn default_general() -> PolicySettings {
        PolicySettings::new(100, 15, TimeUnit::Minute)
            .with_prefix(KeyPrefix::General)
            .with_message("Too many requests from this IP, please try again later.")
    }

    fn default_auth() -> PolicySettings {
        PolicySettings::new(5, 15, TimeUnit::Minute)
            .with_prefix(KeyPrefix::Auth)
            .with_message("Too many authentication attempts, please try again later.")
    }

    fn default_tenant() -> PolicySettings {
        PolicySettings::new(1000, 15, TimeUnit::Minute)
            .with_prefix(KeyPrefix::Tenant)
            .keyed_by(KeyResolver::Tenant)
            .with_message("Too many requests for this tenant, please try again later.")
    }

    fn default_user() -> PolicySettings {
        PolicySettings::new(300, 15, TimeUnit::Minute)
            .with_prefix(KeyPrefix::User)
            .keyed_by(KeyResolver::User)
            .with_message("Too many requests from this account, please try again later.")
    }

    fn default_order() -> PolicySettings {
        PolicySettings::new(20, 1, TimeUnit::Hour)
            .with_prefix(KeyPrefix::Order)
            .keyed_by(KeyResolver::User)
            .with_message("Too many orders placed, please try again later.")
    }

    /// Load a policy set from a YAML string. Omitted policies and fields keep
    /// their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let set: PolicySet = serde_yaml::from_str(yaml).map_err(|e| {
            TurnstileError::Config(format!("Failed to parse rate limit policies: {}", e))
        })?;
        set.validate()?;
        Ok(set)
    }

    /// Iterate over `(name, settings)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PolicySettings)> {
        [
            ("general", &self.general),
            ("auth", &self.auth),
            ("tenant", &self.tenant),
            ("user", &self.user),
            ("order", &self.order),
        ]
        .into_iter()
    }

    /// Validate every policy, and reject two policies sharing a prefix.
    pub fn validate(&self) -> Result<()> {
        let mut owners: HashMap<&'static str, &'static str> = HashMap::new();
        for (name, settings) in self.iter() {
            settings.validate(name)?;

            let prefix = settings.effective_prefix();
            if let Some(other) = owners.insert(prefix, name) {
                return Err(TurnstileError::Config(format!(
                    "policies '{}' and '{}' both count under prefix '{}'",
                    other, name, prefix
                )));
            }
        }
        Ok(())
    }
}
