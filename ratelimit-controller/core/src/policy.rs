//! Rate-limit intent as observed from cluster resources.

use crate::RateLimit;

/// The method value used for API-level limits.
pub const ALL_METHODS: &str = "ALL";

/// The methods a resource-level `ALL` method expands to.
pub const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Limits attached to one API, either as a whole or per resource.
///
/// When `resources` is non-empty the API-level limit is not compiled; the
/// two modes are mutually exclusive for a given API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiPolicy {
    pub organization: String,
    pub vhosts: Vec<String>,
    pub api_uuid: String,
    pub base_path: String,
    pub environment: String,
    pub api_level: Option<RateLimit>,
    pub resources: Vec<ResourcePolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub path: String,
    pub method: String,
    pub path_match: PathMatchType,
    pub rate_limit: RateLimit,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PathMatchType {
    #[default]
    Exact,
    PathPrefix,
    RegularExpression,
}

/// A free-form descriptor dimension scoped to an organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomPolicy {
    pub organization: String,
    pub key: String,
    pub value: String,
    pub rate_limit: RateLimit,
}

/// A usage plan applied to subscriptions of an organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionPolicy {
    pub name: String,
    pub organization: String,
    pub request_count: RateLimit,
    pub burst_control: Option<RateLimit>,

    /// When false, exceeding the quota is only reported, not enforced.
    pub stop_on_quota_reach: bool,
}

/// Token and request quotas for AI backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AiRateLimitPolicy {
    pub organization: String,
    pub name: String,
    pub request_token_count: Option<RateLimit>,
    pub response_token_count: Option<RateLimit>,
    pub total_token_count: Option<RateLimit>,
    pub request_count: Option<RateLimit>,

    /// Subscription-based quotas are counted per subscription rather than per
    /// backend.
    pub subscription_based: bool,
}

/// Addresses an API-level or resource-level policy for one vhost.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiKey {
    pub organization: String,
    pub vhost: String,
    pub api_id: String,
}

/// Addresses a custom policy within its organization.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomKey {
    pub organization: String,
    pub name: String,
}

/// Addresses a policy by the identity of the object that declared it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

// === impl ApiPolicy ===

impl ApiPolicy {
    /// Returns the keys this policy is stored under, one per vhost.
    pub fn keys(&self) -> impl Iterator<Item = ApiKey> + '_ {
        self.vhosts
            .iter()
            .map(move |vhost| ApiKey::new(&self.organization, vhost, &self.api_uuid))
    }
}

// === impl ApiKey ===

impl ApiKey {
    /// The key of an API as a whole: `vhost:uuid`.
    pub fn new(organization: &str, vhost: &str, api_uuid: &str) -> Self {
        Self {
            organization: organization.to_string(),
            vhost: vhost.to_string(),
            api_id: format!("{vhost}:{api_uuid}"),
        }
    }

    /// Returns true if this is the whole-API key of `api_uuid`, as opposed
    /// to the key of one of its operations.
    pub fn is_api(&self, api_uuid: &str) -> bool {
        self.api_id
            .strip_prefix(self.vhost.as_str())
            .and_then(|id| id.strip_prefix(':'))
            == Some(api_uuid)
    }

    /// The key of a single operation of an API: `vhost:uuid` + path + method.
    pub fn operation(
        organization: &str,
        vhost: &str,
        api_uuid: &str,
        path: &str,
        method: &str,
    ) -> Self {
        Self {
            organization: organization.to_string(),
            vhost: vhost.to_string(),
            api_id: format!("{vhost}:{api_uuid}{path}{method}"),
        }
    }
}

// === impl CustomKey ===

impl CustomKey {
    pub fn new(organization: &str, key: &str, value: &str) -> Self {
        Self {
            organization: organization.to_string(),
            name: format!("{key}_{value}"),
        }
    }
}

impl From<&CustomPolicy> for CustomKey {
    fn from(p: &CustomPolicy) -> Self {
        Self::new(&p.organization, &p.key, &p.value)
    }
}

// === impl ObjectKey ===

impl ObjectKey {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}
