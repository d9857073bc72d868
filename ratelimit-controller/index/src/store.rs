use crate::metrics::StoreMetrics;
use parking_lot::RwLock;
use ratelimit_controller_core::policy::{
    AiRateLimitPolicy, ApiKey, ApiPolicy, CustomKey, CustomPolicy, ObjectKey, SubscriptionPolicy,
};
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    sync::Arc,
};
use tracing::debug;

/// The full set of rate-limit intent known to the controller.
///
/// Every table is ordered so that iterating a `Policies` value is
/// deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Policies {
    api: BTreeMap<ApiKey, ApiPolicy>,
    custom: BTreeMap<CustomKey, CustomPolicy>,
    subscription: BTreeMap<ObjectKey, SubscriptionPolicy>,
    ai: BTreeMap<ObjectKey, AiRateLimitPolicy>,
}

/// A kind of policy held by the store, addressed by its own key type.
pub trait PolicyKind: Clone + PartialEq + Send + Sync + 'static {
    type Key: Clone + Ord + fmt::Debug + Send + Sync;

    const KIND: &'static str;

    fn table(policies: &Policies) -> &BTreeMap<Self::Key, Self>;

    fn table_mut(policies: &mut Policies) -> &mut BTreeMap<Self::Key, Self>;
}

/// A shared, thread-safe handle to the policy tables.
///
/// Each operation holds the lock only for the duration of an in-memory map
/// update, so readers never observe a partially applied change.
#[derive(Clone, Debug)]
pub struct PolicyStore {
    policies: Arc<RwLock<Policies>>,
    metrics: StoreMetrics,
}

// === impl Policies ===

impl Policies {
    pub fn apis(&self) -> impl Iterator<Item = (&ApiKey, &ApiPolicy)> {
        self.api.iter()
    }

    pub fn customs(&self) -> impl Iterator<Item = &CustomPolicy> {
        self.custom.values()
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &SubscriptionPolicy> {
        self.subscription.values()
    }

    pub fn ai_policies(&self) -> impl Iterator<Item = &AiRateLimitPolicy> {
        self.ai.values()
    }

    pub fn is_empty(&self) -> bool {
        self.api.is_empty()
            && self.custom.is_empty()
            && self.subscription.is_empty()
            && self.ai.is_empty()
    }
}

// === impl PolicyKind ===

impl PolicyKind for ApiPolicy {
    type Key = ApiKey;

    const KIND: &'static str = "api";

    fn table(policies: &Policies) -> &BTreeMap<ApiKey, Self> {
        &policies.api
    }

    fn table_mut(policies: &mut Policies) -> &mut BTreeMap<ApiKey, Self> {
        &mut policies.api
    }
}

impl PolicyKind for CustomPolicy {
    type Key = CustomKey;

    const KIND: &'static str = "custom";

    fn table(policies: &Policies) -> &BTreeMap<CustomKey, Self> {
        &policies.custom
    }

    fn table_mut(policies: &mut Policies) -> &mut BTreeMap<CustomKey, Self> {
        &mut policies.custom
    }
}

impl PolicyKind for SubscriptionPolicy {
    type Key = ObjectKey;

    const KIND: &'static str = "subscription";

    fn table(policies: &Policies) -> &BTreeMap<ObjectKey, Self> {
        &policies.subscription
    }

    fn table_mut(policies: &mut Policies) -> &mut BTreeMap<ObjectKey, Self> {
        &mut policies.subscription
    }
}

impl PolicyKind for AiRateLimitPolicy {
    type Key = ObjectKey;

    const KIND: &'static str = "ai";

    fn table(policies: &Policies) -> &BTreeMap<ObjectKey, Self> {
        &policies.ai
    }

    fn table_mut(policies: &mut Policies) -> &mut BTreeMap<ObjectKey, Self> {
        &mut policies.ai
    }
}

// === impl PolicyStore ===

impl PolicyStore {
    pub fn new(metrics: StoreMetrics) -> Self {
        Self {
            policies: Default::default(),
            metrics,
        }
    }

    /// Inserts or fully replaces the policy stored under `key`.
    ///
    /// Returns false if an identical policy was already stored.
    pub fn upsert<P: PolicyKind>(&self, key: P::Key, policy: P) -> bool {
        let mut policies = self.policies.write();
        let table = P::table_mut(&mut policies);
        match table.entry(key) {
            Entry::Vacant(entry) => {
                debug!(kind = P::KIND, key = ?entry.key(), "Adding policy");
                entry.insert(policy);
            }
            Entry::Occupied(mut entry) => {
                if *entry.get() == policy {
                    debug!(kind = P::KIND, key = ?entry.key(), "No changes");
                    return false;
                }
                debug!(kind = P::KIND, key = ?entry.key(), "Replacing policy");
                entry.insert(policy);
            }
        }
        let size = table.len();
        drop(policies);

        self.metrics.applied(P::KIND, size);
        true
    }

    /// Removes the policy stored under `key`. Removing an absent key is a
    /// no-op.
    pub fn delete<P: PolicyKind>(&self, key: &P::Key) -> Option<P> {
        let mut policies = self.policies.write();
        let table = P::table_mut(&mut policies);
        let removed = table.remove(key);
        let size = table.len();
        drop(policies);

        match removed {
            Some(policy) => {
                debug!(kind = P::KIND, ?key, "Removed policy");
                self.metrics.deleted(P::KIND, size);
                Some(policy)
            }
            None => {
                debug!(kind = P::KIND, ?key, "Policy not found; nothing to delete");
                None
            }
        }
    }

    pub fn get<P: PolicyKind>(&self, key: &P::Key) -> Option<P> {
        P::table(&self.policies.read()).get(key).cloned()
    }

    /// Stores an API policy under each of its vhosts, replacing every
    /// whole-API entry previously stored for the same API (including vhosts
    /// the policy no longer lists) in a single critical section. Entries
    /// stored under operation keys are left untouched.
    pub fn apply_api(&self, policy: ApiPolicy) {
        let mut policies = self.policies.write();
        let stale = Self::remove_api(&mut policies, &policy.organization, &policy.api_uuid);
        for key in policy.keys() {
            policies.api.insert(key, policy.clone());
        }
        let size = policies.api.len();
        drop(policies);

        debug!(
            organization = %policy.organization,
            api = %policy.api_uuid,
            vhosts = policy.vhosts.len(),
            replaced = stale,
            "Applied API policy",
        );
        self.metrics.applied(ApiPolicy::KIND, size);
    }

    /// Removes the whole-API entries stored for an API across all vhosts.
    /// Operation entries are removed individually with [`Self::delete`].
    /// Returns the number of entries removed.
    pub fn delete_api(&self, organization: &str, api_uuid: &str) -> usize {
        let mut policies = self.policies.write();
        let removed = Self::remove_api(&mut policies, organization, api_uuid);
        let size = policies.api.len();
        drop(policies);

        if removed > 0 {
            debug!(%organization, api = %api_uuid, removed, "Removed API policy");
            self.metrics.deleted(ApiPolicy::KIND, size);
        }
        removed
    }

    /// Returns a consistent copy of all policies.
    pub fn snapshot(&self) -> Policies {
        self.policies.read().clone()
    }

    fn remove_api(policies: &mut Policies, organization: &str, api_uuid: &str) -> usize {
        let before = policies.api.len();
        policies
            .api
            .retain(|key, _| !(key.organization == organization && key.is_api(api_uuid)));
        before - policies.api.len()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new(StoreMetrics::default())
    }
}
