use crate::{compile, PolicyStore, SnapshotRegistry};
use ratelimit_controller_core::policy::{
    AiRateLimitPolicy, ApiPolicy, CustomKey, CustomPolicy, ObjectKey, SubscriptionPolicy,
};
use tracing::{debug, instrument};

/// Couples the policy store with the snapshot registry.
///
/// Reconcilers apply and delete policies through a `Controller` and then
/// call [`Controller::sync`] to publish the resulting tree for a label.
#[derive(Clone, Debug, Default)]
pub struct Controller {
    store: PolicyStore,
    registry: SnapshotRegistry,
}

impl Controller {
    pub fn new(store: PolicyStore, registry: SnapshotRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn registry(&self) -> &SnapshotRegistry {
        &self.registry
    }

    pub fn apply_api(&self, policy: ApiPolicy) {
        self.store.apply_api(policy);
    }

    pub fn delete_api(&self, organization: &str, api_uuid: &str) -> bool {
        self.store.delete_api(organization, api_uuid) > 0
    }

    pub fn apply_custom(&self, policy: CustomPolicy) -> bool {
        self.store.upsert(CustomKey::from(&policy), policy)
    }

    pub fn delete_custom(&self, key: &CustomKey) -> bool {
        self.store.delete::<CustomPolicy>(key).is_some()
    }

    pub fn apply_subscription(&self, key: ObjectKey, policy: SubscriptionPolicy) -> bool {
        self.store.upsert(key, policy)
    }

    pub fn delete_subscription(&self, key: &ObjectKey) -> bool {
        self.store.delete::<SubscriptionPolicy>(key).is_some()
    }

    pub fn apply_ai(&self, key: ObjectKey, policy: AiRateLimitPolicy) -> bool {
        self.store.upsert(key, policy)
    }

    pub fn delete_ai(&self, key: &ObjectKey) -> bool {
        self.store.delete::<AiRateLimitPolicy>(key).is_some()
    }

    /// Compiles the current store contents and publishes them for `label`.
    ///
    /// Returns false if the registry rejected the candidate, in which case
    /// the previously committed snapshot continues to be served.
    #[instrument(skip(self))]
    pub fn sync(&self, label: &str) -> bool {
        let policies = self.store.snapshot();
        let descriptors = compile(&policies);
        debug!(organizations = descriptors.len(), "Compiled policies");
        self.registry.publish(label, descriptors)
    }
}
