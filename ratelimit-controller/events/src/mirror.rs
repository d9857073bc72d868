use anyhow::Result;
use parking_lot::RwLock;
use ratelimit_controller_core::artifact::{
    Application, ApplicationKeyMapping, ApplicationMapping, ArtifactDeployer, Subscription,
};
use std::{collections::BTreeMap, sync::Arc};

/// Holds the artifacts most recently deployed, keyed by identity.
#[derive(Clone, Debug, Default)]
pub struct ArtifactIndex(Arc<RwLock<Artifacts>>);

#[derive(Debug, Default)]
struct Artifacts {
    applications: BTreeMap<String, Application>,
    subscriptions: BTreeMap<String, Subscription>,
    application_mappings: BTreeMap<String, ApplicationMapping>,
    key_mappings: BTreeMap<String, ApplicationKeyMapping>,
}

/// Forwards artifacts to an inner deployer, recording each successful
/// change in an [`ArtifactIndex`].
#[derive(Clone, Debug)]
pub struct Mirrored<D> {
    inner: D,
    index: ArtifactIndex,
}

// === impl ArtifactIndex ===

impl ArtifactIndex {
    pub fn applications(&self) -> Vec<Application> {
        self.0.read().applications.values().cloned().collect()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.0.read().subscriptions.values().cloned().collect()
    }

    pub fn application_mappings(&self) -> Vec<ApplicationMapping> {
        self.0.read().application_mappings.values().cloned().collect()
    }

    pub fn key_mappings(&self) -> Vec<ApplicationKeyMapping> {
        self.0.read().key_mappings.values().cloned().collect()
    }

    fn put_application(&self, app: Application) {
        self.0.write().applications.insert(app.uuid.clone(), app);
    }

    fn remove_application(&self, uuid: &str) {
        let mut artifacts = self.0.write();
        artifacts.applications.remove(uuid);
        artifacts
            .key_mappings
            .retain(|_, km| km.application_uuid != uuid);
    }

    fn replace_applications(&self, apps: Vec<Application>) {
        self.0.write().applications = apps.into_iter().map(|a| (a.uuid.clone(), a)).collect();
    }

    fn put_subscription(&self, sub: Subscription) {
        self.0.write().subscriptions.insert(sub.uuid.clone(), sub);
    }

    fn remove_subscription(&self, uuid: &str) {
        self.0.write().subscriptions.remove(uuid);
    }

    fn replace_subscriptions(&self, subs: Vec<Subscription>) {
        self.0.write().subscriptions = subs.into_iter().map(|s| (s.uuid.clone(), s)).collect();
    }

    fn put_application_mapping(&self, mapping: ApplicationMapping) {
        self.0
            .write()
            .application_mappings
            .insert(mapping.uuid.clone(), mapping);
    }

    fn remove_application_mapping(&self, uuid: &str) {
        self.0.write().application_mappings.remove(uuid);
    }

    fn replace_application_mappings(&self, mappings: Vec<ApplicationMapping>) {
        self.0.write().application_mappings =
            mappings.into_iter().map(|m| (m.uuid.clone(), m)).collect();
    }

    fn put_key_mapping(&self, mapping: ApplicationKeyMapping) {
        self.0.write().key_mappings.insert(mapping.key(), mapping);
    }

    fn remove_key_mapping(&self, mapping: &ApplicationKeyMapping) {
        self.0.write().key_mappings.remove(&mapping.key());
    }

    fn replace_key_mappings(&self, mappings: Vec<ApplicationKeyMapping>) {
        self.0.write().key_mappings = mappings.into_iter().map(|m| (m.key(), m)).collect();
    }
}

#[async_trait::async_trait]
impl ArtifactDeployer for ArtifactIndex {
    async fn deploy_application(&self, application: Application) -> Result<()> {
        self.put_application(application);
        Ok(())
    }

    async fn update_application(&self, application: Application) -> Result<()> {
        self.put_application(application);
        Ok(())
    }

    async fn delete_application(&self, uuid: &str) -> Result<()> {
        self.remove_application(uuid);
        Ok(())
    }

    async fn deploy_all_applications(&self, applications: Vec<Application>) -> Result<()> {
        self.replace_applications(applications);
        Ok(())
    }

    async fn get_all_applications(&self) -> Result<Vec<Application>> {
        Ok(self.applications())
    }

    async fn deploy_subscription(&self, subscription: Subscription) -> Result<()> {
        self.put_subscription(subscription);
        Ok(())
    }

    async fn update_subscription(&self, subscription: Subscription) -> Result<()> {
        self.put_subscription(subscription);
        Ok(())
    }

    async fn delete_subscription(&self, uuid: &str) -> Result<()> {
        self.remove_subscription(uuid);
        Ok(())
    }

    async fn deploy_all_subscriptions(&self, subscriptions: Vec<Subscription>) -> Result<()> {
        self.replace_subscriptions(subscriptions);
        Ok(())
    }

    async fn get_all_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions())
    }

    async fn deploy_application_mapping(&self, mapping: ApplicationMapping) -> Result<()> {
        self.put_application_mapping(mapping);
        Ok(())
    }

    async fn update_application_mapping(&self, mapping: ApplicationMapping) -> Result<()> {
        self.put_application_mapping(mapping);
        Ok(())
    }

    async fn delete_application_mapping(&self, uuid: &str) -> Result<()> {
        self.remove_application_mapping(uuid);
        Ok(())
    }

    async fn deploy_all_application_mappings(
        &self,
        mappings: Vec<ApplicationMapping>,
    ) -> Result<()> {
        self.replace_application_mappings(mappings);
        Ok(())
    }

    async fn get_all_application_mappings(&self) -> Result<Vec<ApplicationMapping>> {
        Ok(self.application_mappings())
    }

    async fn deploy_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()> {
        self.put_key_mapping(mapping);
        Ok(())
    }

    async fn update_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()> {
        self.put_key_mapping(mapping);
        Ok(())
    }

    async fn delete_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()> {
        self.remove_key_mapping(&mapping);
        Ok(())
    }

    async fn deploy_all_key_mappings(&self, mappings: Vec<ApplicationKeyMapping>) -> Result<()> {
        self.replace_key_mappings(mappings);
        Ok(())
    }

    async fn get_all_key_mappings(&self) -> Result<Vec<ApplicationKeyMapping>> {
        Ok(self.key_mappings())
    }
}

// === impl Mirrored ===

impl<D> Mirrored<D> {
    pub fn new(inner: D, index: ArtifactIndex) -> Self {
        Self { inner, index }
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }
}

#[async_trait::async_trait]
impl<D: ArtifactDeployer> ArtifactDeployer for Mirrored<D> {
    async fn deploy_application(&self, application: Application) -> Result<()> {
        self.inner.deploy_application(application.clone()).await?;
        self.index.put_application(application);
        Ok(())
    }

    async fn update_application(&self, application: Application) -> Result<()> {
        self.inner.update_application(application.clone()).await?;
        self.index.put_application(application);
        Ok(())
    }

    async fn delete_application(&self, uuid: &str) -> Result<()> {
        self.inner.delete_application(uuid).await?;
        self.index.remove_application(uuid);
        Ok(())
    }

    async fn deploy_all_applications(&self, applications: Vec<Application>) -> Result<()> {
        self.inner
            .deploy_all_applications(applications.clone())
            .await?;
        self.index.replace_applications(applications);
        Ok(())
    }

    async fn get_all_applications(&self) -> Result<Vec<Application>> {
        self.inner.get_all_applications().await
    }

    async fn deploy_subscription(&self, subscription: Subscription) -> Result<()> {
        self.inner.deploy_subscription(subscription.clone()).await?;
        self.index.put_subscription(subscription);
        Ok(())
    }

    async fn update_subscription(&self, subscription: Subscription) -> Result<()> {
        self.inner.update_subscription(subscription.clone()).await?;
        self.index.put_subscription(subscription);
        Ok(())
    }

    async fn delete_subscription(&self, uuid: &str) -> Result<()> {
        self.inner.delete_subscription(uuid).await?;
        self.index.remove_subscription(uuid);
        Ok(())
    }

    async fn deploy_all_subscriptions(&self, subscriptions: Vec<Subscription>) -> Result<()> {
        self.inner
            .deploy_all_subscriptions(subscriptions.clone())
            .await?;
        self.index.replace_subscriptions(subscriptions);
        Ok(())
    }

    async fn get_all_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.inner.get_all_subscriptions().await
    }

    async fn deploy_application_mapping(&self, mapping: ApplicationMapping) -> Result<()> {
        self.inner.deploy_application_mapping(mapping.clone()).await?;
        self.index.put_application_mapping(mapping);
        Ok(())
    }

    async fn update_application_mapping(&self, mapping: ApplicationMapping) -> Result<()> {
        self.inner.update_application_mapping(mapping.clone()).await?;
        self.index.put_application_mapping(mapping);
        Ok(())
    }

    async fn delete_application_mapping(&self, uuid: &str) -> Result<()> {
        self.inner.delete_application_mapping(uuid).await?;
        self.index.remove_application_mapping(uuid);
        Ok(())
    }

    async fn deploy_all_application_mappings(
        &self,
        mappings: Vec<ApplicationMapping>,
    ) -> Result<()> {
        self.inner
            .deploy_all_application_mappings(mappings.clone())
            .await?;
        self.index.replace_application_mappings(mappings);
        Ok(())
    }

    async fn get_all_application_mappings(&self) -> Result<Vec<ApplicationMapping>> {
        self.inner.get_all_application_mappings().await
    }

    async fn deploy_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()> {
        self.inner.deploy_key_mapping(mapping.clone()).await?;
        self.index.put_key_mapping(mapping);
        Ok(())
    }

    async fn update_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()> {
        self.inner.update_key_mapping(mapping.clone()).await?;
        self.index.put_key_mapping(mapping);
        Ok(())
    }

    async fn delete_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()> {
        self.inner.delete_key_mapping(mapping.clone()).await?;
        self.index.remove_key_mapping(&mapping);
        Ok(())
    }

    async fn deploy_all_key_mappings(&self, mappings: Vec<ApplicationKeyMapping>) -> Result<()> {
        self.inner.deploy_all_key_mappings(mappings.clone()).await?;
        self.index.replace_key_mappings(mappings);
        Ok(())
    }

    async fn get_all_key_mappings(&self) -> Result<Vec<ApplicationKeyMapping>> {
        self.inner.get_all_key_mappings().await
    }
}
