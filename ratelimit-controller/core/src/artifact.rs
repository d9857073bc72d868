//! Lifecycle artifacts distributed by the upstream control plane.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub organization: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, rename = "timeStamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub uuid: String,
    pub organization: String,
    #[serde(default)]
    pub sub_status: String,
    #[serde(default)]
    pub subscribed_api: SubscribedApi,
    #[serde(default)]
    pub ratelimit_tier: String,
    #[serde(default, rename = "timeStamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedApi {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMapping {
    pub uuid: String,
    pub application_ref: String,
    pub subscription_ref: String,
    pub organization: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationKeyMapping {
    #[serde(rename = "applicationUUID")]
    pub application_uuid: String,
    pub security_scheme: String,
    pub application_identifier: String,
    pub key_type: String,
    #[serde(rename = "envID")]
    pub env_id: String,
    pub organization: String,
}

/// Whether an artifact was created, updated or deleted upstream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Created,
    Updated,
    Deleted,
}

/// A decoded lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The upstream asks the controller to refetch the full catalog.
    Resync,
    Application(Lifecycle, Application),
    Subscription(Lifecycle, Subscription),
    ApplicationMapping(Lifecycle, ApplicationMapping),
    KeyMapping(Lifecycle, ApplicationKeyMapping),
}

/// Persists lifecycle artifacts.
///
/// This is the only contract between the event subscriber and the backend
/// that stores artifacts, so backends may be swapped freely.
#[async_trait::async_trait]
pub trait ArtifactDeployer: Send + Sync {
    async fn deploy_application(&self, application: Application) -> Result<()>;
    async fn update_application(&self, application: Application) -> Result<()>;
    async fn delete_application(&self, uuid: &str) -> Result<()>;
    async fn deploy_all_applications(&self, applications: Vec<Application>) -> Result<()>;
    async fn get_all_applications(&self) -> Result<Vec<Application>>;

    async fn deploy_subscription(&self, subscription: Subscription) -> Result<()>;
    async fn update_subscription(&self, subscription: Subscription) -> Result<()>;
    async fn delete_subscription(&self, uuid: &str) -> Result<()>;
    async fn deploy_all_subscriptions(&self, subscriptions: Vec<Subscription>) -> Result<()>;
    async fn get_all_subscriptions(&self) -> Result<Vec<Subscription>>;

    async fn deploy_application_mapping(&self, mapping: ApplicationMapping) -> Result<()>;
    async fn update_application_mapping(&self, mapping: ApplicationMapping) -> Result<()>;
    async fn delete_application_mapping(&self, uuid: &str) -> Result<()>;
    async fn deploy_all_application_mappings(&self, mappings: Vec<ApplicationMapping>)
        -> Result<()>;
    async fn get_all_application_mappings(&self) -> Result<Vec<ApplicationMapping>>;

    async fn deploy_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()>;
    async fn update_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()>;
    async fn delete_key_mapping(&self, mapping: ApplicationKeyMapping) -> Result<()>;
    async fn deploy_all_key_mappings(&self, mappings: Vec<ApplicationKeyMapping>) -> Result<()>;
    async fn get_all_key_mappings(&self) -> Result<Vec<ApplicationKeyMapping>>;
}

// === impl ApplicationKeyMapping ===

impl ApplicationKeyMapping {
    /// Identifies a key mapping as `applicationUUID:envID:securityScheme:keyType`.
    pub fn key(&self) -> String {
        [
            self.application_uuid.as_str(),
            self.env_id.as_str(),
            self.security_scheme.as_str(),
            self.key_type.as_str(),
        ]
        .join(":")
    }
}

// === impl Event ===

impl Event {
    /// A short description of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Resync => "resync",
            Self::Application(..) => "application",
            Self::Subscription(..) => "subscription",
            Self::ApplicationMapping(..) => "application_mapping",
            Self::KeyMapping(..) => "key_mapping",
        }
    }
}
