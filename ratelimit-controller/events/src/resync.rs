use ratelimit_controller_core::{
    artifact::{Application, ApplicationKeyMapping, ApplicationMapping, ArtifactDeployer, Subscription},
    retry::{RetryError, RetryExecutor},
};
use serde::{de::DeserializeOwned, Deserialize};
use std::borrow::Cow;
use tracing::{error, info, warn};

/// Lists every artifact known to the upstream control plane.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync + 'static {
    async fn subscriptions(&self) -> Result<Vec<Subscription>, FetchError>;

    async fn applications(&self) -> Result<Vec<CatalogApplication>, FetchError>;

    async fn application_mappings(&self) -> Result<Vec<ApplicationMapping>, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Fetches the catalog over the control plane's REST API.
#[derive(Clone, Debug)]
pub struct HttpCatalog {
    client: reqwest::Client,
    base: reqwest::Url,
}

/// An application as listed by the catalog, along with the security schemes
/// from which its key mappings are derived.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogApplication {
    #[serde(flatten)]
    pub application: Application,
    #[serde(default)]
    pub security_schemes: Vec<SecurityScheme>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScheme {
    pub security_scheme: String,
    pub application_identifier: String,
    pub key_type: String,
    #[serde(rename = "envID")]
    pub env_id: String,
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

/// Replaces the deployer's artifacts with the catalog's current contents.
///
/// Each list is fetched with `retry`; a list that cannot be fetched is
/// skipped so that the others are still applied. Empty lists are not
/// deployed.
pub async fn resync<D>(catalog: &dyn Catalog, deployer: &D, retry: &RetryExecutor)
where
    D: ArtifactDeployer + ?Sized,
{
    info!("Fetching all artifacts from the control plane");

    match retry.execute(|| catalog.subscriptions()).await {
        Ok(subscriptions) if subscriptions.is_empty() => {}
        Ok(subscriptions) => {
            let n = subscriptions.len();
            match deployer.deploy_all_subscriptions(subscriptions).await {
                Ok(()) => info!(count = n, "Deployed subscriptions"),
                Err(error) => error!(%error, "Failed to deploy subscriptions"),
            }
        }
        Err(error) => warn!(%error, "Failed to fetch subscriptions"),
    }

    match retry.execute(|| catalog.applications()).await {
        Ok(applications) if applications.is_empty() => {}
        Ok(applications) => {
            let key_mappings = key_mappings(&applications);
            let applications = applications
                .into_iter()
                .map(|a| a.application)
                .collect::<Vec<_>>();

            let n = applications.len();
            match deployer.deploy_all_applications(applications).await {
                Ok(()) => info!(count = n, "Deployed applications"),
                Err(error) => error!(%error, "Failed to deploy applications"),
            }

            if !key_mappings.is_empty() {
                let n = key_mappings.len();
                match deployer.deploy_all_key_mappings(key_mappings).await {
                    Ok(()) => info!(count = n, "Deployed application key mappings"),
                    Err(error) => error!(%error, "Failed to deploy application key mappings"),
                }
            }
        }
        Err(error) => warn!(%error, "Failed to fetch applications"),
    }

    match retry.execute(|| catalog.application_mappings()).await {
        Ok(mappings) if mappings.is_empty() => {}
        Ok(mappings) => {
            let n = mappings.len();
            match deployer.deploy_all_application_mappings(mappings).await {
                Ok(()) => info!(count = n, "Deployed application mappings"),
                Err(error) => error!(%error, "Failed to deploy application mappings"),
            }
        }
        Err(error) => warn!(%error, "Failed to fetch application mappings"),
    }
}

/// Derives one key mapping per security scheme of each application.
pub fn key_mappings(applications: &[CatalogApplication]) -> Vec<ApplicationKeyMapping> {
    applications
        .iter()
        .flat_map(|app| {
            app.security_schemes
                .iter()
                .map(move |scheme| ApplicationKeyMapping {
                    application_uuid: app.application.uuid.clone(),
                    security_scheme: scheme.security_scheme.clone(),
                    application_identifier: scheme.application_identifier.clone(),
                    key_type: scheme.key_type.clone(),
                    env_id: scheme.env_id.clone(),
                    organization: app.application.organization.clone(),
                })
        })
        .collect()
}

// === impl HttpCatalog ===

impl HttpCatalog {
    pub fn new(client: reqwest::Client, base: reqwest::Url) -> Self {
        Self { client, base }
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, FetchError> {
        let url = self.url(path);
        tracing::debug!(%url, "Fetching");
        let rsp = self.client.get(url).send().await?;
        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }
        let List { list } = rsp.json::<List<T>>().await?;
        Ok(list)
    }

    fn url(&self, path: &str) -> reqwest::Url {
        let mut url = self.base.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{path}"));
        url
    }
}

#[async_trait::async_trait]
impl Catalog for HttpCatalog {
    async fn subscriptions(&self) -> Result<Vec<Subscription>, FetchError> {
        self.list("subscriptions").await
    }

    async fn applications(&self) -> Result<Vec<CatalogApplication>, FetchError> {
        self.list("applications").await
    }

    async fn application_mappings(&self) -> Result<Vec<ApplicationMapping>, FetchError> {
        self.list("applicationmappings").await
    }
}

// === impl FetchError ===

impl RetryError for FetchError {
    fn code(&self) -> Cow<'_, str> {
        match self {
            Self::Status { status, .. } => Cow::Owned(format!("HTTP_{}", status.as_u16())),
            Self::Transport(_) => Cow::Borrowed("TRANSPORT"),
        }
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    /// Client errors are not retried.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => !status.is_client_error(),
            Self::Transport(_) => true,
        }
    }
}
