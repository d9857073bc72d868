use crate::metrics::RegistryMetrics;
use anyhow::Result;
use parking_lot::Mutex;
use ratelimit_controller_core::{
    Descriptor, DiscoverSnapshot, RateLimitConfig, Snapshot, SnapshotStream, Version,
    RATE_LIMIT_DOMAIN,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::watch;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing::{debug, error, info};

/// Holds the latest committed snapshot for each distribution label.
///
/// Candidates are validated before they are committed; a candidate that
/// fails validation leaves the previously committed snapshot in place.
#[derive(Clone, Debug)]
pub struct SnapshotRegistry {
    inner: Arc<Mutex<Inner>>,
    metrics: RegistryMetrics,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("expected exactly one rate limit config resource, found {0}")]
    ResourceCount(usize),

    #[error("rate limit config domain must not be empty")]
    EmptyDomain,

    #[error("rate limit config name {name:?} does not match domain {domain:?}")]
    NameMismatch { name: String, domain: String },

    #[error("descriptor at {path:?} has an empty key")]
    EmptyKey { path: String },

    #[error("duplicate descriptor {key}={value} at {path:?}")]
    Duplicate {
        path: String,
        key: String,
        value: String,
    },
}

#[derive(Debug)]
struct Inner {
    version: u64,
    labels: HashMap<String, watch::Sender<Option<Arc<Snapshot>>>>,
}

// === impl SnapshotRegistry ===

impl SnapshotRegistry {
    pub fn new(metrics: RegistryMetrics) -> Self {
        // Seed versions from the wall clock so that a restarted controller
        // does not reissue versions a data plane may already hold.
        let version = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                version,
                labels: HashMap::default(),
            })),
            metrics,
        }
    }

    /// Compiles `descriptors` into a configuration resource and commits it
    /// for `label`. Returns false if the candidate was rejected.
    pub fn publish(&self, label: &str, descriptors: Vec<Descriptor>) -> bool {
        let config = RateLimitConfig {
            name: RATE_LIMIT_DOMAIN.to_string(),
            domain: RATE_LIMIT_DOMAIN.to_string(),
            descriptors,
        };
        match self.commit(label, vec![config]) {
            Ok(version) => {
                info!(%label, %version, "New rate limit snapshot committed");
                true
            }
            Err(error) => {
                error!(%label, %error, "Inconsistent rate limit snapshot");
                false
            }
        }
    }

    /// Commits an empty configuration so that `label` resolves before any
    /// policy exists.
    pub fn publish_empty(&self, label: &str) -> bool {
        self.publish(label, Vec::new())
    }

    /// Validates a set of resources and, if consistent, commits them as the
    /// next snapshot for `label`.
    pub fn commit(
        &self,
        label: &str,
        resources: Vec<RateLimitConfig>,
    ) -> Result<Version, SnapshotError> {
        let config = match validate(resources) {
            Ok(config) => config,
            Err(error) => {
                self.metrics.rejected(label);
                return Err(error);
            }
        };

        let mut inner = self.inner.lock();
        inner.version += 1;
        let version = Version(inner.version);
        let snapshot = Arc::new(Snapshot {
            version,
            label: label.to_string(),
            config,
        });
        inner
            .labels
            .entry(label.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(snapshot));
        drop(inner);

        self.metrics.published(label);
        Ok(version)
    }

    pub fn get(&self, label: &str) -> Option<Arc<Snapshot>> {
        self.inner
            .lock()
            .labels
            .get(label)
            .and_then(|tx| tx.borrow().clone())
    }

    /// Watches the snapshots committed for `label`. Labels need not have been
    /// published yet; the receiver observes `None` until they are.
    pub fn watch(&self, label: &str) -> watch::Receiver<Option<Arc<Snapshot>>> {
        let mut inner = self.inner.lock();
        if let Some(tx) = inner.labels.get(label) {
            return tx.subscribe();
        }

        inner.prune();
        debug!(%label, "Watching unpublished label");
        let (tx, rx) = watch::channel(None);
        inner.labels.insert(label.to_string(), tx);
        rx
    }

    /// Returns the labels that have a committed snapshot or are being
    /// watched.
    pub fn labels(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.prune();
        let mut labels = inner.labels.keys().cloned().collect::<Vec<_>>();
        labels.sort();
        labels
    }
}

// === impl Inner ===

impl Inner {
    /// Drops labels that were only ever watched once their watchers are gone.
    fn prune(&mut self) {
        self.labels
            .retain(|_, tx| tx.borrow().is_some() || tx.receiver_count() > 0);
    }
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::new(RegistryMetrics::default())
    }
}

#[async_trait::async_trait]
impl DiscoverSnapshot for SnapshotRegistry {
    async fn get_snapshot(&self, label: &str) -> Result<Option<Arc<Snapshot>>> {
        Ok(self.get(label))
    }

    async fn watch_snapshot(&self, label: &str) -> Result<SnapshotStream> {
        let rx = self.watch(label);
        Ok(Box::pin(WatchStream::new(rx).filter_map(|s| s)))
    }
}

// === validation ===

fn validate(resources: Vec<RateLimitConfig>) -> Result<RateLimitConfig, SnapshotError> {
    let [config]: [RateLimitConfig; 1] = resources
        .try_into()
        .map_err(|r: Vec<RateLimitConfig>| SnapshotError::ResourceCount(r.len()))?;

    if config.domain.is_empty() {
        return Err(SnapshotError::EmptyDomain);
    }
    if config.name != config.domain {
        return Err(SnapshotError::NameMismatch {
            name: config.name,
            domain: config.domain,
        });
    }
    validate_descriptors("", &config.descriptors)?;

    Ok(config)
}

fn validate_descriptors(path: &str, descriptors: &[Descriptor]) -> Result<(), SnapshotError> {
    let mut seen = HashSet::with_capacity(descriptors.len());
    for d in descriptors {
        if d.key.is_empty() {
            return Err(SnapshotError::EmptyKey {
                path: path.to_string(),
            });
        }
        if !seen.insert((d.key.as_str(), d.value.as_str())) {
            return Err(SnapshotError::Duplicate {
                path: path.to_string(),
                key: d.key.clone(),
                value: d.value.clone(),
            });
        }
        if !d.children.is_empty() {
            validate_descriptors(&format!("{path}/{}={}", d.key, d.value), &d.children)?;
        }
    }
    Ok(())
}
