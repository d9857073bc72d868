use crate::RateLimit;
use anyhow::Result;
use futures::prelude::*;
use std::{fmt, pin::Pin, sync::Arc};

/// A node of the compiled rate-limit configuration tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub key: String,
    pub value: String,
    pub rate_limit: Option<RateLimit>,
    pub shadow_mode: bool,
    pub children: Vec<Descriptor>,
}

/// A rate-limit configuration resource as served to data planes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub name: String,
    pub domain: String,
    pub descriptors: Vec<Descriptor>,
}

/// Identifies a committed snapshot. Versions increase monotonically within a
/// registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(pub u64);

/// An immutable, versioned configuration committed for a label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub version: Version,
    pub label: String,
    pub config: RateLimitConfig,
}

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Arc<Snapshot>> + Send + Sync>>;

/// Models snapshot discovery for a distribution label.
#[async_trait::async_trait]
pub trait DiscoverSnapshot {
    /// Returns the snapshot currently committed for `label`, if any.
    async fn get_snapshot(&self, label: &str) -> Result<Option<Arc<Snapshot>>>;

    /// Watches the snapshots committed for `label`. The stream yields the
    /// current snapshot (once one exists) followed by every later one.
    async fn watch_snapshot(&self, label: &str) -> Result<SnapshotStream>;
}

// === impl Descriptor ===

impl Descriptor {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_shadow_mode(mut self, shadow_mode: bool) -> Self {
        self.shadow_mode = shadow_mode;
        self
    }

    pub fn with_children(mut self, children: Vec<Descriptor>) -> Self {
        self.children = children;
        self
    }

    /// Finds the direct child with the given key and value.
    pub fn child(&self, key: &str, value: &str) -> Option<&Descriptor> {
        self.children
            .iter()
            .find(|d| d.key == key && d.value == value)
    }
}

// === impl RateLimitConfig ===

impl RateLimitConfig {
    /// Finds the top-level descriptor with the given key and value.
    pub fn descriptor(&self, key: &str, value: &str) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|d| d.key == key && d.value == value)
    }
}

// === impl Version ===

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for Version {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// === impl Snapshot ===

impl Snapshot {
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.config.descriptors
    }
}
