use parking_lot::Mutex;
use prost_types::value::Kind;
use ratelimit_controller_api::core::Node;
use std::{collections::VecDeque, fmt};

/// The metadata field that distinguishes replicas sharing a node id.
pub const INSTANCE_IDENTIFIER: &str = "instanceIdentifier";

/// The number of node identities remembered for connection logging.
pub const MAX_RECENT_NODES: usize = 20;

/// Identifies a connected data-plane instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub id: String,
    pub instance: Option<String>,
}

/// Maps a connected node to the distribution label whose snapshots it
/// receives.
pub trait LabelResolver {
    fn resolve(&self, node: &NodeIdentity) -> String;
}

/// Resolves every node to the label equal to its node id.
#[derive(Copy, Clone, Debug, Default)]
pub struct NodeIdLabel;

/// A bounded, most-recently-seen set of node identities.
///
/// Used only to tell a node's first connection apart from a reconnect when
/// logging; it has no bearing on configuration delivery.
#[derive(Debug)]
pub struct NodeQueue {
    nodes: Mutex<VecDeque<NodeIdentity>>,
    capacity: usize,
}

// === impl NodeIdentity ===

impl NodeIdentity {
    pub fn from_node(node: Option<&Node>) -> Result<Self, tonic::Status> {
        let node = node.ok_or_else(|| tonic::Status::invalid_argument("missing node"))?;
        if node.id.is_empty() {
            return Err(tonic::Status::invalid_argument("missing node id"));
        }

        let instance = node
            .metadata
            .as_ref()
            .and_then(|md| md.fields.get(INSTANCE_IDENTIFIER))
            .and_then(|v| match &v.kind {
                Some(Kind::StringValue(s)) => Some(s.clone()),
                _ => None,
            });

        Ok(Self {
            id: node.id.clone(),
            instance,
        })
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}:{instance}", self.id),
            None => self.id.fmt(f),
        }
    }
}

// === impl NodeIdLabel ===

impl LabelResolver for NodeIdLabel {
    fn resolve(&self, node: &NodeIdentity) -> String {
        node.id.clone()
    }
}

// === impl NodeQueue ===

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
        }
    }

    /// Records that `node` connected, moving it to the most recent position.
    ///
    /// Returns true if the node was not already tracked.
    pub fn observe(&self, node: &NodeIdentity) -> bool {
        let mut nodes = self.nodes.lock();
        if let Some(idx) = nodes.iter().position(|n| n == node) {
            if let Some(n) = nodes.remove(idx) {
                nodes.push_back(n);
            }
            return false;
        }

        nodes.push_back(node.clone());
        while nodes.len() > self.capacity {
            nodes.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.nodes.lock().contains(node)
    }
}

impl Default for NodeQueue {
    fn default() -> Self {
        Self::new(MAX_RECENT_NODES)
    }
}
