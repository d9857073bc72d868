#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod discovery;
pub mod metrics;
mod node;
mod proto;

pub use self::{
    discovery::{BoxDiscoveryStream, RlsDiscoveryServer},
    node::{LabelResolver, NodeIdLabel, NodeIdentity, NodeQueue, MAX_RECENT_NODES},
};
