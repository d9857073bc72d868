#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Keeps the controller's artifacts in step with the upstream control plane.
//!
//! A [`Subscriber`] holds a lifecycle event stream open, reconnecting after
//! transient failures, and hands decoded events to an [`EventDispatcher`],
//! which applies them to an `ArtifactDeployer`.

mod decode;
mod dispatch;
pub mod mirror;
mod resync;
mod source;
mod subscriber;

pub use self::{
    decode::{decode, ALL_EVENTS},
    dispatch::EventDispatcher,
    mirror::{ArtifactIndex, Mirrored},
    resync::{key_mappings, resync, Catalog, CatalogApplication, FetchError, HttpCatalog, SecurityScheme},
    source::{EventSource, EventStream, GrpcEventSource, CONTROLLER_UUID_HEADER},
    subscriber::{is_reconnectable, HandleEvent, Subscriber},
};
