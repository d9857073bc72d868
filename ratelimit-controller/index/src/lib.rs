#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Holds rate-limit intent and turns it into versioned snapshots.
//!
//! Reconciliation loops mutate a [`PolicyStore`]; [`compile`] renders the
//! full store into a descriptor tree; a [`SnapshotRegistry`] validates and
//! commits that tree for a distribution label, notifying watchers.

mod compile;
mod controller;
pub mod metrics;
mod snapshot;
mod store;

#[cfg(test)]
mod tests;

pub use self::{
    compile::{compile, keys},
    controller::Controller,
    snapshot::{SnapshotError, SnapshotRegistry},
    store::{Policies, PolicyKind, PolicyStore},
};
