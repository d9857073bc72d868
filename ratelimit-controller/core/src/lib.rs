#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod artifact;
pub mod descriptor;
pub mod policy;
mod rate_limit;
pub mod retry;

pub use self::{
    descriptor::{Descriptor, DiscoverSnapshot, RateLimitConfig, Snapshot, SnapshotStream, Version},
    rate_limit::{RateLimit, Unit},
    retry::RetryExecutor,
};

/// The domain (and name) of the rate-limit configuration served to data planes.
pub const RATE_LIMIT_DOMAIN: &str = "Default";

/// Returns the canonical upper-case name of a gRPC status code.
pub fn grpc_code_str(code: tonic::Code) -> &'static str {
    use tonic::Code::*;
    match code {
        Ok => "OK",
        Cancelled => "CANCELLED",
        Unknown => "UNKNOWN",
        InvalidArgument => "INVALID_ARGUMENT",
        DeadlineExceeded => "DEADLINE_EXCEEDED",
        NotFound => "NOT_FOUND",
        AlreadyExists => "ALREADY_EXISTS",
        PermissionDenied => "PERMISSION_DENIED",
        ResourceExhausted => "RESOURCE_EXHAUSTED",
        FailedPrecondition => "FAILED_PRECONDITION",
        Aborted => "ABORTED",
        OutOfRange => "OUT_OF_RANGE",
        Unimplemented => "UNIMPLEMENTED",
        Internal => "INTERNAL",
        Unavailable => "UNAVAILABLE",
        DataLoss => "DATA_LOSS",
        Unauthenticated => "UNAUTHENTICATED",
    }
}
