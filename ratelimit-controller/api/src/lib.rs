#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(clippy::derive_partial_eq_without_eq)]

//! Protobuf bindings for the rate-limit configuration discovery service and
//! the control-plane lifecycle event stream.

pub mod google {
    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }
}

pub mod envoy {
    pub mod config {
        pub mod core {
            pub mod v3 {
                tonic::include_proto!("envoy.config.core.v3");
            }
        }
    }

    pub mod service {
        pub mod discovery {
            pub mod v3 {
                tonic::include_proto!("envoy.service.discovery.v3");
            }
        }
    }
}

pub mod ratelimit {
    pub mod config {
        pub mod ratelimit {
            pub mod v3 {
                tonic::include_proto!("ratelimit.config.ratelimit.v3");
            }
        }
    }

    pub mod service {
        pub mod ratelimit {
            pub mod v3 {
                tonic::include_proto!("ratelimit.service.ratelimit.v3");
            }
        }
    }

    pub mod controlplane {
        pub mod v1 {
            tonic::include_proto!("ratelimit.controlplane.v1");
        }
    }
}

pub use self::envoy::{
    config::core::v3 as core,
    service::discovery::v3 as discovery,
};
pub use self::ratelimit::{
    config::ratelimit::v3 as config, controlplane::v1 as events,
    service::ratelimit::v3 as rls,
};

/// The type URL of the rate-limit configuration resource.
pub const RATE_LIMIT_CONFIG_TYPE_URL: &str =
    "type.googleapis.com/ratelimit.config.ratelimit.v3.RateLimitConfig";
