#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use ratelimit_controller_core as core;
pub use ratelimit_controller_events as events;
pub use ratelimit_controller_grpc as grpc;
pub use ratelimit_controller_index as index;

mod args;
mod http;
mod tls;

pub use self::{
    args::{parse_duration, Args},
    http::Mirror,
    tls::{TlsError, TlsMaterial},
};
