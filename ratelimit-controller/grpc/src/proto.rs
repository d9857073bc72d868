use prost::Message;
use ratelimit_controller_api::{config as proto, RATE_LIMIT_CONFIG_TYPE_URL};
use ratelimit_controller_core::{Descriptor, RateLimit, RateLimitConfig, Unit};

/// Encodes a configuration resource as the `Any` carried in discovery
/// responses.
pub(crate) fn to_any(config: &RateLimitConfig) -> prost_types::Any {
    prost_types::Any {
        type_url: RATE_LIMIT_CONFIG_TYPE_URL.to_string(),
        value: to_config(config).encode_to_vec(),
    }
}

pub(crate) fn to_config(config: &RateLimitConfig) -> proto::RateLimitConfig {
    proto::RateLimitConfig {
        name: config.name.clone(),
        domain: config.domain.clone(),
        descriptors: config.descriptors.iter().map(to_descriptor).collect(),
    }
}

fn to_descriptor(d: &Descriptor) -> proto::RateLimitDescriptor {
    proto::RateLimitDescriptor {
        key: d.key.clone(),
        value: d.value.clone(),
        rate_limit: d.rate_limit.map(to_policy),
        descriptors: d.children.iter().map(to_descriptor).collect(),
        shadow_mode: d.shadow_mode,
    }
}

fn to_policy(limit: RateLimit) -> proto::RateLimitPolicy {
    let unit = match limit.unit {
        Unit::Unknown => proto::RateLimitUnit::Unknown,
        Unit::Second => proto::RateLimitUnit::Second,
        Unit::Minute => proto::RateLimitUnit::Minute,
        Unit::Hour => proto::RateLimitUnit::Hour,
        Unit::Day => proto::RateLimitUnit::Day,
    };
    proto::RateLimitPolicy {
        unit: unit.into(),
        requests_per_unit: limit.requests_per_unit,
    }
}
