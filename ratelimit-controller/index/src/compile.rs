use crate::Policies;
use ratelimit_controller_core::{
    policy::{AiRateLimitPolicy, ApiPolicy, SubscriptionPolicy, ALL_METHODS, HTTP_METHODS},
    Descriptor, RateLimit,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Descriptor keys understood by the rate-limit data plane.
pub mod keys {
    pub const ORG: &str = "org";
    pub const VHOST: &str = "vhost";
    pub const PATH: &str = "path";
    pub const METHOD: &str = "method";

    pub const SUBSCRIPTION: &str = "subscription";
    pub const POLICY: &str = "policy";
    pub const BURST: &str = "burst";
    pub const BURST_ENABLED: &str = "enabled";

    pub const AI_REQUEST_TOKEN_COUNT: &str = "airequesttokencount";
    pub const AI_RESPONSE_TOKEN_COUNT: &str = "airesponsetokencount";
    pub const AI_TOTAL_TOKEN_COUNT: &str = "aitotaltokencount";
    pub const AI_REQUEST_COUNT: &str = "airequestcount";

    /// Appended to AI keys for quotas counted per subscription.
    pub const SUBSCRIPTION_BASED_SUFFIX: &str = "subs";
}

/// path -> method -> limit
type Paths = BTreeMap<String, BTreeMap<String, RateLimit>>;

#[derive(Debug, Default)]
struct OrgTree {
    vhosts: BTreeMap<String, Paths>,
    others: Vec<Descriptor>,
}

/// Renders the full policy set into a descriptor tree.
///
/// The output depends only on the contents of `policies`: every level of
/// the tree is sorted by `(key, value)`, so equal inputs produce equal trees.
pub fn compile(policies: &Policies) -> Vec<Descriptor> {
    let mut orgs = BTreeMap::<String, OrgTree>::new();

    // Group API entries by organization, vhost and API so that resource
    // limits can suppress the API-level limit of the same API.
    let mut apis = BTreeMap::<(&str, &str, &str), Vec<&ApiPolicy>>::new();
    for (key, policy) in policies.apis() {
        apis.entry((
            key.organization.as_str(),
            key.vhost.as_str(),
            policy.api_uuid.as_str(),
        ))
            .or_default()
            .push(policy);
    }
    for ((org, vhost, api), entries) in apis {
        let paths = orgs
            .entry(org.to_string())
            .or_default()
            .vhosts
            .entry(vhost.to_string())
            .or_default();
        compile_api(api, &entries, paths);
    }

    for custom in policies.customs() {
        orgs.entry(custom.organization.clone())
            .or_default()
            .others
            .push(Descriptor::new(&custom.key, &custom.value).with_rate_limit(custom.rate_limit));
    }

    let mut subscriptions = BTreeMap::<&str, BTreeMap<&str, &SubscriptionPolicy>>::new();
    for policy in policies.subscriptions() {
        let prior = subscriptions
            .entry(policy.organization.as_str())
            .or_default()
            .insert(policy.name.as_str(), policy);
        if prior.is_some() {
            debug!(organization = %policy.organization, name = %policy.name, "Duplicate subscription policy name; using the last one");
        }
    }
    for (org, by_name) in subscriptions {
        let policies = by_name.into_values().map(subscription_descriptor).collect();
        orgs.entry(org.to_string())
            .or_default()
            .others
            .push(Descriptor::new(keys::SUBSCRIPTION, "").with_children(policies));
    }

    for policy in policies.ai_policies() {
        orgs.entry(policy.organization.clone())
            .or_default()
            .others
            .extend(ai_descriptors(policy));
    }

    orgs.into_iter()
        .map(|(org, tree)| {
            let mut children = tree
                .vhosts
                .into_iter()
                .map(|(vhost, paths)| {
                    Descriptor::new(keys::VHOST, vhost).with_children(path_descriptors(paths))
                })
                .chain(tree.others)
                .collect::<Vec<_>>();
            sort(&mut children);
            Descriptor::new(keys::ORG, org).with_children(children)
        })
        .collect()
}

fn compile_api(api: &str, entries: &[&ApiPolicy], paths: &mut Paths) {
    let resource_level = entries.iter().any(|p| !p.resources.is_empty());
    for policy in entries {
        if resource_level {
            for resource in &policy.resources {
                let path = format!("{}{}", policy.base_path, resource.path);
                let methods = paths.entry(path).or_default();
                if resource.method.eq_ignore_ascii_case(ALL_METHODS) {
                    for method in HTTP_METHODS {
                        methods.insert(method.to_string(), resource.rate_limit);
                    }
                } else {
                    methods.insert(resource.method.to_uppercase(), resource.rate_limit);
                }
            }
        } else if let Some(limit) = policy.api_level {
            paths
                .entry(policy.base_path.clone())
                .or_default()
                .insert(ALL_METHODS.to_string(), limit);
        } else {
            trace!(%api, "API has no rate limits");
        }
    }
}

fn path_descriptors(paths: Paths) -> Vec<Descriptor> {
    paths
        .into_iter()
        .filter(|(_, methods)| !methods.is_empty())
        .map(|(path, methods)| {
            let methods = methods
                .into_iter()
                .map(|(method, limit)| Descriptor::new(keys::METHOD, method).with_rate_limit(limit))
                .collect();
            Descriptor::new(keys::PATH, path).with_children(methods)
        })
        .collect()
}

fn subscription_descriptor(policy: &SubscriptionPolicy) -> Descriptor {
    let burst = policy
        .burst_control
        .map(|limit| Descriptor::new(keys::BURST, keys::BURST_ENABLED).with_rate_limit(limit));
    Descriptor::new(keys::POLICY, &policy.name)
        .with_rate_limit(policy.request_count)
        .with_shadow_mode(!policy.stop_on_quota_reach)
        .with_children(burst.into_iter().collect())
}

fn ai_descriptors(policy: &AiRateLimitPolicy) -> Vec<Descriptor> {
    let value = format!("{}-{}", policy.organization, policy.name);
    [
        (keys::AI_REQUEST_TOKEN_COUNT, policy.request_token_count),
        (keys::AI_RESPONSE_TOKEN_COUNT, policy.response_token_count),
        (keys::AI_TOTAL_TOKEN_COUNT, policy.total_token_count),
        (keys::AI_REQUEST_COUNT, policy.request_count),
    ]
    .into_iter()
    .filter_map(|(key, limit)| {
        let limit = limit?;
        let descriptor = if policy.subscription_based {
            Descriptor::new(format!("{key}{}", keys::SUBSCRIPTION_BASED_SUFFIX), &value)
                .with_children(vec![
                    Descriptor::new(keys::SUBSCRIPTION, "").with_rate_limit(limit)
                ])
        } else {
            Descriptor::new(key, &value).with_rate_limit(limit)
        };
        Some(descriptor)
    })
    .collect()
}

fn sort(descriptors: &mut [Descriptor]) {
    descriptors.sort_by(|a, b| (&a.key, &a.value).cmp(&(&b.key, &b.value)));
}
