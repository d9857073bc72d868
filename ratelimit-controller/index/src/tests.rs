use crate::*;
use futures::FutureExt;
use ratelimit_controller_core::{
    policy::{
        AiRateLimitPolicy, ApiKey, ApiPolicy, CustomKey, CustomPolicy, ObjectKey, PathMatchType,
        ResourcePolicy, SubscriptionPolicy,
    },
    Descriptor, DiscoverSnapshot, RateLimit, RateLimitConfig, Unit, Version, RATE_LIMIT_DOMAIN,
};
use std::time::Duration;
use tokio_stream::StreamExt;

fn api(org: &str, vhosts: &[&str], uuid: &str, limit: RateLimit) -> ApiPolicy {
    ApiPolicy {
        organization: org.to_string(),
        vhosts: vhosts.iter().map(|v| v.to_string()).collect(),
        api_uuid: uuid.to_string(),
        base_path: "/api".to_string(),
        environment: "Default".to_string(),
        api_level: Some(limit),
        resources: vec![],
    }
}

fn operation(
    org: &str,
    vhost: &str,
    uuid: &str,
    path: &str,
    method: &str,
    limit: RateLimit,
) -> (ApiKey, ApiPolicy) {
    let key = ApiKey::operation(org, vhost, uuid, path, method);
    let policy = ApiPolicy {
        organization: org.to_string(),
        vhosts: vec![vhost.to_string()],
        api_uuid: uuid.to_string(),
        base_path: "/api".to_string(),
        environment: "Default".to_string(),
        api_level: None,
        resources: vec![ResourcePolicy {
            path: path.to_string(),
            method: method.to_string(),
            path_match: PathMatchType::Exact,
            rate_limit: limit,
        }],
    };
    (key, policy)
}

fn custom(org: &str, key: &str, value: &str, limit: RateLimit) -> CustomPolicy {
    CustomPolicy {
        organization: org.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        rate_limit: limit,
    }
}

fn per_minute(n: u32) -> RateLimit {
    RateLimit::new(n, Unit::Minute)
}

fn config(descriptors: Vec<Descriptor>) -> RateLimitConfig {
    RateLimitConfig {
        name: RATE_LIMIT_DOMAIN.to_string(),
        domain: RATE_LIMIT_DOMAIN.to_string(),
        descriptors,
    }
}

// === store ===

#[test]
fn delete_is_idempotent() {
    let store = PolicyStore::default();
    let policy = custom("acme", "x-user", "alice", per_minute(10));
    let key = CustomKey::from(&policy);
    assert!(store.upsert(key.clone(), policy.clone()));

    assert_eq!(store.delete::<CustomPolicy>(&key), Some(policy));
    let after = store.snapshot();
    assert_eq!(store.delete::<CustomPolicy>(&key), None);
    assert_eq!(store.snapshot(), after);
    assert!(after.is_empty());
}

#[test]
fn upsert_reports_unchanged_policies() {
    let store = PolicyStore::default();
    let policy = custom("acme", "x-user", "alice", per_minute(10));
    let key = CustomKey::from(&policy);

    assert!(store.upsert(key.clone(), policy.clone()));
    assert!(!store.upsert(key.clone(), policy));

    let updated = custom("acme", "x-user", "alice", per_minute(20));
    assert!(store.upsert(key.clone(), updated.clone()));
    assert_eq!(store.get::<CustomPolicy>(&key), Some(updated));
}

#[test]
fn apply_api_replaces_every_vhost() {
    let store = PolicyStore::default();
    store.apply_api(api("acme", &["a.com", "b.com"], "u1", per_minute(100)));
    assert_eq!(store.snapshot().apis().count(), 2);

    store.apply_api(api("acme", &["b.com"], "u1", per_minute(50)));
    let policies = store.snapshot();
    let entries = policies.apis().collect::<Vec<_>>();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, &ApiKey::new("acme", "b.com", "u1"));
    assert_eq!(entries[0].1.api_level, Some(per_minute(50)));

    assert_eq!(store.delete_api("acme", "u1"), 1);
    assert_eq!(store.delete_api("acme", "u1"), 0);
    assert!(store.snapshot().is_empty());
}

#[test]
fn apply_api_keeps_operation_policies() {
    let store = PolicyStore::default();
    let (key, policy) = operation("acme", "a.com", "u1", "/x", "GET", per_minute(10));
    assert!(store.upsert(key.clone(), policy.clone()));

    store.apply_api(api("acme", &["a.com"], "u1", per_minute(100)));
    assert_eq!(store.get::<ApiPolicy>(&key), Some(policy.clone()));

    let tree = compile(&store.snapshot());
    let vhost = tree[0].child("vhost", "a.com").expect("vhost must exist");
    assert!(vhost.child("path", "/api/x").is_some(), "{vhost:?}");

    assert_eq!(store.delete_api("acme", "u1"), 1);
    assert_eq!(store.get::<ApiPolicy>(&key), Some(policy));
    assert!(store.delete::<ApiPolicy>(&key).is_some());
    assert!(store.snapshot().is_empty());
}

// === compile ===

#[test]
fn api_level_limit() {
    let store = PolicyStore::default();
    store.apply_api(api("acme", &["a.com"], "u1", per_minute(100)));

    let tree = compile(&store.snapshot());
    assert_eq!(
        tree,
        vec![Descriptor::new("org", "acme").with_children(vec![Descriptor::new(
            "vhost", "a.com"
        )
        .with_children(vec![Descriptor::new("path", "/api").with_children(vec![
            Descriptor::new("method", "ALL").with_rate_limit(per_minute(100))
        ])])])]
    );
}

#[test]
fn resource_limits_suppress_api_level_limit() {
    let store = PolicyStore::default();
    store.apply_api(api("acme", &["a.com"], "u1", per_minute(100)));
    for (method, n) in [("GET", 10), ("POST", 5)] {
        let (key, policy) = operation("acme", "a.com", "u1", "/x", method, per_minute(n));
        assert!(store.upsert(key, policy));
    }

    let tree = compile(&store.snapshot());
    let vhost = tree[0].child("vhost", "a.com").expect("vhost must exist");
    assert_eq!(vhost.children.len(), 1, "no API-level path: {vhost:?}");
    let path = vhost.child("path", "/api/x").expect("path must exist");
    assert_eq!(
        path.children,
        vec![
            Descriptor::new("method", "GET").with_rate_limit(per_minute(10)),
            Descriptor::new("method", "POST").with_rate_limit(per_minute(5)),
        ]
    );
    assert!(path.child("method", "ALL").is_none());
}

#[test]
fn resource_all_methods_expand() {
    let store = PolicyStore::default();
    let (key, policy) = operation("acme", "a.com", "u1", "/y", "ALL", per_minute(7));
    store.upsert(key, policy);

    let tree = compile(&store.snapshot());
    let path = tree[0]
        .child("vhost", "a.com")
        .and_then(|v| v.child("path", "/api/y"))
        .expect("path must exist");
    let methods = path.children.iter().map(|d| d.value.as_str()).collect::<Vec<_>>();
    assert_eq!(
        methods,
        vec!["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"]
    );
}

#[test]
fn custom_subscription_and_ai_descriptors() {
    let store = PolicyStore::default();
    store.upsert(
        CustomKey::new("acme", "x-user", "alice"),
        custom("acme", "x-user", "alice", per_minute(3)),
    );
    store.upsert(
        ObjectKey::new("default", "gold"),
        SubscriptionPolicy {
            name: "Gold".to_string(),
            organization: "acme".to_string(),
            request_count: per_minute(1000),
            burst_control: Some(RateLimit::new(50, Unit::Second)),
            stop_on_quota_reach: false,
        },
    );
    store.upsert(
        ObjectKey::new("default", "gpt"),
        AiRateLimitPolicy {
            organization: "acme".to_string(),
            name: "gpt".to_string(),
            request_token_count: Some(per_minute(2000)),
            response_token_count: None,
            total_token_count: None,
            request_count: Some(per_minute(20)),
            subscription_based: false,
        },
    );
    store.upsert(
        ObjectKey::new("default", "gpt-subs"),
        AiRateLimitPolicy {
            organization: "acme".to_string(),
            name: "plan".to_string(),
            request_token_count: None,
            response_token_count: None,
            total_token_count: Some(per_minute(9000)),
            request_count: None,
            subscription_based: true,
        },
    );

    let tree = compile(&store.snapshot());
    assert_eq!(tree.len(), 1);
    let org = &tree[0];
    let keys = org
        .children
        .iter()
        .map(|d| (d.key.as_str(), d.value.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            ("airequestcount", "acme-gpt"),
            ("airequesttokencount", "acme-gpt"),
            ("aitotaltokencountsubs", "acme-plan"),
            ("subscription", ""),
            ("x-user", "alice"),
        ]
    );

    assert_eq!(
        org.child("x-user", "alice").and_then(|d| d.rate_limit),
        Some(per_minute(3))
    );
    assert_eq!(
        org.child("subscription", ""),
        Some(
            &Descriptor::new("subscription", "").with_children(vec![Descriptor::new(
                "policy", "Gold"
            )
            .with_rate_limit(per_minute(1000))
            .with_shadow_mode(true)
            .with_children(vec![Descriptor::new("burst", "enabled")
                .with_rate_limit(RateLimit::new(50, Unit::Second))])])
        )
    );
    assert_eq!(
        org.child("aitotaltokencountsubs", "acme-plan"),
        Some(
            &Descriptor::new("aitotaltokencountsubs", "acme-plan").with_children(vec![
                Descriptor::new("subscription", "").with_rate_limit(per_minute(9000))
            ])
        )
    );
}

#[test]
fn compile_is_deterministic() {
    let a = PolicyStore::default();
    a.apply_api(api("acme", &["a.com"], "u1", per_minute(1)));
    a.apply_api(api("beta", &["b.com"], "u2", per_minute(2)));
    a.upsert(
        CustomKey::new("acme", "k", "v"),
        custom("acme", "k", "v", per_minute(3)),
    );

    let b = PolicyStore::default();
    b.upsert(
        CustomKey::new("acme", "k", "v"),
        custom("acme", "k", "v", per_minute(3)),
    );
    b.apply_api(api("beta", &["b.com"], "u2", per_minute(2)));
    b.apply_api(api("acme", &["a.com"], "u1", per_minute(1)));

    assert_eq!(compile(&a.snapshot()), compile(&b.snapshot()));
    assert_eq!(compile(&a.snapshot()), compile(&a.snapshot()));
}

#[test]
fn empty_store_compiles_to_empty_tree() {
    assert!(compile(&PolicyStore::default().snapshot()).is_empty());
}

// === registry ===

#[test]
fn rejected_candidates_keep_previous_snapshot() {
    let registry = SnapshotRegistry::default();
    let v1 = registry
        .commit("default", vec![config(vec![Descriptor::new("org", "acme")])])
        .expect("valid snapshot");

    assert_eq!(
        registry.commit("default", vec![config(vec![]), config(vec![])]),
        Err(SnapshotError::ResourceCount(2))
    );
    assert_eq!(
        registry.commit("default", vec![]),
        Err(SnapshotError::ResourceCount(0))
    );
    assert_eq!(
        registry.commit(
            "default",
            vec![config(vec![
                Descriptor::new("org", "acme"),
                Descriptor::new("org", "acme"),
            ])]
        ),
        Err(SnapshotError::Duplicate {
            path: "".to_string(),
            key: "org".to_string(),
            value: "acme".to_string(),
        })
    );
    assert!(matches!(
        registry.commit(
            "default",
            vec![RateLimitConfig {
                name: "other".to_string(),
                ..config(vec![])
            }]
        ),
        Err(SnapshotError::NameMismatch { .. })
    ));
    assert!(matches!(
        registry.commit(
            "default",
            vec![config(vec![
                Descriptor::new("org", "acme").with_children(vec![Descriptor::new("", "x")])
            ])]
        ),
        Err(SnapshotError::EmptyKey { path }) if path == "/org=acme"
    ));

    let current = registry.get("default").expect("snapshot must be committed");
    assert_eq!(current.version, v1);
    assert_eq!(current.descriptors(), &[Descriptor::new("org", "acme")]);
}

#[test]
fn versions_increase_per_commit() {
    let registry = SnapshotRegistry::default();
    assert!(registry.publish_empty("default"));
    let v1 = registry.get("default").expect("published").version;
    assert!(registry.publish_empty("other"));
    assert!(registry.publish_empty("default"));
    let v2 = registry.get("default").expect("published").version;
    assert!(v2 > v1);
    assert_eq!(registry.labels(), vec!["default".to_string(), "other".to_string()]);
}

#[test]
fn concurrent_publishes_are_ordered() {
    let registry = SnapshotRegistry::default();
    let threads = (0..8)
        .map(|i| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                (0..25)
                    .map(|j| {
                        registry
                            .commit(
                                "default",
                                vec![config(vec![Descriptor::new("n", format!("{i}-{j}"))])],
                            )
                            .expect("valid snapshot")
                    })
                    .collect::<Vec<Version>>()
            })
        })
        .collect::<Vec<_>>();

    let mut versions = Vec::new();
    for t in threads {
        let committed = t.join().expect("thread must not panic");
        assert!(committed.windows(2).all(|w| w[0] < w[1]));
        versions.extend(committed);
    }
    versions.sort();
    versions.dedup();
    assert_eq!(versions.len(), 200, "versions must be unique");

    let last = registry.get("default").expect("published");
    assert_eq!(Some(&last.version), versions.last());
}

#[tokio::test]
async fn watchers_observe_commits() {
    let registry = SnapshotRegistry::default();
    let mut updates = registry
        .watch_snapshot("default")
        .await
        .expect("watch must succeed");
    assert!(
        updates.next().now_or_never().is_none(),
        "unpublished labels must not yield"
    );
    assert!(registry.get_snapshot("default").await.expect("get").is_none());

    assert!(registry.publish("default", vec![Descriptor::new("org", "acme")]));
    let snapshot = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await
        .expect("update must be observed")
        .expect("stream must not end");
    assert_eq!(snapshot.label, "default");
    assert_eq!(snapshot.config.domain, RATE_LIMIT_DOMAIN);
    assert_eq!(
        registry.get_snapshot("default").await.expect("get"),
        Some(snapshot)
    );
}

#[tokio::test]
async fn dropped_watches_of_unpublished_labels_are_forgotten() {
    let registry = SnapshotRegistry::default();
    assert!(registry.publish_empty("default"));

    for i in 0..100 {
        let updates = registry
            .watch_snapshot(&format!("node-{i}"))
            .await
            .expect("watch must succeed");
        drop(updates);
    }
    assert_eq!(registry.labels(), ["default"]);

    let held = registry.watch("node-held");
    assert_eq!(registry.labels(), ["default", "node-held"]);
    drop(held);
    assert_eq!(registry.labels(), ["default"]);
}

// === controller ===

#[test]
fn controller_sync_publishes_store_contents() {
    let controller = Controller::default();
    controller.apply_api(api("acme", &["a.com"], "u1", per_minute(100)));
    let key = ObjectKey::new("default", "gpt");
    assert!(controller.apply_ai(
        key.clone(),
        AiRateLimitPolicy {
            organization: "acme".to_string(),
            name: "gpt".to_string(),
            request_token_count: None,
            response_token_count: None,
            total_token_count: None,
            request_count: Some(per_minute(5)),
            subscription_based: false,
        }
    ));
    assert!(controller.sync("default"));

    let snapshot = controller.registry().get("default").expect("published");
    let org = &snapshot.descriptors()[0];
    assert!(org.child("airequestcount", "acme-gpt").is_some());
    assert!(org.child("vhost", "a.com").is_some());

    assert!(controller.delete_ai(&key));
    assert!(!controller.delete_ai(&key));
    assert!(controller.delete_api("acme", "u1"));
    assert!(controller.sync("default"));
    let next = controller.registry().get("default").expect("published");
    assert!(next.version > snapshot.version);
    assert!(next.descriptors().is_empty());
}

#[test]
fn controller_sync_publishes_api_level_limit() {
    let controller = Controller::default();
    controller.apply_api(api("acme", &["a.com"], "u1", per_minute(100)));
    assert!(controller.sync("env1"));

    let snapshot = controller.registry().get("env1").expect("published");
    assert_eq!(snapshot.label, "env1");
    assert_eq!(snapshot.config.domain, RATE_LIMIT_DOMAIN);
    let method = snapshot
        .config
        .descriptor("org", "acme")
        .and_then(|org| org.child("vhost", "a.com"))
        .and_then(|vhost| vhost.child("path", "/api"))
        .and_then(|path| path.child("method", "ALL"))
        .expect("method must exist");
    assert_eq!(method.rate_limit, Some(RateLimit::new(100, Unit::Minute)));
    assert!(method.children.is_empty());
}
