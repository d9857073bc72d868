use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct StoreMetrics {
    size: Family<KindLabels, Gauge>,
    applies: Family<KindLabels, Counter>,
    deletes: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Default)]
pub struct RegistryMetrics {
    publishes: Family<SnapshotLabels, Counter>,
    rejects: Family<SnapshotLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SnapshotLabels {
    label: String,
}

// === impl StoreMetrics ===

impl StoreMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let size = Family::default();
        prom.register(
            "size",
            "Gauge of the number of policies in the store",
            size.clone(),
        );

        let applies = Family::default();
        prom.register(
            "applies",
            "Count of policy applies to the store",
            applies.clone(),
        );

        let deletes = Family::default();
        prom.register(
            "deletes",
            "Count of policy deletes from the store",
            deletes.clone(),
        );

        Self {
            size,
            applies,
            deletes,
        }
    }

    pub(crate) fn applied(&self, kind: &'static str, size: usize) {
        let labels = KindLabels { kind };
        self.applies.get_or_create(&labels).inc();
        self.size.get_or_create(&labels).set(size as i64);
    }

    pub(crate) fn deleted(&self, kind: &'static str, size: usize) {
        let labels = KindLabels { kind };
        self.deletes.get_or_create(&labels).inc();
        self.size.get_or_create(&labels).set(size as i64);
    }
}

// === impl RegistryMetrics ===

impl RegistryMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let publishes = Family::default();
        prom.register(
            "publishes",
            "Count of snapshots committed per label",
            publishes.clone(),
        );

        let rejects = Family::default();
        prom.register(
            "rejects",
            "Count of candidate snapshots that failed validation per label",
            rejects.clone(),
        );

        Self { publishes, rejects }
    }

    pub(crate) fn published(&self, label: &str) {
        self.publishes
            .get_or_create(&SnapshotLabels {
                label: label.to_string(),
            })
            .inc();
    }

    pub(crate) fn rejected(&self, label: &str) {
        self.rejects
            .get_or_create(&SnapshotLabels {
                label: label.to_string(),
            })
            .inc();
    }
}
