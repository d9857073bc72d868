use parking_lot::Mutex;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};
use ratelimit_controller_core::grpc_code_str;
use std::{collections::HashMap, sync::Arc};
use tokio::time;

use crate::NodeIdentity;

#[derive(Clone, Debug)]
pub struct GrpcServerMetricsFamily {
    started: Family<Labels, Counter>,
    handling: Family<Labels, Histogram>,
    handled: Family<CodeLabels, Counter>,
    msg_received: Family<Labels, Counter>,
    msg_sent: Family<Labels, Counter>,
}

#[derive(Clone, Debug)]
pub(crate) struct GrpcServerRPCMetrics {
    started: Counter,
    msg_received: Counter,
    msg_sent: Counter,
    handling: Histogram,
    handled: Family<CodeLabels, Counter>,
    labels: Labels,
}

pub(crate) struct ResponseObserver {
    msg_received: Counter,
    msg_sent: Counter,
    handled: Option<ResponseHandle>,
}

struct ResponseHandle {
    start: time::Instant,
    durations: Histogram,
    codes: Family<CodeLabels, Counter>,
    labels: Labels,
}

/// Tracks the discovery streams that are currently open.
#[derive(Clone, Debug, Default)]
pub struct Sessions {
    open: Gauge,
    inner: Arc<Mutex<SessionsInner>>,
}

/// Registration of one open session; dropping it deregisters the session.
#[derive(Debug)]
pub(crate) struct SessionHandle {
    id: u64,
    sessions: Sessions,
}

#[derive(Debug, Default)]
struct SessionsInner {
    next_id: u64,
    nodes: HashMap<u64, NodeIdentity>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CodeLabels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
    grpc_code: &'static str,
}

// === GrpcServerMetricsFamily ===

impl GrpcServerMetricsFamily {
    pub fn register(reg: &mut Registry) -> Self {
        let started = Family::<Labels, Counter>::default();
        reg.register(
            "started",
            "Total number of RPCs started on the server",
            started.clone(),
        );

        let msg_received = Family::<Labels, Counter>::default();
        reg.register(
            "msg_received",
            "Total number of RPC stream messages received on the server",
            msg_received.clone(),
        );

        let msg_sent = Family::<Labels, Counter>::default();
        reg.register(
            "msg_sent",
            "Total number of gRPC stream messages sent by the server",
            msg_sent.clone(),
        );

        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of RPCs completed on the server, regardless of success or failure",
            handled.clone(),
        );

        let handling = Family::<Labels, Histogram>::new_with_constructor(|| {
            // Discovery streams are held open for the lifetime of a data-plane
            // process, so the upper buckets cover hours.
            Histogram::new([0.1, 1.0, 300.0, 3600.0, 86400.0])
        });
        reg.register_with_unit(
            "handling",
            "Histogram of response latency (seconds) of gRPC that had been application-level handled by the server",
            prometheus_client::registry::Unit::Seconds,
            handling.clone(),
        );

        Self {
            started,
            msg_received,
            msg_sent,
            handled,
            handling,
        }
    }

    pub(crate) fn unary_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcServerRPCMetrics {
        self.rpc(svc, method, "unary")
    }

    pub(crate) fn bidi_stream_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcServerRPCMetrics {
        self.rpc(svc, method, "bidi_stream")
    }

    fn rpc(
        &self,
        grpc_service: &'static str,
        grpc_method: &'static str,
        grpc_type: &'static str,
    ) -> GrpcServerRPCMetrics {
        let labels = Labels {
            grpc_service,
            grpc_method,
            grpc_type,
        };
        GrpcServerRPCMetrics {
            started: self.started.get_or_create(&labels).clone(),
            msg_received: self.msg_received.get_or_create(&labels).clone(),
            msg_sent: self.msg_sent.get_or_create(&labels).clone(),
            handled: self.handled.clone(),
            handling: self.handling.get_or_create(&labels).clone(),
            labels,
        }
    }
}

impl Default for GrpcServerMetricsFamily {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

// === GrpcServerRPCMetrics ===

impl GrpcServerRPCMetrics {
    pub(crate) fn start(&self) -> ResponseObserver {
        self.started.inc();

        // Pre-register OK
        let _ = self.handled.get_or_create(&CodeLabels {
            grpc_service: self.labels.grpc_service,
            grpc_method: self.labels.grpc_method,
            grpc_type: self.labels.grpc_type,
            grpc_code: grpc_code_str(tonic::Code::Ok),
        });

        ResponseObserver {
            msg_received: self.msg_received.clone(),
            msg_sent: self.msg_sent.clone(),
            handled: Some(ResponseHandle {
                start: time::Instant::now(),
                durations: self.handling.clone(),
                codes: self.handled.clone(),
                labels: self.labels.clone(),
            }),
        }
    }
}

// === ResponseObserver ===

impl ResponseObserver {
    pub(crate) fn msg_received(&self) {
        self.msg_received.inc();
    }

    pub(crate) fn msg_sent(&self) {
        self.msg_sent.inc();
    }

    /// Records the final status of the RPC. Later calls have no effect.
    pub(crate) fn end(&mut self, code: tonic::Code) {
        if let Some(handle) = self.handled.take() {
            handle.inc_end(code);
        }
    }
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        if let Some(inner) = self.handled.take() {
            inner.inc_end(tonic::Code::Ok);
        }
    }
}

// === ResponseHandle ===

impl ResponseHandle {
    #[inline]
    fn inc_end(self, code: tonic::Code) {
        let Self {
            start,
            durations,
            codes,
            labels,
        } = self;
        durations.observe(start.elapsed().as_secs_f64());
        codes
            .get_or_create(&CodeLabels {
                grpc_service: labels.grpc_service,
                grpc_method: labels.grpc_method,
                grpc_type: labels.grpc_type,
                grpc_code: grpc_code_str(code),
            })
            .inc();
    }
}

// === Sessions ===

impl Sessions {
    pub fn register(reg: &mut Registry) -> Self {
        let sessions = Self::default();
        reg.register(
            "sessions",
            "Number of open rate limit configuration discovery streams",
            sessions.open.clone(),
        );
        sessions
    }

    pub(crate) fn open(&self, node: NodeIdentity) -> SessionHandle {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.insert(id, node);
        self.open.inc();
        SessionHandle {
            id,
            sessions: self.clone(),
        }
    }

    /// Returns the identities of the nodes with an open session.
    pub fn nodes(&self) -> Vec<NodeIdentity> {
        self.inner.lock().nodes.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.sessions.inner.lock().nodes.remove(&self.id).is_some() {
            self.sessions.open.dec();
        }
    }
}
