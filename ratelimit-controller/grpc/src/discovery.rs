use crate::{
    metrics::{GrpcServerMetricsFamily, GrpcServerRPCMetrics, Sessions},
    proto::to_any,
    LabelResolver, NodeIdentity, NodeQueue,
};
use futures::prelude::*;
use ratelimit_controller_api::{
    discovery::{DiscoveryRequest, DiscoveryResponse},
    rls::rate_limit_config_discovery_service_server::{
        RateLimitConfigDiscoveryService, RateLimitConfigDiscoveryServiceServer,
    },
    RATE_LIMIT_CONFIG_TYPE_URL,
};
use ratelimit_controller_core::{DiscoverSnapshot, Snapshot};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const SERVICE: &str = "ratelimit.service.ratelimit.v3.RateLimitConfigDiscoveryService";

/// Serves rate limit configuration snapshots to data-plane nodes.
#[derive(Clone, Debug)]
pub struct RlsDiscoveryServer<T, R> {
    discover: T,
    resolver: R,
    drain: drain::Watch,
    nodes: Arc<NodeQueue>,
    sessions: Sessions,
    stream_metrics: GrpcServerRPCMetrics,
    fetch_metrics: GrpcServerRPCMetrics,
}

pub type BoxDiscoveryStream =
    std::pin::Pin<Box<dyn Stream<Item = Result<DiscoveryResponse, tonic::Status>> + Send>>;

/// Per-stream protocol state.
///
/// At most one response is outstanding at a time: once a response is sent,
/// nothing else is sent until the node ACKs or NACKs it.
#[derive(Debug)]
struct Session {
    node: NodeIdentity,
    label: String,
    latest: Option<Arc<Snapshot>>,
    client_version: String,
    rejected: Option<String>,
    sent: Option<Sent>,
    awaiting_reply: bool,
    nonce: u64,
}

#[derive(Debug)]
struct Sent {
    nonce: String,
    version: String,
}

enum Step {
    Request(Option<Result<DiscoveryRequest, tonic::Status>>),
    Update(Option<Arc<Snapshot>>),
    Shutdown,
}

// === impl RlsDiscoveryServer ===

impl<T, R> RlsDiscoveryServer<T, R>
where
    T: DiscoverSnapshot + Clone + Send + Sync + 'static,
    R: LabelResolver + Clone + Send + Sync + 'static,
{
    pub fn new(
        discover: T,
        resolver: R,
        drain: drain::Watch,
        metrics: GrpcServerMetricsFamily,
        sessions: Sessions,
    ) -> Self {
        Self {
            discover,
            resolver,
            drain,
            nodes: Default::default(),
            sessions,
            stream_metrics: metrics.bidi_stream_rpc(SERVICE, "StreamRlsConfigs"),
            fetch_metrics: metrics.unary_rpc(SERVICE, "FetchRlsConfigs"),
        }
    }

    pub fn svc(self) -> RateLimitConfigDiscoveryServiceServer<Self> {
        RateLimitConfigDiscoveryServiceServer::new(self)
    }

    /// Runs the discovery protocol over a stream of requests from one node.
    pub fn session<S>(&self, requests: S) -> BoxDiscoveryStream
    where
        S: Stream<Item = Result<DiscoveryRequest, tonic::Status>> + Send + 'static,
    {
        let discover = self.discover.clone();
        let resolver = self.resolver.clone();
        let drain = self.drain.clone();
        let nodes = self.nodes.clone();
        let sessions = self.sessions.clone();
        let mut observer = self.stream_metrics.start();

        Box::pin(async_stream::try_stream! {
            let mut requests = Box::pin(requests);
            tokio::pin! {
                let shutdown = drain.signaled();
            }

            let first = tokio::select! {
                req = requests.next() => req,
                _ = (&mut shutdown) => return,
            };
            let first = match first {
                Some(Ok(req)) => req,
                Some(Err(status)) => {
                    debug!(%status, "Discovery stream failed before the first request");
                    observer.end(status.code());
                    return;
                }
                None => return,
            };
            observer.msg_received();

            let node = match check_type_url(&first.type_url)
                .and_then(|()| NodeIdentity::from_node(first.node.as_ref()))
            {
                Ok(node) => node,
                Err(status) => {
                    observer.end(status.code());
                    Err::<(), _>(status)?;
                    return;
                }
            };
            let label = resolver.resolve(&node);
            if nodes.observe(&node) {
                info!(%node, %label, "New node connected");
            } else {
                debug!(%node, %label, "Node reconnected");
            }
            let _session = sessions.open(node.clone());

            let mut updates = match discover.watch_snapshot(&label).await {
                Ok(updates) => updates,
                Err(error) => {
                    let status = tonic::Status::internal(format!("lookup failed: {error}"));
                    observer.end(status.code());
                    Err::<(), _>(status)?;
                    return;
                }
            };

            let mut session = Session::new(node, label);
            session.handle(first);

            loop {
                if let Some(rsp) = session.next_response() {
                    observer.msg_sent();
                    yield rsp;
                }

                let step = tokio::select! {
                    req = requests.next() => Step::Request(req),
                    snapshot = updates.next() => Step::Update(snapshot),
                    // If the server starts shutting down, close the stream so
                    // that it doesn't hold the server open.
                    _ = (&mut shutdown) => Step::Shutdown,
                };

                match step {
                    Step::Request(Some(Ok(req))) => {
                        observer.msg_received();
                        session.handle(req);
                    }
                    Step::Request(Some(Err(status))) => {
                        debug!(node = %session.node, %status, "Discovery stream failed");
                        observer.end(status.code());
                        return;
                    }
                    Step::Request(None) => {
                        debug!(node = %session.node, "Node closed discovery stream");
                        return;
                    }
                    Step::Update(Some(snapshot)) => session.update(snapshot),
                    Step::Update(None) | Step::Shutdown => return,
                }
            }
        })
    }

    async fn fetch(&self, req: DiscoveryRequest) -> Result<DiscoveryResponse, tonic::Status> {
        check_type_url(&req.type_url)?;
        let node = NodeIdentity::from_node(req.node.as_ref())?;
        let label = self.resolver.resolve(&node);

        // If the label hasn't (yet) been published, return a Not Found error.
        let snapshot = self
            .discover
            .get_snapshot(&label)
            .await
            .map_err(|e| tonic::Status::internal(format!("lookup failed: {e}")))?
            .ok_or_else(|| tonic::Status::not_found(format!("unknown label: {label}")))?;

        let version_info = snapshot.version.to_string();
        if req.version_info == version_info {
            trace!(%node, %label, version = %version_info, "Node is up to date");
            return Ok(DiscoveryResponse {
                version_info,
                type_url: RATE_LIMIT_CONFIG_TYPE_URL.to_string(),
                ..Default::default()
            });
        }

        Ok(DiscoveryResponse {
            version_info,
            resources: vec![to_any(&snapshot.config)],
            type_url: RATE_LIMIT_CONFIG_TYPE_URL.to_string(),
            ..Default::default()
        })
    }
}

#[async_trait::async_trait]
impl<T, R> RateLimitConfigDiscoveryService for RlsDiscoveryServer<T, R>
where
    T: DiscoverSnapshot + Clone + Send + Sync + 'static,
    R: LabelResolver + Clone + Send + Sync + 'static,
{
    type StreamRlsConfigsStream = BoxDiscoveryStream;

    async fn stream_rls_configs(
        &self,
        req: tonic::Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> Result<tonic::Response<BoxDiscoveryStream>, tonic::Status> {
        Ok(tonic::Response::new(self.session(req.into_inner())))
    }

    async fn fetch_rls_configs(
        &self,
        req: tonic::Request<DiscoveryRequest>,
    ) -> Result<tonic::Response<DiscoveryResponse>, tonic::Status> {
        let mut observer = self.fetch_metrics.start();
        observer.msg_received();
        let res = self.fetch(req.into_inner()).await;
        match &res {
            Ok(_) => observer.msg_sent(),
            Err(status) => observer.end(status.code()),
        }
        res.map(tonic::Response::new)
    }
}

// === impl Session ===

impl Session {
    fn new(node: NodeIdentity, label: String) -> Self {
        Self {
            node,
            label,
            latest: None,
            client_version: String::new(),
            rejected: None,
            sent: None,
            awaiting_reply: false,
            nonce: 0,
        }
    }

    fn update(&mut self, snapshot: Arc<Snapshot>) {
        trace!(node = %self.node, label = %self.label, version = %snapshot.version, "Snapshot updated");
        self.latest = Some(snapshot);
    }

    /// Applies a request from the node. Malformed or stale requests are
    /// logged and otherwise ignored.
    fn handle(&mut self, req: DiscoveryRequest) {
        if let Err(status) = check_type_url(&req.type_url) {
            warn!(node = %self.node, message = %status.message(), "Ignoring request");
            return;
        }

        if !req.response_nonce.is_empty() {
            match &self.sent {
                Some(sent) if sent.nonce == req.response_nonce => {}
                _ => {
                    debug!(node = %self.node, nonce = %req.response_nonce, "Ignoring stale request");
                    return;
                }
            }
        }

        if let Some(error) = req.error_detail {
            let rejected = self
                .sent
                .as_ref()
                .map(|s| s.version.clone())
                .unwrap_or_default();
            warn!(
                node = %self.node,
                label = %self.label,
                version = %rejected,
                code = error.code,
                message = %error.message,
                "Node rejected rate limit configuration",
            );
            self.rejected = Some(rejected);
        } else if !req.response_nonce.is_empty() {
            trace!(node = %self.node, version = %req.version_info, "Node acknowledged configuration");
        }

        self.client_version = req.version_info;
        self.awaiting_reply = false;
    }

    /// Returns the response to send, if the node should be sent the latest
    /// snapshot.
    fn next_response(&mut self) -> Option<DiscoveryResponse> {
        if self.awaiting_reply {
            return None;
        }
        let snapshot = self.latest.as_ref()?;
        let version = snapshot.version.to_string();
        if version == self.client_version || self.rejected.as_deref() == Some(version.as_str()) {
            return None;
        }

        self.nonce += 1;
        let nonce = self.nonce.to_string();
        debug!(node = %self.node, label = %self.label, %version, %nonce, "Sending rate limit configuration");
        let rsp = DiscoveryResponse {
            version_info: version.clone(),
            resources: vec![to_any(&snapshot.config)],
            type_url: RATE_LIMIT_CONFIG_TYPE_URL.to_string(),
            nonce: nonce.clone(),
            ..Default::default()
        };
        self.sent = Some(Sent { nonce, version });
        self.awaiting_reply = true;
        Some(rsp)
    }
}

/// An empty type URL refers to the only resource type this service serves.
fn check_type_url(type_url: &str) -> Result<(), tonic::Status> {
    if type_url.is_empty() || type_url == RATE_LIMIT_CONFIG_TYPE_URL {
        return Ok(());
    }
    Err(tonic::Status::invalid_argument(format!(
        "unsupported type URL: {type_url}"
    )))
}
