use crate::{
    core::RetryExecutor,
    events::{self, ArtifactIndex, Catalog},
    grpc::{self, metrics::GrpcServerMetricsFamily, metrics::Sessions},
    http::{self, Mirror},
    index::{
        metrics::{RegistryMetrics, StoreMetrics},
        Controller, PolicyStore, SnapshotRegistry,
    },
    tls::TlsMaterial,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, time::Duration};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Endpoint, Server, ServerTlsConfig};
use tracing::{error, info, info_span, instrument, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "ratelimit-controller",
    about = "Distributes rate limit configuration to gateway rate limiters"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "ratelimit=info,warn",
        env = "RATELIMIT_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:18005")]
    grpc_addr: SocketAddr,

    /// Labels for which an empty configuration is published at startup.
    #[clap(long, default_value = "default", value_delimiter = ',')]
    labels: Vec<String>,

    #[clap(long, env = "RATELIMIT_CONTROLLER_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    #[clap(long, env = "RATELIMIT_CONTROLLER_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// A directory of PEM-encoded trust roots.
    #[clap(long, env = "RATELIMIT_CONTROLLER_TRUST_DIR")]
    tls_trust_dir: Option<PathBuf>,

    /// The control plane's event stream address. When unset, no events are
    /// consumed.
    #[clap(long, env = "RATELIMIT_CONTROLLER_CONTROL_PLANE_ADDR")]
    control_plane_addr: Option<String>,

    #[clap(long, default_value = "control-plane")]
    control_plane_server_name: String,

    /// The base URL of the control plane's catalog API. When unset, resync
    /// requests are ignored.
    #[clap(long)]
    control_plane_rest_addr: Option<reqwest::Url>,

    /// Identifies this controller to the control plane. Defaults to a random
    /// UUID.
    #[clap(long, env = "RATELIMIT_CONTROLLER_UUID")]
    controller_uuid: Option<String>,

    #[clap(long, default_value = "5s", value_parser = parse_duration)]
    retry_interval: Duration,

    #[clap(long, default_value = "0.0.0.0:9543")]
    mirror_addr: SocketAddr,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            admin,
            grpc_addr,
            labels,
            tls_cert,
            tls_key,
            tls_trust_dir,
            control_plane_addr,
            control_plane_server_name,
            control_plane_rest_addr,
            controller_uuid,
            retry_interval,
            mirror_addr,
        } = self;

        log_format.try_init(log_level)?;

        let tls = TlsMaterial::load(
            tls_cert.as_deref(),
            tls_key.as_deref(),
            tls_trust_dir.as_deref(),
        )?;
        if tls.is_none() {
            warn!("TLS is not configured; serving and dialing in plaintext");
        }

        let mut prom = <Registry>::default();
        let store_metrics = StoreMetrics::register(prom.sub_registry_with_prefix("policy_store"));
        let registry_metrics = RegistryMetrics::register(prom.sub_registry_with_prefix("snapshot"));
        let grpc_metrics =
            GrpcServerMetricsFamily::register(prom.sub_registry_with_prefix("grpc_server"));
        let sessions = Sessions::register(prom.sub_registry_with_prefix("discovery"));

        let admin = admin.into_builder().with_prometheus(prom).bind()?;
        let readiness = admin.readiness();
        let _admin = admin.spawn();

        let (shutdown, drain) = kubert::shutdown::sigint_or_sigterm()?;

        // Bind every listener up front so that an unavailable port fails
        // startup rather than a detached task.
        let grpc_listener = bind(grpc_addr, "gRPC").await?;
        let mirror_listener = bind(mirror_addr, "mirror").await?;

        let controller = Controller::new(
            PolicyStore::new(store_metrics),
            SnapshotRegistry::new(registry_metrics),
        );
        for label in labels.iter().filter(|l| !l.is_empty()) {
            if !controller.sync(label) {
                bail!("failed to publish an initial configuration for {label}");
            }
        }

        tokio::spawn(
            grpc(
                grpc_listener,
                controller.registry().clone(),
                tls.as_ref().map(TlsMaterial::server_config),
                grpc_metrics,
                sessions,
                drain.clone(),
            )
            .inspect_err(|error| error!(%error, "gRPC server failed")),
        );

        let artifacts = ArtifactIndex::default();
        if let Some(addr) = control_plane_addr {
            let controller_uuid =
                controller_uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            info!(%controller_uuid, "Subscribing to control plane events");

            let mut endpoint = Endpoint::from_shared(addr)?;
            if let Some(tls) = &tls {
                endpoint = endpoint.tls_config(tls.client_config(&control_plane_server_name))?;
            }
            let source = events::GrpcEventSource::new(endpoint, controller_uuid);

            let catalog = match control_plane_rest_addr {
                Some(base) => {
                    let client = match &tls {
                        Some(tls) => tls.http_client()?,
                        None => reqwest::Client::builder().build()?,
                    };
                    Some(Arc::new(events::HttpCatalog::new(client, base)) as Arc<dyn Catalog>)
                }
                None => None,
            };

            let dispatcher = events::EventDispatcher::new(
                Arc::new(artifacts.clone()),
                catalog,
                RetryExecutor::unbounded(retry_interval),
                drain.clone(),
            );
            let subscriber = events::Subscriber::new(source, dispatcher, retry_interval);
            tokio::spawn(
                subscriber
                    .run(drain.clone())
                    .instrument(info_span!("subscriber")),
            );
        }

        tokio::spawn(
            http::serve(mirror_listener, Mirror::new(artifacts), drain.clone())
                .inspect_err(|error| error!(%error, "Artifact mirror failed"))
                .instrument(info_span!("mirror")),
        );

        readiness.set(true);

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        drop(drain);
        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Parses a duration like `500ms`, `5s` or `1m`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let Some(offset) = s.rfind(|c: char| c.is_ascii_digit()) else {
        bail!("{s} does not contain a duration value");
    };
    let (magnitude, unit) = s.split_at(offset + 1);
    let magnitude = magnitude.parse::<u64>()?;

    let mul = match unit {
        "" if magnitude == 0 => 0,
        "ms" => 1,
        "s" => 1000,
        "m" => 1000 * 60,
        "h" => 1000 * 60 * 60,
        _ => bail!("invalid duration unit {unit} (expected one of 'ms', 's', 'm' or 'h')"),
    };

    let ms = magnitude
        .checked_mul(mul)
        .ok_or_else(|| anyhow!("duration {s} overflows when converted to milliseconds"))?;
    Ok(Duration::from_millis(ms))
}

async fn bind(addr: SocketAddr, name: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind the {name} server to {addr}"))
}

#[instrument(skip_all, fields(port = listener.local_addr().map(|a| a.port()).unwrap_or_default()))]
async fn grpc(
    listener: TcpListener,
    registry: SnapshotRegistry,
    tls: Option<ServerTlsConfig>,
    metrics: GrpcServerMetricsFamily,
    sessions: Sessions,
    drain: drain::Watch,
) -> Result<()> {
    let svc = grpc::RlsDiscoveryServer::new(
        registry,
        grpc::NodeIdLabel,
        drain.clone(),
        metrics,
        sessions,
    )
    .svc();

    let mut server = Server::builder();
    if let Some(tls) = tls {
        server = server.tls_config(tls)?;
    }

    let addr = listener.local_addr()?;
    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = server.add_service(svc).serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            close_rx.map(|_| {}),
        );
    }

    info!(%addr, "rate limit configuration gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}
