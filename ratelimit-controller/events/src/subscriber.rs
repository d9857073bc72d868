use crate::{decode, EventSource, EventStream};
use futures::prelude::*;
use ratelimit_controller_core::{artifact::Event, grpc_code_str};
use std::sync::Arc;
use tokio::{sync::Notify, task::JoinHandle, time};
use tracing::{debug, error, info, Instrument};

/// Handles decoded lifecycle events.
#[async_trait::async_trait]
pub trait HandleEvent: Send + Sync + 'static {
    async fn handle(&self, event: Event);
}

/// Holds a single upstream event stream open, reconnecting after transient
/// failures.
///
/// Read failures signal a reconnect through a single-slot notification, so a
/// burst of failures results in one reconnect cycle.
#[derive(Debug)]
pub struct Subscriber<S, H> {
    source: S,
    handler: Arc<H>,
    retry_interval: time::Duration,
}

// === impl Subscriber ===

impl<S: EventSource, H: HandleEvent> Subscriber<S, H> {
    pub fn new(source: S, handler: H, retry_interval: time::Duration) -> Self {
        Self {
            source,
            handler: Arc::new(handler),
            retry_interval,
        }
    }

    /// Consumes events until the process begins shutting down.
    pub async fn run(self, drain: drain::Watch) {
        let reconnect = Arc::new(Notify::new());
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        let mut reader = self.connect(&reconnect).await;
        loop {
            tokio::select! {
                _ = reconnect.notified() => {}
                _ = (&mut shutdown) => break,
            }

            tokio::select! {
                _ = time::sleep(self.retry_interval) => {}
                _ = (&mut shutdown) => break,
            }

            // Close the existing connection, if any, before dialing again.
            if let Some(task) = reader.take() {
                task.abort();
            }
            error!("Connection lost. Retrying to connect to the control plane");
            reader = self.connect(&reconnect).await;
        }

        if let Some(task) = reader.take() {
            task.abort();
        }
        debug!("Event subscriber shut down");
    }

    async fn connect(&self, reconnect: &Arc<Notify>) -> Option<JoinHandle<()>> {
        match self.source.connect().await {
            Ok(stream) => {
                info!("Connected to the control plane event stream");
                let task = read(stream, self.handler.clone(), reconnect.clone())
                    .instrument(tracing::debug_span!("events"));
                Some(tokio::spawn(task))
            }
            Err(status) => {
                error!(
                    code = grpc_code_str(status.code()),
                    message = %status.message(),
                    "Error while initializing the connection",
                );
                reconnect.notify_one();
                None
            }
        }
    }
}

/// Returns true if a stream that failed with `code` should be reopened.
pub fn is_reconnectable(code: tonic::Code) -> bool {
    matches!(
        code,
        tonic::Code::Unavailable
            | tonic::Code::DeadlineExceeded
            | tonic::Code::Cancelled
            | tonic::Code::ResourceExhausted
            | tonic::Code::Aborted
            | tonic::Code::Internal
    )
}

async fn read<H: HandleEvent>(mut stream: EventStream, handler: Arc<H>, reconnect: Arc<Notify>) {
    loop {
        match stream.next().await {
            Some(Ok(event)) => {
                debug!(event_type = %event.r#type, "Received event");
                if let Some(event) = decode(event) {
                    handler.handle(event).await;
                }
            }
            None => {
                info!("Event stream closed by the control plane");
                reconnect.notify_one();
                return;
            }
            Some(Err(status)) if is_reconnectable(status.code()) => {
                error!(
                    code = grpc_code_str(status.code()),
                    message = %status.message(),
                    "Connection unavailable",
                );
                reconnect.notify_one();
                return;
            }
            Some(Err(status)) => {
                error!(
                    code = grpc_code_str(status.code()),
                    message = %status.message(),
                    "Event stream failed; not reconnecting",
                );
                return;
            }
        }
    }
}
