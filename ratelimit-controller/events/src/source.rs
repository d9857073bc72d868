use futures::prelude::*;
use ratelimit_controller_api::events::{
    self as proto, event_stream_service_client::EventStreamServiceClient,
};
use std::pin::Pin;
use tonic::{metadata::MetadataValue, transport::Endpoint};
use tracing::debug;

/// The request metadata key that identifies the controller to the upstream.
pub const CONTROLLER_UUID_HEADER: &str = "controller-uuid";

pub type EventStream = Pin<Box<dyn Stream<Item = Result<proto::Event, tonic::Status>> + Send>>;

/// Opens upstream lifecycle event streams.
///
/// Each call dials a fresh connection; dropping the returned stream closes
/// it.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync + 'static {
    async fn connect(&self) -> Result<EventStream, tonic::Status>;
}

/// Streams events from the control plane's gRPC event service.
#[derive(Clone, Debug)]
pub struct GrpcEventSource {
    endpoint: Endpoint,
    controller_uuid: String,
}

// === impl GrpcEventSource ===

impl GrpcEventSource {
    pub fn new(endpoint: Endpoint, controller_uuid: impl Into<String>) -> Self {
        Self {
            endpoint,
            controller_uuid: controller_uuid.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventSource for GrpcEventSource {
    async fn connect(&self) -> Result<EventStream, tonic::Status> {
        let uuid = MetadataValue::try_from(self.controller_uuid.as_str())
            .map_err(|_| tonic::Status::invalid_argument("invalid controller UUID"))?;

        debug!(uri = %self.endpoint.uri(), "Connecting to the control plane");
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|error| tonic::Status::unavailable(error.to_string()))?;

        let mut req = tonic::Request::new(proto::Request {
            event: self.controller_uuid.clone(),
        });
        req.metadata_mut().insert(CONTROLLER_UUID_HEADER, uuid);

        let rsp = EventStreamServiceClient::new(channel)
            .stream_events(req)
            .await?;
        Ok(Box::pin(rsp.into_inner()))
    }
}
