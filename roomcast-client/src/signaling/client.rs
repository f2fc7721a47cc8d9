//! Typed signaling client with per-request timeouts

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::messages::{
    ConnectTransportRequest, ConsumeRequest, ConsumeResponse, Empty, ProduceRequest,
    ProduceResponse, Request, TransportParamsResponse, NEW_PRODUCER_EVENT,
};
use super::Signaling;
use crate::error::SignalingError;
use crate::types::{
    Direction, DtlsParameters, MediaKind, ParticipantId, ProducerId, RtpCapabilities,
    RtpParameters, TransportOptions,
};

#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<dyn Signaling>,
    request_timeout: Duration,
}

impl SignalingClient {
    pub fn new(inner: Arc<dyn Signaling>, request_timeout: Duration) -> Self {
        Self {
            inner,
            request_timeout,
        }
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn call<P, R>(&self, request: Request, payload: &P) -> Result<R, SignalingError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let name = request.as_str();
        let payload = serde_json::to_value(payload).map_err(|source| SignalingError::Encode {
            request: name.to_string(),
            source,
        })?;

        let started = Instant::now();
        let response = tokio::time::timeout(self.request_timeout, self.inner.request(name, payload))
            .await
            .map_err(|_| {
                warn!(
                    request = name,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Signaling request timed out"
                );
                SignalingError::Timeout {
                    request: name.to_string(),
                    timeout: self.request_timeout,
                }
            })??;

        debug!(
            request = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Signaling request completed"
        );

        serde_json::from_value(response).map_err(|source| SignalingError::Decode {
            request: name.to_string(),
            source,
        })
    }

    pub async fn rtp_capabilities(&self) -> Result<RtpCapabilities, SignalingError> {
        self.call(Request::GetRtpCapabilities, &Empty {}).await
    }

    /// Ask the server to allocate a transport for one direction of media
    pub async fn create_transport(
        &self,
        direction: Direction,
    ) -> Result<TransportOptions, SignalingError> {
        let response: TransportParamsResponse = self
            .call(Request::create_transport(direction), &Empty {})
            .await?;
        Ok(response.params)
    }

    /// Forward the local DTLS parameters. The response body is only an ack.
    pub async fn connect_transport(
        &self,
        dtls_parameters: DtlsParameters,
        direction: Direction,
    ) -> Result<(), SignalingError> {
        let _ack: Value = self
            .call(
                Request::ConnectTransport,
                &ConnectTransportRequest {
                    dtls_parameters,
                    direction,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SignalingError> {
        let response: ProduceResponse = self
            .call(
                Request::Produce,
                &ProduceRequest {
                    kind,
                    rtp_parameters,
                },
            )
            .await?;
        Ok(response.id)
    }

    /// Participants currently producing in the room
    pub async fn producers(&self) -> Result<Vec<ParticipantId>, SignalingError> {
        self.call(Request::GetProducers, &Empty {}).await
    }

    pub async fn consume(
        &self,
        participant: &ParticipantId,
    ) -> Result<ConsumeResponse, SignalingError> {
        self.call(
            Request::Consume,
            &ConsumeRequest {
                producer_socket_id: participant.clone(),
            },
        )
        .await
    }

    /// Raw `new-producer` event stream
    pub fn new_producer_events(&self) -> mpsc::UnboundedReceiver<Value> {
        self.inner.subscribe(NEW_PRODUCER_EVENT)
    }
}
