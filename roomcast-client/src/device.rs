//! Media transport device contract
//!
//! The media engine (capability negotiation, ICE/DTLS, SRTP, codecs) lives
//! outside this crate. These traits are the only surface the session logic
//! touches:
//!
//! - **`Device`**: loaded once with router capabilities, then creates transports
//! - **`SendTransport`** / **`RecvTransport`**: one direction of media flow
//! - **`Producer`** / **`Consumer`**: one outbound / inbound track
//!
//! Handshake callbacks are handed to the device together with the transport
//! options, so they are always registered before the first `produce` or
//! `consume` reaches the engine.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DeviceError, SignalingError};
use crate::types::{
    ConsumerId, ConsumerParams, Direction, DtlsParameters, MediaKind, ProducerId,
    RtpCapabilities, RtpParameters, TransportOptions,
};

/// A local or remote media track
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Stop the track. Idempotent.
    fn stop(&self);
}

/// Invoked by the engine when a transport needs its DTLS handshake with the
/// server. Fires at most once per transport.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), SignalingError>;
}

/// Handshake callbacks for a send transport. `on_produce` fires once per
/// produced track and must return the server-assigned producer id.
#[async_trait]
pub trait SendTransportHandler: ConnectHandler {
    async fn on_produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SignalingError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn id(&self) -> &str;

    fn direction(&self) -> Direction;

    /// Close the transport and every producer/consumer bound to it
    async fn close(&self);
}

#[async_trait]
pub trait SendTransport: Transport {
    /// Produce a local track. Suspends until the `on_produce` round-trip
    /// (and, on first use, `on_connect`) completes.
    async fn produce(&self, track: Arc<dyn MediaTrack>) -> Result<Arc<dyn Producer>, DeviceError>;
}

#[async_trait]
pub trait RecvTransport: Transport {
    /// Consume a remote producer. Triggers `on_connect` on first use.
    async fn consume(&self, params: ConsumerParams) -> Result<Arc<dyn Consumer>, DeviceError>;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn close(&self);
}

pub trait Consumer: Send + Sync {
    fn id(&self) -> &ConsumerId;

    fn producer_id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    /// The received track, if the engine produced one
    fn track(&self) -> Option<Arc<dyn MediaTrack>>;

    fn close(&self);
}

/// Capability-negotiation context of the media engine
#[async_trait]
pub trait Device: Send + Sync {
    /// Load router capabilities. Called exactly once per session.
    async fn load(&self, capabilities: &RtpCapabilities) -> Result<(), DeviceError>;

    fn is_loaded(&self) -> bool;

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn SendTransportHandler>,
    ) -> Result<Arc<dyn SendTransport>, DeviceError>;

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<dyn RecvTransport>, DeviceError>;
}

/// A device that has successfully loaded router capabilities.
///
/// Only [`crate::negotiator::negotiate`] constructs this type, and transports
/// can only be created through it, so nothing can produce or consume before
/// negotiation has completed.
#[derive(Clone)]
pub struct LoadedDevice {
    inner: Arc<dyn Device>,
}

impl LoadedDevice {
    pub(crate) fn new(inner: Arc<dyn Device>) -> Self {
        Self { inner }
    }

    pub async fn create_send_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn SendTransportHandler>,
    ) -> Result<Arc<dyn SendTransport>, DeviceError> {
        self.inner.create_send_transport(options, handler).await
    }

    pub async fn create_recv_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<dyn RecvTransport>, DeviceError> {
        self.inner.create_recv_transport(options, handler).await
    }
}

impl fmt::Debug for LoadedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedDevice")
            .field("loaded", &self.inner.is_loaded())
            .finish()
    }
}
