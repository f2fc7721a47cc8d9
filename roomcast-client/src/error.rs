use std::time::Duration;

use thiserror::Error;

use crate::types::{MediaKind, ParticipantId};

/// Failure of a single signaling round-trip
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Signaling request '{request}' timed out after {timeout:?}")]
    Timeout { request: String, timeout: Duration },

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Failed to encode '{request}' payload: {source}")]
    Encode {
        request: String,
        source: serde_json::Error,
    },

    #[error("Unexpected response to '{request}': {source}")]
    Decode {
        request: String,
        source: serde_json::Error,
    },
}

/// Failure reported by the media transport device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device rejected router capabilities: {0}")]
    UnsupportedCapabilities(String),

    #[error("Device already loaded")]
    AlreadyLoaded,

    #[error("Device not loaded")]
    NotLoaded,

    #[error("Transport fault: {0}")]
    Transport(String),

    #[error("Transport handshake failed: {0}")]
    Handshake(#[from] SignalingError),

    #[error("Transport closed")]
    Closed,
}

/// Local capture failure
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    Unavailable(String),

    #[error("Capture permission denied")]
    PermissionDenied,
}

/// Capability negotiation failure. Fatal to session start.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Failed to fetch router capabilities: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Failed to load device: {0}")]
    Load(#[from] DeviceError),
}

/// Send-side setup failure
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to request send transport: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Failed to create send transport: {0}")]
    Transport(DeviceError),

    #[error("Failed to acquire local media: {0}")]
    Capture(#[from] CaptureError),

    #[error("No local tracks to publish")]
    NoTracks,

    #[error("Failed to produce {kind} track: {source}")]
    Produce { kind: MediaKind, source: DeviceError },
}

/// Failure to subscribe to one remote participant. Contained to that
/// participant; never aborts the session.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Server rejected consume: {0}")]
    Rejected(String),

    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Receive transport failed: {0}")]
    Transport(#[from] DeviceError),

    #[error("Consume timed out after {0:?}")]
    Timeout(Duration),

    #[error("Consumer for {0} carried no track")]
    NoTrack(ParticipantId),

    #[error("Subscription cancelled")]
    Cancelled,
}

/// Session start failure
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Capability negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
