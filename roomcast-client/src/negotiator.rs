//! Router capability negotiation

use std::sync::Arc;

use tracing::{error, info};

use crate::device::{Device, LoadedDevice};
use crate::error::{DeviceError, NegotiationError};
use crate::signaling::SignalingClient;

/// Fetch the router's RTP capabilities and load them into the device.
///
/// Fatal to the session on failure; there is no retry at this layer.
pub async fn negotiate(
    signaling: &SignalingClient,
    device: Arc<dyn Device>,
) -> Result<LoadedDevice, NegotiationError> {
    if device.is_loaded() {
        return Err(DeviceError::AlreadyLoaded.into());
    }

    let capabilities = signaling.rtp_capabilities().await.map_err(|e| {
        error!(error = %e, "Failed to fetch router RTP capabilities");
        e
    })?;

    device.load(&capabilities).await.map_err(|e| {
        error!(error = %e, "Device rejected router RTP capabilities");
        e
    })?;

    info!("Device loaded with router RTP capabilities");
    Ok(LoadedDevice::new(device))
}
