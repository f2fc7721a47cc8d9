//! Publish pipeline: send transport, local capture, producers

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capture::LocalMedia;
use crate::config::{PublishConfig, PublishPolicy};
use crate::device::{
    ConnectHandler, LoadedDevice, MediaTrack, Producer, SendTransport, SendTransportHandler,
};
use crate::error::{PublishError, SignalingError};
use crate::render::RenderSink;
use crate::signaling::SignalingClient;
use crate::types::{Direction, DtlsParameters, MediaKind, MediaStream, ProducerId, RtpParameters};

const LOCAL_STREAM_ID: &str = "local";

/// Relays send-transport handshakes to the signaling server
struct SendHandshake {
    signaling: SignalingClient,
}

#[async_trait]
impl ConnectHandler for SendHandshake {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), SignalingError> {
        debug!(direction = %Direction::Send, "Connecting transport");
        self.signaling
            .connect_transport(dtls_parameters, Direction::Send)
            .await
    }
}

#[async_trait]
impl SendTransportHandler for SendHandshake {
    async fn on_produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SignalingError> {
        let id = self.signaling.produce(kind, rtp_parameters).await?;
        debug!(kind = %kind, producer_id = %id, "Server accepted producer");
        Ok(id)
    }
}

/// Outbound media of a session
pub struct Publication {
    pub transport: Arc<dyn SendTransport>,
    pub producers: Vec<Arc<dyn Producer>>,
    pub local_stream: MediaStream,
}

impl Publication {
    #[must_use]
    pub fn kinds(&self) -> Vec<MediaKind> {
        self.producers.iter().map(|p| p.kind()).collect()
    }

    /// Close producers, the send transport and the captured tracks
    pub async fn close(&self) {
        for producer in &self.producers {
            producer.close();
        }
        self.transport.close().await;
        for track in &self.local_stream.tracks {
            track.stop();
        }
        info!(transport_id = self.transport.id(), "Publication closed");
    }
}

/// Create the send transport and produce every local track on it.
///
/// Tracks are produced one after another; each produce suspends until the
/// server has assigned a producer id.
pub async fn publish(
    device: &LoadedDevice,
    signaling: &SignalingClient,
    media: &dyn LocalMedia,
    sink: &dyn RenderSink,
    config: &PublishConfig,
) -> Result<Publication, PublishError> {
    let options = signaling.create_transport(Direction::Send).await?;
    let handshake = Arc::new(SendHandshake {
        signaling: signaling.clone(),
    });
    let transport = device
        .create_send_transport(options, handshake)
        .await
        .map_err(PublishError::Transport)?;

    info!(transport_id = transport.id(), "Send transport created");

    let tracks = match media.acquire(&config.constraints()).await {
        Ok(tracks) if !tracks.is_empty() => tracks,
        Ok(_) => {
            transport.close().await;
            return Err(PublishError::NoTracks);
        }
        Err(e) => {
            transport.close().await;
            return Err(e.into());
        }
    };

    let local_stream = MediaStream::new(LOCAL_STREAM_ID, tracks);
    sink.attach_local(&local_stream);

    let producers = match produce_all(transport.as_ref(), &local_stream.tracks, config.policy).await
    {
        Ok(producers) => producers,
        Err(e) => {
            transport.close().await;
            for track in &local_stream.tracks {
                track.stop();
            }
            sink.detach_local(&local_stream);
            return Err(e);
        }
    };

    info!(
        transport_id = transport.id(),
        producers = producers.len(),
        tracks = local_stream.tracks.len(),
        "Local media published"
    );

    Ok(Publication {
        transport,
        producers,
        local_stream,
    })
}

async fn produce_all(
    transport: &dyn SendTransport,
    tracks: &[Arc<dyn MediaTrack>],
    policy: PublishPolicy,
) -> Result<Vec<Arc<dyn Producer>>, PublishError> {
    let mut producers: Vec<Arc<dyn Producer>> = Vec::with_capacity(tracks.len());
    let mut first_error = None;

    for track in tracks {
        let kind = track.kind();
        match transport.produce(Arc::clone(track)).await {
            Ok(producer) => {
                debug!(kind = %kind, producer_id = %producer.id(), "Track produced");
                producers.push(producer);
            }
            Err(source) => {
                warn!(kind = %kind, error = %source, "Failed to produce track");
                let err = PublishError::Produce { kind, source };
                match policy {
                    PublishPolicy::Abort => {
                        for producer in &producers {
                            producer.close();
                        }
                        return Err(err);
                    }
                    PublishPolicy::BestEffort => {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
    }

    match first_error {
        Some(err) if producers.is_empty() => Err(err),
        _ => Ok(producers),
    }
}
