//! Roomcast client: joining a media session hosted behind an SFU
//!
//! This crate negotiates a local media transport device with the session
//! server, publishes the local participant's tracks and keeps the render
//! surface in sync with every other participant's producers.
//!
//! ## Architecture
//!
//! - **`negotiate`**: fetches router capabilities and loads the `Device`
//! - **`publish`**: send transport, handshake relay, one producer per local track
//! - **`SubscriptionManager`**: one receive transport + consumer per remote
//!   participant, driven by the initial enumeration and live `new-producer` events
//! - **`Session`**: sequences the three and owns teardown
//!
//! The signaling channel, the media engine, local capture and rendering are
//! host-provided collaborators behind the `Signaling`, `Device`, `LocalMedia`
//! and `RenderSink` traits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomcast_client::{Config, Session};
//!
//! let config = Config::load(Some("roomcast.toml"))?;
//! roomcast_client::logging::init_logging(&config.logging)?;
//!
//! let session = Session::start(&config, signaling, device, media, sink).await?;
//! // ... later
//! session.shutdown().await;
//! ```

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod negotiator;
pub mod publisher;
pub mod render;
pub mod session;
pub mod signaling;
pub mod subscription;
pub mod types;

pub use capture::{CaptureConstraints, LocalMedia};
pub use config::{Config, LogFormat, PublishPolicy};
pub use device::{
    ConnectHandler, Consumer, Device, LoadedDevice, MediaTrack, Producer, RecvTransport,
    SendTransport, SendTransportHandler, Transport,
};
pub use error::{
    CaptureError, DeviceError, NegotiationError, PublishError, Result, SessionError,
    SignalingError, SubscriptionError,
};
pub use negotiator::negotiate;
pub use publisher::{publish, Publication};
pub use render::RenderSink;
pub use session::{Session, SessionState};
pub use signaling::{ChannelSignaling, Frame, Signaling, SignalingClient};
pub use subscription::{
    DiscoverySummary, SubscribeOutcome, SubscriptionManager, SubscriptionState, SubscriptionTable,
};
pub use types::{
    ConsumerId, ConsumerParams, Direction, DtlsParameters, MediaKind, MediaStream, ParticipantId,
    ProducerId, RtpCapabilities, RtpParameters, SessionId, TransportOptions,
};
