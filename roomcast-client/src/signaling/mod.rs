//! Signaling contract with the session server
//!
//! The session logic only needs two primitives from the signaling channel:
//! an acknowledged request and a stream of pushed events. [`Signaling`]
//! captures both; [`SignalingClient`] layers the typed request catalog and
//! per-request timeouts on top.

pub mod channel;
pub mod client;
pub mod messages;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SignalingError;

pub use channel::{ChannelSignaling, Frame};
pub use client::SignalingClient;

/// Bidirectional request/response and event-push channel
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send a named request and wait for its acknowledgement payload
    async fn request(&self, name: &str, payload: Value) -> Result<Value, SignalingError>;

    /// Subscribe to a pushed event. The stream ends when the channel closes.
    fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Value>;
}
