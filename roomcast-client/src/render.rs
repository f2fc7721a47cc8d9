//! Render sink contract
//!
//! The sink owns display and layout. Session logic only hands it streams
//! keyed by participant and never inspects media.

use crate::error::SubscriptionError;
use crate::types::{MediaStream, ParticipantId};

#[cfg_attr(test, mockall::automock)]
pub trait RenderSink: Send + Sync {
    /// Local preview, attached once after capture
    fn attach_local(&self, stream: &MediaStream);

    /// Withdraw the local preview after publishing failed and its tracks
    /// were stopped
    fn detach_local(&self, _stream: &MediaStream) {}

    /// One call per successful subscription
    fn attach_remote(&self, participant: &ParticipantId, stream: MediaStream);

    fn detach_remote(&self, _participant: &ParticipantId) {}

    /// Structured report of a contained per-participant failure
    fn on_subscription_error(&self, _participant: &ParticipantId, _error: &SubscriptionError) {}
}
