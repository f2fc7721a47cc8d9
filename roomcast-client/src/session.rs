//! Session lifecycle: negotiate, publish, then stay subscribed

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::capture::LocalMedia;
use crate::config::Config;
use crate::device::Device;
use crate::error::{Result, SessionError};
use crate::negotiator::negotiate;
use crate::publisher::{publish, Publication};
use crate::render::RenderSink;
use crate::signaling::{Signaling, SignalingClient};
use crate::subscription::SubscriptionManager;
use crate::types::{ParticipantId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Subscriptions are being established
    Active,
    /// Shut down; every transport has been closed
    Closed,
}

/// A joined media session
pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    started_at: DateTime<Utc>,
    publication: Option<Publication>,
    subscriptions: Arc<SubscriptionManager>,
    cancel: CancellationToken,
    /// Flips to true once the subscription loop has returned
    loop_done: watch::Receiver<bool>,
}

impl Session {
    /// Join the session: negotiate capabilities, publish local media and
    /// start the subscription loop.
    ///
    /// Negotiation failure is always fatal. Publish failure is fatal unless
    /// `publish.required` is false, in which case the session continues
    /// receive-only.
    pub async fn start(
        config: &Config,
        signaling: Arc<dyn Signaling>,
        device: Arc<dyn Device>,
        media: Arc<dyn LocalMedia>,
        sink: Arc<dyn RenderSink>,
    ) -> Result<Self> {
        let id = SessionId::generate();
        let span = tracing::info_span!("session", session_id = %id);
        Self::start_inner(id, config, signaling, device, media, sink)
            .instrument(span)
            .await
    }

    async fn start_inner(
        id: SessionId,
        config: &Config,
        signaling: Arc<dyn Signaling>,
        device: Arc<dyn Device>,
        media: Arc<dyn LocalMedia>,
        sink: Arc<dyn RenderSink>,
    ) -> Result<Self> {
        let client = SignalingClient::new(signaling, config.signaling.request_timeout());

        // Subscribe before anything else so joins that race the enumeration
        // are buffered rather than lost
        let events = client.new_producer_events();

        let device = negotiate(&client, device).await?;

        let publication =
            match publish(&device, &client, media.as_ref(), sink.as_ref(), &config.publish).await {
                Ok(publication) => Some(publication),
                Err(e) if !config.publish.required => {
                    warn!(error = %e, "Publish failed, continuing receive-only");
                    None
                }
                Err(e) => {
                    error!(error = %e, "Publish failed");
                    return Err(SessionError::Publish(e));
                }
            };

        let subscriptions = Arc::new(SubscriptionManager::new(
            device,
            client,
            sink,
            config.subscription.clone(),
        ));

        let cancel = CancellationToken::new();
        let (done_tx, loop_done) = watch::channel(false);
        {
            let subscriptions = Arc::clone(&subscriptions);
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    subscriptions.run(events, cancel).await;
                    let _ = done_tx.send(true);
                }
                .in_current_span(),
            );
        }

        info!(
            published = publication.as_ref().map_or(0, |p| p.producers.len()),
            "Session started"
        );

        Ok(Self {
            id,
            state: RwLock::new(SessionState::Active),
            started_at: Utc::now(),
            publication,
            subscriptions,
            cancel,
            loop_done,
        })
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Outbound media, absent when running receive-only
    #[must_use]
    pub const fn publication(&self) -> Option<&Publication> {
        self.publication.as_ref()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub async fn unsubscribe(&self, participant: &ParticipantId) -> bool {
        self.subscriptions.unsubscribe(participant).await
    }

    /// Wait for the subscription loop to finish, which happens once the
    /// initial enumeration is done and the event stream has closed, or after
    /// shutdown. Any number of callers may wait concurrently.
    pub async fn wait(&self) {
        let mut done = self.loop_done.clone();
        if done.wait_for(|finished| *finished).await.is_err() {
            // Sender dropped without signalling: the task panicked
            warn!(session_id = %self.id, "Subscription task ended abnormally");
        }
    }

    /// Stop reacting to joins and close every transport. Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        // No subscription can be registered once the loop has returned
        self.cancel.cancel();
        self.wait().await;

        self.subscriptions.close_all().await;
        if let Some(publication) = &self.publication {
            publication.close().await;
        }

        info!(
            session_id = %self.id,
            duration_secs = (Utc::now() - self.started_at).num_seconds(),
            "Session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
