//! Subscription manager - discovers remote participants and consumes their media
//!
//! This module provides:
//! - A per-participant state machine (`Discovered` → `Active` | `Failed`)
//! - An owned subscription table with atomic check-and-insert, so the initial
//!   enumeration and live join events can never double-subscribe
//! - Per-participant failure isolation
//! - A single-task event loop that interleaves enumeration and join handling
//!
//! Every subscribed participant gets its own receive transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::device::{ConnectHandler, Consumer, LoadedDevice, RecvTransport};
use crate::error::{SignalingError, SubscriptionError};
use crate::render::RenderSink;
use crate::signaling::messages::NewProducerEvent;
use crate::signaling::SignalingClient;
use crate::types::{Direction, DtlsParameters, MediaStream, ParticipantId};

/// Lifecycle of one remote participant's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Discovered,
    TransportRequested,
    Connected,
    Consuming,
    Active,
    Failed,
}

impl SubscriptionState {
    /// Whether this state blocks a new subscription attempt
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Result of one `subscribe_to` call
#[derive(Debug)]
pub enum SubscribeOutcome {
    Subscribed,
    Duplicate,
    /// Unsubscribed while the subscription was still being established
    Cancelled,
    Failed(SubscriptionError),
}

impl SubscribeOutcome {
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

/// Counts from one enumeration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySummary {
    pub discovered: usize,
    pub subscribed: usize,
    pub duplicates: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl DiscoverySummary {
    fn record(&mut self, outcome: &SubscribeOutcome) {
        match outcome {
            SubscribeOutcome::Subscribed => self.subscribed += 1,
            SubscribeOutcome::Duplicate => self.duplicates += 1,
            SubscribeOutcome::Cancelled => self.cancelled += 1,
            SubscribeOutcome::Failed(_) => self.failed += 1,
        }
    }
}

struct SubscriptionEntry {
    /// Identifies the claim that owns this entry
    generation: u64,
    state: SubscriptionState,
    /// Set by `unsubscribe` while the claim is still in flight
    cancelled: bool,
    transport: Option<Arc<dyn RecvTransport>>,
    consumer: Option<Arc<dyn Consumer>>,
}

impl SubscriptionEntry {
    fn claimed(generation: u64) -> Self {
        Self {
            generation,
            state: SubscriptionState::Discovered,
            cancelled: false,
            transport: None,
            consumer: None,
        }
    }
}

/// What `SubscriptionTable::detach` found
enum Detached {
    Active {
        transport: Option<Arc<dyn RecvTransport>>,
        consumer: Option<Arc<dyn Consumer>>,
    },
    /// Still being established; the owning claim will clean up
    Pending,
}

/// Owned mapping from participant to subscription state.
///
/// All check-and-insert goes through [`SubscriptionTable::try_claim`], which
/// is atomic per key and hands out a generation. Every later mutation is
/// conditional on that generation, so a claim that was cancelled or
/// superseded can never write into someone else's entry. No guard is ever
/// held across an await.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: DashMap<ParticipantId, SubscriptionEntry>,
    next_generation: AtomicU64,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a participant for subscription. Returns `None` if a live
    /// subscription (in progress or active) already exists. Failed entries
    /// may be claimed again.
    pub fn try_claim(&self, participant: &ParticipantId) -> Option<u64> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        match self.entries.entry(participant.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().state.is_live() {
                    None
                } else {
                    occupied.insert(SubscriptionEntry::claimed(generation));
                    Some(generation)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SubscriptionEntry::claimed(generation));
                Some(generation)
            }
        }
    }

    #[must_use]
    pub fn has_subscription(&self, participant: &ParticipantId) -> bool {
        self.entries
            .get(participant)
            .is_some_and(|entry| entry.state.is_live())
    }

    #[must_use]
    pub fn state(&self, participant: &ParticipantId) -> Option<SubscriptionState> {
        self.entries.get(participant).map(|entry| entry.state)
    }

    /// Run `update` if `generation` still owns the entry and it was not
    /// cancelled
    fn with_claim<R>(
        &self,
        participant: &ParticipantId,
        generation: u64,
        update: impl FnOnce(&mut SubscriptionEntry) -> R,
    ) -> Option<R> {
        let mut entry = self.entries.get_mut(participant)?;
        if entry.generation != generation || entry.cancelled {
            return None;
        }
        Some(update(&mut *entry))
    }

    /// Whether `generation` still owns a non-cancelled entry
    #[must_use]
    pub fn is_current(&self, participant: &ParticipantId, generation: u64) -> bool {
        self.with_claim(participant, generation, |_| ()).is_some()
    }

    fn advance(
        &self,
        participant: &ParticipantId,
        generation: u64,
        state: SubscriptionState,
    ) -> bool {
        self.with_claim(participant, generation, |entry| entry.state = state)
            .is_some()
    }

    fn attach_transport(
        &self,
        participant: &ParticipantId,
        generation: u64,
        transport: Arc<dyn RecvTransport>,
    ) -> bool {
        self.with_claim(participant, generation, |entry| {
            entry.transport = Some(transport);
        })
        .is_some()
    }

    fn take_transport(
        &self,
        participant: &ParticipantId,
        generation: u64,
    ) -> Option<Arc<dyn RecvTransport>> {
        let mut entry = self.entries.get_mut(participant)?;
        if entry.generation != generation {
            return None;
        }
        entry.transport.take()
    }

    /// Record the consumer of an established subscription. Returns false,
    /// leaving the table untouched, if the claim was cancelled or superseded.
    pub fn register_subscription(
        &self,
        participant: &ParticipantId,
        generation: u64,
        transport: Arc<dyn RecvTransport>,
        consumer: Arc<dyn Consumer>,
    ) -> bool {
        self.with_claim(participant, generation, |entry| {
            entry.state = SubscriptionState::Active;
            entry.transport = Some(transport);
            entry.consumer = Some(consumer);
        })
        .is_some()
    }

    /// Mark a claim as failed. A cancelled claim is dropped instead, so the
    /// participant can be claimed again right away.
    pub fn mark_failed(&self, participant: &ParticipantId, generation: u64) {
        let cancelled = {
            let Some(mut entry) = self.entries.get_mut(participant) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.state = SubscriptionState::Failed;
            entry.transport = None;
            entry.consumer = None;
            entry.cancelled
        };
        if cancelled {
            self.release(participant, generation);
        }
    }

    /// Drop the entry if `generation` still owns it
    fn release(&self, participant: &ParticipantId, generation: u64) {
        self.entries
            .remove_if(participant, |_, entry| entry.generation == generation);
    }

    /// Unsubscribe bookkeeping: active entries are removed and their
    /// resources handed back, in-flight ones are flagged as cancelled and
    /// failed ones are forgotten.
    fn detach(&self, participant: &ParticipantId) -> Option<Detached> {
        let Entry::Occupied(mut occupied) = self.entries.entry(participant.clone()) else {
            return None;
        };
        let (state, cancelled) = (occupied.get().state, occupied.get().cancelled);
        match state {
            SubscriptionState::Active => {
                let (_, entry) = occupied.remove_entry();
                Some(Detached::Active {
                    transport: entry.transport,
                    consumer: entry.consumer,
                })
            }
            SubscriptionState::Failed => {
                occupied.remove();
                None
            }
            _ if cancelled => None,
            _ => {
                occupied.get_mut().cancelled = true;
                Some(Detached::Pending)
            }
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == SubscriptionState::Active)
            .count()
    }

    /// Participants with an active subscription, sorted
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.state == SubscriptionState::Active)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drain(&self) -> Vec<(ParticipantId, SubscriptionEntry)> {
        let keys: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }
}

/// Relays receive-transport handshakes to the signaling server
struct RecvHandshake {
    signaling: SignalingClient,
    participant: ParticipantId,
}

#[async_trait]
impl ConnectHandler for RecvHandshake {
    async fn on_connect(&self, dtls_parameters: DtlsParameters) -> Result<(), SignalingError> {
        debug!(participant = %self.participant, direction = %Direction::Recv, "Connecting transport");
        self.signaling
            .connect_transport(dtls_parameters, Direction::Recv)
            .await
    }
}

pub struct SubscriptionManager {
    device: LoadedDevice,
    signaling: SignalingClient,
    sink: Arc<dyn RenderSink>,
    config: SubscriptionConfig,
    table: SubscriptionTable,
}

impl SubscriptionManager {
    pub fn new(
        device: LoadedDevice,
        signaling: SignalingClient,
        sink: Arc<dyn RenderSink>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            device,
            signaling,
            sink,
            config,
            table: SubscriptionTable::new(),
        }
    }

    #[must_use]
    pub const fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// Subscribe to every participant already producing in the room.
    ///
    /// With `enumeration_concurrency == 1` each subscription fully resolves
    /// before the next one starts.
    pub async fn discover_existing(&self) -> Result<DiscoverySummary, SubscriptionError> {
        let participants = self.signaling.producers().await?;
        let mut summary = DiscoverySummary {
            discovered: participants.len(),
            ..DiscoverySummary::default()
        };

        info!(count = participants.len(), "Discovered existing producers");

        let concurrency = self.config.enumeration_concurrency.max(1);
        if concurrency == 1 {
            for participant in participants {
                let outcome = self.subscribe_to(participant).await;
                summary.record(&outcome);
            }
        } else {
            let outcomes: Vec<_> = stream::iter(participants)
                .map(|participant| self.subscribe_to(participant))
                .buffer_unordered(concurrency)
                .collect()
                .await;
            for outcome in &outcomes {
                summary.record(outcome);
            }
        }

        info!(
            subscribed = summary.subscribed,
            duplicates = summary.duplicates,
            cancelled = summary.cancelled,
            failed = summary.failed,
            "Initial enumeration finished"
        );
        Ok(summary)
    }

    /// React to a live `new-producer` notification
    pub async fn on_participant_joined(&self, participant: ParticipantId) -> SubscribeOutcome {
        debug!(participant = %participant, "Participant joined");
        self.subscribe_to(participant).await
    }

    /// Subscribe to one participant. Idempotent per participant; failures are
    /// contained, logged and reported to the render sink.
    pub async fn subscribe_to(&self, participant: ParticipantId) -> SubscribeOutcome {
        let Some(generation) = self.table.try_claim(&participant) else {
            debug!(participant = %participant, "Already subscribed, skipping");
            return SubscribeOutcome::Duplicate;
        };

        match self.establish(&participant, generation).await {
            Ok(()) => {
                info!(participant = %participant, "Subscribed to participant");
                SubscribeOutcome::Subscribed
            }
            Err(SubscriptionError::Cancelled) => {
                if let Some(transport) = self.table.take_transport(&participant, generation) {
                    transport.close().await;
                }
                self.table.release(&participant, generation);
                info!(
                    participant = %participant,
                    "Subscription cancelled before it became active"
                );
                SubscribeOutcome::Cancelled
            }
            Err(err) => {
                if let Some(transport) = self.table.take_transport(&participant, generation) {
                    transport.close().await;
                }
                // The failed marker stays observable; a later join event may
                // claim the participant again.
                self.table.mark_failed(&participant, generation);

                warn!(participant = %participant, error = %err, "Subscription failed");
                self.sink.on_subscription_error(&participant, &err);
                SubscribeOutcome::Failed(err)
            }
        }
    }

    fn step(
        &self,
        participant: &ParticipantId,
        generation: u64,
        state: SubscriptionState,
    ) -> Result<(), SubscriptionError> {
        if self.table.advance(participant, generation, state) {
            Ok(())
        } else {
            Err(SubscriptionError::Cancelled)
        }
    }

    async fn establish(
        &self,
        participant: &ParticipantId,
        generation: u64,
    ) -> Result<(), SubscriptionError> {
        self.step(participant, generation, SubscriptionState::TransportRequested)?;
        let options = self.signaling.create_transport(Direction::Recv).await?;

        let handshake = Arc::new(RecvHandshake {
            signaling: self.signaling.clone(),
            participant: participant.clone(),
        });
        let transport = self.device.create_recv_transport(options, handshake).await?;
        if !self
            .table
            .attach_transport(participant, generation, Arc::clone(&transport))
        {
            transport.close().await;
            return Err(SubscriptionError::Cancelled);
        }
        debug!(participant = %participant, transport_id = transport.id(), "Receive transport created");

        // Connected while the server resolves which producer to expose
        self.step(participant, generation, SubscriptionState::Connected)?;
        let params = self
            .signaling
            .consume(participant)
            .await?
            .into_result()
            .map_err(SubscriptionError::Rejected)?;

        self.step(participant, generation, SubscriptionState::Consuming)?;
        let timeout = self.config.consume_timeout();
        let consumer = tokio::time::timeout(timeout, transport.consume(params))
            .await
            .map_err(|_| SubscriptionError::Timeout(timeout))??;

        let Some(track) = consumer.track() else {
            consumer.close();
            return Err(SubscriptionError::NoTrack(participant.clone()));
        };

        debug!(
            participant = %participant,
            consumer_id = %consumer.id(),
            producer_id = %consumer.producer_id(),
            kind = %consumer.kind(),
            "Consumer created"
        );

        if !self.table.register_subscription(
            participant,
            generation,
            Arc::clone(&transport),
            Arc::clone(&consumer),
        ) {
            consumer.close();
            return Err(SubscriptionError::Cancelled);
        }

        self.sink
            .attach_remote(participant, MediaStream::from_remote(participant, track));
        // An unsubscribe between registration and attach already detached
        if !self.table.is_current(participant, generation) {
            self.sink.detach_remote(participant);
        }
        Ok(())
    }

    /// Drop a participant's subscription and detach it from the sink.
    ///
    /// A subscription still being established is cancelled instead; it
    /// releases its transport once its current step returns and is never
    /// attached.
    pub async fn unsubscribe(&self, participant: &ParticipantId) -> bool {
        match self.table.detach(participant) {
            None => false,
            Some(Detached::Pending) => {
                info!(participant = %participant, "Cancelling in-flight subscription");
                true
            }
            Some(Detached::Active {
                transport,
                consumer,
            }) => {
                if let Some(consumer) = consumer {
                    consumer.close();
                }
                if let Some(transport) = transport {
                    transport.close().await;
                }
                self.sink.detach_remote(participant);
                info!(participant = %participant, "Unsubscribed from participant");
                true
            }
        }
    }

    /// Close every consumer and receive transport
    pub async fn close_all(&self) {
        for (participant, entry) in self.table.drain() {
            if let Some(consumer) = entry.consumer {
                consumer.close();
            }
            if let Some(transport) = entry.transport {
                transport.close().await;
            }
            if entry.state == SubscriptionState::Active {
                self.sink.detach_remote(&participant);
            }
        }
    }

    /// Drive the initial enumeration and live join events on one task.
    ///
    /// Join events are handled concurrently with the enumeration pass but on
    /// this same task, so table mutation stays single-writer. Returns when
    /// cancelled, or once the event stream has closed and all pending work is
    /// done.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<Value>, cancel: CancellationToken) {
        let enumeration = self.discover_existing();
        tokio::pin!(enumeration);
        let mut enumerating = true;
        let mut events_open = true;
        let mut joins = FuturesUnordered::new();

        loop {
            if !enumerating && !events_open && joins.is_empty() {
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Subscription loop cancelled");
                    break;
                }
                result = &mut enumeration, if enumerating => {
                    enumerating = false;
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to enumerate existing producers");
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(payload) => match serde_json::from_value::<NewProducerEvent>(payload) {
                        Ok(event) => joins.push(self.on_participant_joined(event.producer_socket_id)),
                        Err(e) => warn!(error = %e, "Malformed new-producer event"),
                    },
                    None => {
                        debug!("New-producer event stream closed");
                        events_open = false;
                    }
                },
                Some(_outcome) = joins.next(), if !joins.is_empty() => {}
            }
        }
    }
}
