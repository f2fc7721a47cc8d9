//! Acknowledged request multiplexer over a framed channel
//!
//! Requests carry a numeric id and the server answers with a `Response` frame
//! bearing the same id; pushed events arrive as `Event` frames. Frames travel
//! over a pair of tokio mpsc channels, so any framed transport (a websocket
//! pump, an in-process test server) can be attached by forwarding
//! [`Frame::to_json`] / [`Frame::from_json`] text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Signaling;
use crate::error::SignalingError;

/// One unit on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request { id: u64, name: String, data: Value },
    Response { id: u64, data: Value },
    Event { name: String, data: Value },
}

impl Frame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<Value>>>;

struct Shared {
    pending: DashMap<u64, oneshot::Sender<Value>>,
    subscribers: Mutex<Subscribers>,
    closed: AtomicBool,
}

impl Shared {
    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Response { id, data } => match self.pending.remove(&id) {
                Some((_, tx)) => {
                    // The requester may have timed out and dropped its receiver
                    let _ = tx.send(data);
                }
                None => debug!(id, "Response for unknown request"),
            },
            Frame::Event { name, data } => {
                let mut subscribers = self.subscribers.lock();
                if let Some(senders) = subscribers.get_mut(&name) {
                    senders.retain(|tx| tx.send(data.clone()).is_ok());
                } else {
                    debug!(event = %name, "Event without subscribers");
                }
            }
            Frame::Request { id, name, .. } => {
                warn!(id, request = %name, "Ignoring server-initiated request");
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every in-flight request
        self.pending.clear();
        self.subscribers.lock().clear();
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<Value>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// [`Signaling`] implementation over frame channels
pub struct ChannelSignaling {
    outgoing: mpsc::Sender<Frame>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl ChannelSignaling {
    /// Attach to a framed channel and start the inbound reader task
    pub fn new(outgoing: mpsc::Sender<Frame>, mut incoming: mpsc::Receiver<Frame>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            subscribers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let reader_shared = Arc::clone(&shared);
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_cancel.cancelled() => {
                        debug!("Signaling reader cancelled");
                        break;
                    }
                    frame = incoming.recv() => match frame {
                        Some(frame) => reader_shared.dispatch(frame),
                        None => {
                            info!("Signaling channel closed by peer");
                            break;
                        }
                    }
                }
            }
            reader_shared.close();
        });

        Arc::new(Self {
            outgoing,
            next_id: AtomicU64::new(1),
            shared,
            cancel,
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for an acknowledgement
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Stop the reader task and fail everything in flight
    pub fn close(&self) {
        self.cancel.cancel();
        self.shared.close();
    }
}

#[async_trait]
impl Signaling for ChannelSignaling {
    async fn request(&self, name: &str, payload: Value) -> Result<Value, SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);
        // Removes the entry however this future ends, including being dropped
        // by a caller-side timeout
        let _pending = PendingGuard {
            pending: &self.shared.pending,
            id,
        };

        let frame = Frame::Request {
            id,
            name: name.to_string(),
            data: payload,
        };
        if self.outgoing.send(frame).await.is_err() {
            return Err(SignalingError::ChannelClosed);
        }

        // Closing may have raced the insert above
        if self.is_closed() {
            return Err(SignalingError::ChannelClosed);
        }

        rx.await.map_err(|_| SignalingError::ChannelClosed)
    }

    fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.shared
                .subscribers
                .lock()
                .entry(event.to_string())
                .or_default()
                .push(tx);
        }
        rx
    }
}

impl Drop for ChannelSignaling {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
