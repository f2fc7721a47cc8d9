//! In-process signaling server, media engine and render sink used by the
//! integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use roomcast_client::{
    CaptureConstraints, CaptureError, Config, ConnectHandler, Consumer, ConsumerId,
    ConsumerParams, Device, DeviceError, Direction, LocalMedia, MediaKind, MediaStream,
    MediaTrack, ParticipantId, Producer, ProducerId, RecvTransport, RenderSink, RtpCapabilities,
    RtpParameters, SendTransport, SendTransportHandler, Signaling, SignalingError,
    SubscriptionError, Transport, TransportOptions,
};

/// Ordered record of everything the fakes observed, shared between the
/// signaling server and the engine so cross-component ordering can be checked.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn positions(&self, entry: &str) -> Vec<usize> {
        self.0
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.as_str() == entry)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.positions(entry).len()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

// ---------------------------------------------------------------------------
// Signaling server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ServerScript {
    producers: Vec<String>,
    consume_responses: HashMap<String, Value>,
    hung_consumes: HashSet<String>,
    gated_consumes: HashMap<String, Arc<Notify>>,
    rejected_produce_kind: Option<MediaKind>,
    fail_capabilities: bool,
    fail_enumeration: bool,
}

/// Scripted session server
pub struct FakeServer {
    log: EventLog,
    script: Mutex<ServerScript>,
    requests: Mutex<Vec<(String, Value)>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Value>>>,
    queued_events: Mutex<VecDeque<Value>>,
    counter: AtomicUsize,
}

impl FakeServer {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            script: Mutex::new(ServerScript::default()),
            requests: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            queued_events: Mutex::new(VecDeque::new()),
            counter: AtomicUsize::new(0),
        })
    }

    pub fn with_producers(self: &Arc<Self>, producers: &[&str]) -> Arc<Self> {
        self.script.lock().producers = producers.iter().map(|p| (*p).to_string()).collect();
        Arc::clone(self)
    }

    pub fn reject_consume(&self, participant: &str, reason: &str) {
        self.script
            .lock()
            .consume_responses
            .insert(participant.to_string(), json!({ "error": reason }));
    }

    pub fn set_consume_response(&self, participant: &str, response: Value) {
        self.script
            .lock()
            .consume_responses
            .insert(participant.to_string(), response);
    }

    /// Never answer consume requests for this participant
    pub fn hang_consume(&self, participant: &str) {
        self.script.lock().hung_consumes.insert(participant.to_string());
    }

    /// Hold consume requests for this participant until `open_consume`
    pub fn gate_consume(&self, participant: &str) {
        self.script
            .lock()
            .gated_consumes
            .insert(participant.to_string(), Arc::new(Notify::new()));
    }

    /// Let the held consume request through and stop gating
    pub fn open_consume(&self, participant: &str) {
        if let Some(gate) = self.script.lock().gated_consumes.remove(participant) {
            gate.notify_one();
        }
    }

    /// Answer produce requests of this kind with a body lacking an id
    pub fn reject_produce(&self, kind: MediaKind) {
        self.script.lock().rejected_produce_kind = Some(kind);
    }

    pub fn fail_capabilities(&self) {
        self.script.lock().fail_capabilities = true;
    }

    /// Answer `get-producers` with something that is not a list
    pub fn fail_enumeration(&self) {
        self.script.lock().fail_enumeration = true;
    }

    /// Deliver a `new-producer` event to current subscribers, or hold it until
    /// the first subscription if nobody is listening yet
    pub fn announce(&self, participant: &str) {
        let event = json!({ "producerSocketId": participant });
        let subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            self.queued_events.lock().push_back(event);
        } else {
            for tx in subscribers.iter() {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub fn announce_raw(&self, event: Value) {
        for tx in self.subscribers.lock().iter() {
            let _ = tx.send(event.clone());
        }
    }

    /// End every event stream
    pub fn close_events(&self) {
        self.subscribers.lock().clear();
    }

    pub fn requests_named(&self, name: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl Signaling for FakeServer {
    async fn request(&self, name: &str, payload: Value) -> Result<Value, SignalingError> {
        self.requests.lock().push((name.to_string(), payload.clone()));

        match name {
            "get-rtp-capabilities" => {
                self.log.push("request:get-rtp-capabilities");
                if self.script.lock().fail_capabilities {
                    return Err(SignalingError::ChannelClosed);
                }
                Ok(json!({
                    "codecs": [
                        { "mimeType": "audio/opus", "clockRate": 48000 },
                        { "mimeType": "video/VP8", "clockRate": 90000 }
                    ]
                }))
            }
            "create-send-transport" | "create-recv-transport" => {
                self.log.push(format!("request:{name}"));
                let prefix = if name == "create-send-transport" { "send" } else { "recv" };
                Ok(json!({ "params": { "id": format!("{prefix}-{}", self.next()) } }))
            }
            "connect-transport" => {
                let direction = payload["direction"].as_str().unwrap_or_default().to_string();
                self.log.push(format!("request:connect-transport:{direction}"));
                Ok(Value::Null)
            }
            "produce" => {
                let kind = payload["kind"].as_str().unwrap_or_default().to_string();
                self.log.push(format!("request:produce:{kind}"));
                let rejected = self
                    .script
                    .lock()
                    .rejected_produce_kind
                    .is_some_and(|k| k.as_str() == kind);
                if rejected {
                    return Ok(json!({}));
                }
                Ok(json!({ "id": format!("producer-{}", self.next()) }))
            }
            "get-producers" => {
                self.log.push("request:get-producers");
                let (failing, producers) = {
                    let script = self.script.lock();
                    (script.fail_enumeration, script.producers.clone())
                };
                if failing {
                    return Ok(json!({ "error": "room busy" }));
                }
                Ok(json!(producers))
            }
            "consume" => {
                let participant = payload["producerSocketId"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.log.push(format!("request:consume:{participant}"));

                let hung = self.script.lock().hung_consumes.contains(&participant);
                if hung {
                    std::future::pending::<()>().await;
                }
                let gate = self.script.lock().gated_consumes.get(&participant).cloned();
                if let Some(gate) = gate {
                    gate.notified().await;
                }

                let scripted = self.script.lock().consume_responses.get(&participant).cloned();
                Ok(scripted.unwrap_or_else(|| {
                    json!({
                        "id": format!("consumer-{participant}"),
                        "producerId": participant,
                        "kind": "video",
                        "rtpParameters": { "codecs": [{ "mimeType": "video/VP8" }] }
                    })
                }))
            }
            other => {
                self.log.push(format!("request:{other}"));
                Ok(Value::Null)
            }
        }
    }

    fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        if event == "new-producer" {
            for queued in self.queued_events.lock().drain(..) {
                let _ = tx.send(queued);
            }
            self.subscribers.lock().push(tx);
        }
        rx
    }
}

// ---------------------------------------------------------------------------
// Media engine
// ---------------------------------------------------------------------------

pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    pub stopped: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeProducer {
    id: ProducerId,
    kind: MediaKind,
    pub closed: AtomicBool,
}

impl Producer for FakeProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    track: Option<Arc<dyn MediaTrack>>,
    pub closed: AtomicBool,
}

impl Consumer for FakeConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.track.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Derive the kind of a track from its codec mime type, the way a real engine
/// would, falling back to the declared kind
fn kind_from_rtp(rtp: &RtpParameters, declared: MediaKind) -> MediaKind {
    let mime = rtp.as_value()["codecs"][0]["mimeType"].as_str().unwrap_or_default();
    if mime.starts_with("audio/") {
        MediaKind::Audio
    } else if mime.starts_with("video/") {
        MediaKind::Video
    } else {
        declared
    }
}

fn local_rtp_parameters(kind: MediaKind) -> RtpParameters {
    let mime = match kind {
        MediaKind::Audio => "audio/opus",
        MediaKind::Video => "video/VP8",
    };
    RtpParameters::from(json!({
        "codecs": [{ "mimeType": mime, "payloadType": 100 }],
        "encodings": [{ "ssrc": 1111 }]
    }))
}

pub struct FakeSendTransport {
    id: String,
    log: EventLog,
    handler: Arc<dyn SendTransportHandler>,
    connected: AtomicBool,
    pub closed: AtomicBool,
    pub producers: Mutex<Vec<Arc<FakeProducer>>>,
}

#[async_trait]
impl Transport for FakeSendTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Send
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for producer in self.producers.lock().iter() {
            producer.close();
        }
    }
}

#[async_trait]
impl SendTransport for FakeSendTransport {
    async fn produce(&self, track: Arc<dyn MediaTrack>) -> Result<Arc<dyn Producer>, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.handler
                .on_connect(json!({ "role": "client" }).into())
                .await?;
        }
        self.log.push(format!("engine:produce:{}", track.kind()));
        let id = self
            .handler
            .on_produce(track.kind(), local_rtp_parameters(track.kind()))
            .await?;
        let producer = Arc::new(FakeProducer {
            id,
            kind: track.kind(),
            closed: AtomicBool::new(false),
        });
        self.producers.lock().push(Arc::clone(&producer));
        Ok(producer)
    }
}

pub struct FakeRecvTransport {
    id: String,
    log: EventLog,
    handler: Arc<dyn ConnectHandler>,
    connected: AtomicBool,
    trackless: bool,
    pub closed: AtomicBool,
    pub consumers: Mutex<Vec<Arc<FakeConsumer>>>,
}

#[async_trait]
impl Transport for FakeRecvTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> Direction {
        Direction::Recv
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for consumer in self.consumers.lock().iter() {
            consumer.close();
        }
    }
}

#[async_trait]
impl RecvTransport for FakeRecvTransport {
    async fn consume(&self, params: ConsumerParams) -> Result<Arc<dyn Consumer>, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.handler
                .on_connect(json!({ "role": "client" }).into())
                .await?;
        }
        self.log.push(format!("engine:consume:{}", params.producer_id));

        let kind = kind_from_rtp(&params.rtp_parameters, params.kind);
        let track: Option<Arc<dyn MediaTrack>> = if self.trackless {
            None
        } else {
            Some(FakeTrack::new(&format!("remote-{}", params.id), kind))
        };
        let consumer = Arc::new(FakeConsumer {
            id: params.id,
            producer_id: params.producer_id,
            kind,
            track,
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(Arc::clone(&consumer));
        Ok(consumer)
    }
}

/// Scripted media engine
pub struct FakeDevice {
    log: EventLog,
    loaded: AtomicBool,
    reject_capabilities: AtomicBool,
    trackless_consumers: AtomicBool,
    pub send_transports: Mutex<Vec<Arc<FakeSendTransport>>>,
    pub recv_transports: Mutex<Vec<Arc<FakeRecvTransport>>>,
}

impl FakeDevice {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            loaded: AtomicBool::new(false),
            reject_capabilities: AtomicBool::new(false),
            trackless_consumers: AtomicBool::new(false),
            send_transports: Mutex::new(Vec::new()),
            recv_transports: Mutex::new(Vec::new()),
        })
    }

    pub fn reject_capabilities(&self) {
        self.reject_capabilities.store(true, Ordering::SeqCst);
    }

    pub fn trackless_consumers(&self) {
        self.trackless_consumers.store(true, Ordering::SeqCst);
    }

    pub fn transport_count(&self) -> usize {
        self.send_transports.lock().len() + self.recv_transports.lock().len()
    }

    pub fn recv_transport(&self, index: usize) -> Arc<FakeRecvTransport> {
        Arc::clone(&self.recv_transports.lock()[index])
    }

    pub fn send_transport(&self) -> Arc<FakeSendTransport> {
        Arc::clone(&self.send_transports.lock()[0])
    }
}

#[async_trait]
impl Device for FakeDevice {
    async fn load(&self, capabilities: &RtpCapabilities) -> Result<(), DeviceError> {
        self.log.push("engine:load");
        if self.reject_capabilities.load(Ordering::SeqCst) {
            return Err(DeviceError::UnsupportedCapabilities(
                "no compatible codec".to_string(),
            ));
        }
        if capabilities.as_value()["codecs"].as_array().map_or(true, Vec::is_empty) {
            return Err(DeviceError::UnsupportedCapabilities("empty codec list".to_string()));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn SendTransportHandler>,
    ) -> Result<Arc<dyn SendTransport>, DeviceError> {
        if !self.is_loaded() {
            return Err(DeviceError::NotLoaded);
        }
        self.log.push("engine:create-send-transport");
        let transport = Arc::new(FakeSendTransport {
            id: options.id().unwrap_or("send").to_string(),
            log: self.log.clone(),
            handler,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
        });
        self.send_transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        handler: Arc<dyn ConnectHandler>,
    ) -> Result<Arc<dyn RecvTransport>, DeviceError> {
        if !self.is_loaded() {
            return Err(DeviceError::NotLoaded);
        }
        self.log.push("engine:create-recv-transport");
        let transport = Arc::new(FakeRecvTransport {
            id: options.id().unwrap_or("recv").to_string(),
            log: self.log.clone(),
            handler,
            connected: AtomicBool::new(false),
            trackless: self.trackless_consumers.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        });
        self.recv_transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Capture and rendering
// ---------------------------------------------------------------------------

pub struct FakeMedia {
    fail: bool,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            tracks: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            tracks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LocalMedia for FakeMedia {
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, CaptureError> {
        if self.fail {
            return Err(CaptureError::PermissionDenied);
        }
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if constraints.video {
            let track = FakeTrack::new("local-video", MediaKind::Video);
            self.tracks.lock().push(Arc::clone(&track));
            tracks.push(track);
        }
        if constraints.audio {
            let track = FakeTrack::new("local-audio", MediaKind::Audio);
            self.tracks.lock().push(Arc::clone(&track));
            tracks.push(track);
        }
        Ok(tracks)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub local: Mutex<Vec<MediaStream>>,
    pub local_detached: Mutex<Vec<MediaStream>>,
    pub remote: Mutex<Vec<(ParticipantId, MediaStream)>>,
    pub detached: Mutex<Vec<ParticipantId>>,
    pub errors: Mutex<Vec<(ParticipantId, String)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attached(&self) -> Vec<String> {
        self.remote
            .lock()
            .iter()
            .map(|(p, _)| p.as_str().to_string())
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.remote.lock().len()
    }

    pub fn kinds_for(&self, participant: &str) -> Vec<MediaKind> {
        self.remote
            .lock()
            .iter()
            .filter(|(p, _)| p.as_str() == participant)
            .flat_map(|(_, s)| s.kinds())
            .collect()
    }
}

impl RenderSink for RecordingSink {
    fn attach_local(&self, stream: &MediaStream) {
        self.local.lock().push(stream.clone());
    }

    fn detach_local(&self, stream: &MediaStream) {
        self.local_detached.lock().push(stream.clone());
    }

    fn attach_remote(&self, participant: &ParticipantId, stream: MediaStream) {
        self.remote.lock().push((participant.clone(), stream));
    }

    fn detach_remote(&self, participant: &ParticipantId) {
        self.detached.lock().push(participant.clone());
    }

    fn on_subscription_error(&self, participant: &ParticipantId, error: &SubscriptionError) {
        self.errors
            .lock()
            .push((participant.clone(), error.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.signaling.request_timeout_ms = 2_000;
    config.subscription.consume_timeout_ms = 2_000;
    config
}

/// Poll a condition until it holds, panicking after `limit`
pub async fn eventually<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct Harness {
    pub log: EventLog,
    pub server: Arc<FakeServer>,
    pub device: Arc<FakeDevice>,
    pub media: Arc<FakeMedia>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(producers: &[&str]) -> Self {
        let log = EventLog::default();
        Self {
            server: FakeServer::new(log.clone()).with_producers(producers),
            device: FakeDevice::new(log.clone()),
            media: FakeMedia::new(),
            sink: RecordingSink::new(),
            log,
        }
    }

    pub async fn start(&self, config: &Config) -> roomcast_client::Result<roomcast_client::Session> {
        roomcast_client::Session::start(
            config,
            self.server.clone(),
            self.device.clone(),
            self.media.clone(),
            self.sink.clone(),
        )
        .await
    }
}
