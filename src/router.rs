//! # Event Router
//!
//! Dispatches inbound protocol events to the right session and turns the
//! session's reaction into at most one outbound event for the same connection.
//!
//! ## Dispatch Steps:
//! 1. **Connect / Disconnect** go straight to the registry
//! 2. **Other events** look the session up; unknown ids are dropped silently
//!    (the connection raced with its own teardown)
//! 3. **Transition**: the session applies the event to its state machine
//! 4. **Emit**: status changes and non-empty transcripts become outbound events
//!
//! The router itself holds no per-connection state and does no ordering of its
//! own. Callers must dispatch one connection's events one at a time, in arrival
//! order; the WebSocket actor does this by suspending its mailbox while a
//! dispatch is in flight.

use crate::audio::lock;
use crate::audio::registry::{RegistryError, SessionRegistry};
use crate::audio::session::{transition, Command, ConnectionId, Effect, Reaction, SessionPhase};
use crate::transcription::engine::{DecoderError, DecoderFactory};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Protocol events received from one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Connect,
    StartRecognition,
    AudioData(Vec<u8>),
    StopRecognition,
    Disconnect,
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Connect => "connect",
            InboundEvent::StartRecognition => "start_recognition",
            InboundEvent::AudioData(_) => "audio_data",
            InboundEvent::StopRecognition => "stop_recognition",
            InboundEvent::Disconnect => "disconnect",
        }
    }
}

/// Events sent back to the originating connection.
///
/// ## Wire Format:
/// ```json
/// {"event": "status", "data": {"status": "listening"}}
/// {"event": "recognized", "data": {"text": "testing one", "final": false}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    Status {
        status: SessionPhase,
    },
    Recognized {
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// Transport-level problems only (unparseable message, capacity); never
    /// used for per-frame decoding issues.
    Error {
        code: String,
        message: String,
    },
}

impl OutboundEvent {
    pub fn status(status: SessionPhase) -> Self {
        OutboundEvent::Status { status }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Router-wide counters, shared by all connections.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    frames_received: AtomicU64,
    frames_discarded: AtomicU64,
    invalid_frames: AtomicU64,
    partial_results: AtomicU64,
    final_results: AtomicU64,
    decoder_faults: AtomicU64,
}

/// Point-in-time copy of `RouterMetrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterMetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub frames_received: u64,
    pub frames_discarded: u64,
    pub invalid_frames: u64,
    pub partial_results: u64,
    pub final_results: u64,
    pub decoder_faults: u64,
}

impl RouterMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            invalid_frames: self.invalid_frames.load(Ordering::Relaxed),
            partial_results: self.partial_results.load(Ordering::Relaxed),
            final_results: self.final_results.load(Ordering::Relaxed),
            decoder_faults: self.decoder_faults.load(Ordering::Relaxed),
        }
    }
}

pub struct EventRouter {
    registry: SessionRegistry,
    factory: Arc<dyn DecoderFactory>,
    metrics: RouterMetrics,
}

impl EventRouter {
    pub fn new(registry: SessionRegistry, factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            registry,
            factory,
            metrics: RouterMetrics::default(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> RouterMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn decoder_description(&self) -> String {
        self.factory.describe()
    }

    /// Handle one inbound event for connection `id`.
    ///
    /// ## Returns:
    /// - **Ok(Some(event))**: send `event` back to the connection
    /// - **Ok(None)**: nothing to send
    /// - **Err(RegistryError)**: the connection could not be registered; the
    ///   transport decides whether to close it
    pub fn dispatch(
        &self,
        id: &ConnectionId,
        event: InboundEvent,
    ) -> Result<Option<OutboundEvent>, RegistryError> {
        match event {
            InboundEvent::Connect => self.connect(id).map(Some),
            InboundEvent::Disconnect => {
                self.disconnect(id);
                Ok(None)
            }
            InboundEvent::StartRecognition => Ok(self.apply(id, Command::Start)),
            InboundEvent::AudioData(frame) => {
                RouterMetrics::bump(&self.metrics.frames_received);
                Ok(self.apply(id, Command::Audio(&frame)))
            }
            InboundEvent::StopRecognition => Ok(self.apply(id, Command::Stop)),
        }
    }

    fn connect(&self, id: &ConnectionId) -> Result<OutboundEvent, RegistryError> {
        match self.registry.on_connect(id.clone()) {
            Ok(_) => {
                RouterMetrics::bump(&self.metrics.connections_accepted);
                info!(connection = %id, active = self.registry.len(), "Client connected");
                Ok(OutboundEvent::status(SessionPhase::Connected))
            }
            Err(err) => {
                RouterMetrics::bump(&self.metrics.connections_rejected);
                warn!(connection = %id, "Connection rejected: {}", err);
                Err(err)
            }
        }
    }

    fn disconnect(&self, id: &ConnectionId) {
        if let Some(summary) = self.registry.on_disconnect(id) {
            info!(
                connection = %id,
                last_phase = %summary.last_phase,
                decoder_released = summary.decoder_released,
                connected_seconds = summary.connected_seconds,
                frames = summary.stats.frames_received,
                finals = summary.stats.final_results,
                "Client disconnected"
            );
        }
    }

    fn apply(&self, id: &ConnectionId, command: Command<'_>) -> Option<OutboundEvent> {
        let Some(session) = self.registry.get(id) else {
            debug!(connection = %id, "Dropping event for unknown session");
            return None;
        };
        let mut session = lock(&session);

        let (_, effect) = transition(session.phase(), &command);
        if effect == Effect::DiscardFrame {
            RouterMetrics::bump(&self.metrics.frames_discarded);
            debug!(connection = %id, phase = %session.phase(), "Audio discarded, no decoder");
        }

        match session.handle(command, self.factory.as_ref()) {
            Ok(Reaction::Status(phase)) => {
                info!(connection = %id, "Session {}", phase);
                Some(OutboundEvent::status(phase))
            }
            Ok(Reaction::Recognized(recognition)) => {
                if recognition.is_final {
                    RouterMetrics::bump(&self.metrics.final_results);
                    info!(connection = %id, text = %recognition.text, "Final result");
                } else {
                    RouterMetrics::bump(&self.metrics.partial_results);
                    debug!(connection = %id, text = %recognition.text, "Partial result");
                }
                Some(OutboundEvent::Recognized {
                    text: recognition.text,
                    is_final: recognition.is_final,
                })
            }
            Ok(Reaction::Silent) => None,
            Err(DecoderError::InvalidFrame(reason)) => {
                RouterMetrics::bump(&self.metrics.invalid_frames);
                warn!(connection = %id, "Dropping invalid audio frame: {}", reason);
                None
            }
            Err(err @ DecoderError::Engine(_)) => {
                RouterMetrics::bump(&self.metrics.decoder_faults);
                warn!(connection = %id, "Decoder discarded, recognition stopped: {}", err);
                Some(OutboundEvent::status(SessionPhase::Stopped))
            }
        }
    }
}
