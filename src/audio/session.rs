//! # Speech Session State Machine
//!
//! One `Session` per open connection. A session owns at most one decoder, and
//! only while it is listening: the decoder lives inside the `Listening` variant
//! of the session state, so "decoder present iff listening" holds by
//! construction and dropping the state is what frees the decoder.
//!
//! ## Session Lifecycle:
//! 1. **Connected**: created on connect, no decoder
//! 2. **Listening**: `start` created a fresh decoder, frames are decoded
//! 3. **Stopped**: `stop` (or a decoder fault) dropped the decoder
//!
//! Destruction on disconnect is handled by the registry and is reachable from
//! every state.
//!
//! ## Transitions:
//! The table itself lives in [`transition`], a pure function of
//! `(phase, command)`. `Session::handle` looks the transition up and then
//! carries out its effect.

use crate::transcription::engine::{Decoder, DecoderError, DecoderFactory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one connection, unique while the connection is open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Mint a new random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally visible lifecycle phase, also the payload of `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Connected,
    Listening,
    Stopped,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Connected => "connected",
            SessionPhase::Listening => "listening",
            SessionPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol events that act on an existing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    Audio(&'a [u8]),
    Stop,
}

/// Side effect a transition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Drop any existing decoder and create a fresh one
    OpenDecoder,
    /// Feed the frame to the decoder and report the hypothesis
    Decode,
    /// Drop the decoder
    CloseDecoder,
    /// No decoder present; the frame is dropped without a reply
    DiscardFrame,
    /// Nothing to do beyond entering the next phase
    None,
}

/// The session transition table.
///
/// | From              | Command | To        | Effect       |
/// |-------------------|---------|-----------|--------------|
/// | any               | start   | Listening | OpenDecoder  |
/// | Listening         | audio   | Listening | Decode       |
/// | Connected/Stopped | audio   | unchanged | DiscardFrame |
/// | Listening         | stop    | Stopped   | CloseDecoder |
/// | Connected/Stopped | stop    | Stopped   | None         |
pub fn transition(phase: SessionPhase, command: &Command<'_>) -> (SessionPhase, Effect) {
    use SessionPhase::*;

    match (phase, command) {
        (_, Command::Start) => (Listening, Effect::OpenDecoder),
        (Listening, Command::Audio(_)) => (Listening, Effect::Decode),
        (Connected, Command::Audio(_)) => (Connected, Effect::DiscardFrame),
        (Stopped, Command::Audio(_)) => (Stopped, Effect::DiscardFrame),
        (Listening, Command::Stop) => (Stopped, Effect::CloseDecoder),
        (Connected | Stopped, Command::Stop) => (Stopped, Effect::None),
    }
}

/// Internal state; the decoder exists only inside `Listening`.
enum SessionState {
    Connected,
    Listening { decoder: Box<dyn Decoder> },
    Stopped,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Connected => SessionPhase::Connected,
            SessionState::Listening { .. } => SessionPhase::Listening,
            SessionState::Stopped => SessionPhase::Stopped,
        }
    }
}

/// A transcript update produced by one audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
    pub is_final: bool,
}

/// What the connection should be told after a command was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Report the session's new phase
    Status(SessionPhase),
    /// Report a transcript update
    Recognized(Recognition),
    /// Nothing to send
    Silent,
}

/// Per-session counters, logged when the session is torn down.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_discarded: u64,
    pub invalid_frames: u64,
    pub partial_results: u64,
    pub final_results: u64,
    pub recognitions_started: u64,
    pub decoder_faults: u64,
}

/// One connection's speech session.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    connected_at: DateTime<Utc>,
    listening_since: Option<DateTime<Utc>>,
    stats: SessionStats,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("connected_at", &self.connected_at)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Session {
    /// Create a session in the `Connected` phase with no decoder.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            connected_at: Utc::now(),
            listening_since: None,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn has_decoder(&self) -> bool {
        matches!(self.state, SessionState::Listening { .. })
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn listening_since(&self) -> Option<DateTime<Utc>> {
        self.listening_since
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Apply one protocol command.
    ///
    /// ## Returns:
    /// - **Ok(Reaction)**: what to send back (possibly nothing)
    /// - **Err(InvalidFrame)**: the frame was dropped, the session is unchanged
    /// - **Err(Engine)**: the decoder was discarded and the session is now `Stopped`
    pub fn handle(
        &mut self,
        command: Command<'_>,
        factory: &dyn DecoderFactory,
    ) -> Result<Reaction, DecoderError> {
        let (next, effect) = transition(self.phase(), &command);

        if let Command::Audio(_) = command {
            self.stats.frames_received += 1;
        }

        match effect {
            Effect::OpenDecoder => self.open_decoder(factory),
            Effect::Decode => match command {
                Command::Audio(frame) => self.decode(frame),
                _ => Ok(Reaction::Silent),
            },
            Effect::CloseDecoder | Effect::None => {
                self.release_decoder();
                self.state = SessionState::Stopped;
                Ok(Reaction::Status(next))
            }
            Effect::DiscardFrame => {
                self.stats.frames_discarded += 1;
                Ok(Reaction::Silent)
            }
        }
    }

    /// Drop the decoder if one is held. Returns whether one was released.
    ///
    /// Used by `stop` and by the registry on teardown; the decoder is freed
    /// before this returns.
    pub fn release_decoder(&mut self) -> bool {
        if !self.has_decoder() {
            return false;
        }
        self.state = SessionState::Stopped;
        self.listening_since = None;
        true
    }

    fn open_decoder(&mut self, factory: &dyn DecoderFactory) -> Result<Reaction, DecoderError> {
        // The stale decoder goes first so its partial hypothesis can never leak.
        self.release_decoder();

        match factory.create() {
            Ok(decoder) => {
                self.state = SessionState::Listening { decoder };
                self.listening_since = Some(Utc::now());
                self.stats.recognitions_started += 1;
                Ok(Reaction::Status(SessionPhase::Listening))
            }
            Err(err) => {
                self.state = SessionState::Stopped;
                self.stats.decoder_faults += 1;
                Err(err)
            }
        }
    }

    fn decode(&mut self, frame: &[u8]) -> Result<Reaction, DecoderError> {
        let decoded = match &mut self.state {
            SessionState::Listening { decoder } => run_decoder(decoder.as_mut(), frame),
            _ => return Ok(Reaction::Silent),
        };

        match decoded {
            Ok((text, is_final)) => {
                self.stats.frames_decoded += 1;
                if text.is_empty() {
                    return Ok(Reaction::Silent);
                }
                if is_final {
                    self.stats.final_results += 1;
                } else {
                    self.stats.partial_results += 1;
                }
                Ok(Reaction::Recognized(Recognition { text, is_final }))
            }
            Err(DecoderError::InvalidFrame(reason)) => {
                self.stats.invalid_frames += 1;
                Err(DecoderError::InvalidFrame(reason))
            }
            Err(err) => {
                // Decoder state may be corrupt; never feed it again.
                self.release_decoder();
                self.stats.decoder_faults += 1;
                Err(err)
            }
        }
    }
}

/// Feed one frame and fetch the matching hypothesis.
fn run_decoder(decoder: &mut dyn Decoder, frame: &[u8]) -> Result<(String, bool), DecoderError> {
    let outcome = decoder.accept_frame(frame)?;
    if outcome.utterance_complete {
        Ok((decoder.final_result()?, true))
    } else {
        Ok((decoder.partial_result()?, false))
    }
}
