//! # Incremental Decoder Interface
//!
//! The narrow seam between session management and the speech engine. A decoder
//! is one live decoding context: it is fed PCM frames one at a time and can be
//! asked for its current hypothesis at any point.
//!
//! ## Contract:
//! - **accept_frame**: feed one frame, learn whether the engine detected an endpoint
//! - **final_result**: only right after an endpoint; returns the settled text and
//!   resets the context for the next utterance
//! - **partial_result**: while the utterance is still open; non-destructive
//!
//! A `DecoderFactory` owns the loaded model and hands out fresh decoders. Sessions
//! never share a decoder, and a decoder is never reused across start/stop cycles.

use thiserror::Error;

/// Errors raised by a decoding context.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecoderError {
    /// The frame could not be decoded as PCM (empty, odd length, oversized).
    /// The frame is dropped and the session carries on.
    #[error("invalid audio frame: {0}")]
    InvalidFrame(String),

    /// The engine itself failed. Decoder state may be inconsistent, so the
    /// decoder must be discarded rather than fed again.
    #[error("decoder engine fault: {0}")]
    Engine(String),
}

/// What the engine reports after consuming a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    /// True when the engine detected the end of the current utterance.
    pub utterance_complete: bool,
}

impl FrameOutcome {
    pub fn in_progress() -> Self {
        Self { utterance_complete: false }
    }

    pub fn complete() -> Self {
        Self { utterance_complete: true }
    }
}

/// One incremental decoding context bound to a fixed sample rate.
///
/// ## Thread Safety:
/// Implementations only need to be `Send`: a decoder is owned by exactly one
/// session and is mutated under that session's lock, never concurrently.
pub trait Decoder: Send {
    /// Feed one frame of 16-bit little-endian mono PCM.
    fn accept_frame(&mut self, frame: &[u8]) -> Result<FrameOutcome, DecoderError>;

    /// Best hypothesis for the in-progress utterance.
    fn partial_result(&mut self) -> Result<String, DecoderError>;

    /// Settled transcript for the utterance that just completed. Resets the
    /// context so the same decoder can continue with the next utterance.
    fn final_result(&mut self) -> Result<String, DecoderError>;
}

/// Creates fresh decoders from a model loaded once at startup.
pub trait DecoderFactory: Send + Sync {
    /// Build a new decoder with no accumulated state.
    fn create(&self) -> Result<Box<dyn Decoder>, DecoderError>;

    /// Short human-readable description used by health output.
    fn describe(&self) -> String;
}
