//! # Transcription Module
//!
//! Everything that touches the speech engine: the incremental decoder interface
//! sessions talk to, the startup readiness gate that loads the model, and the
//! concrete engine backends.
//!
//! ## Key Components:
//! - **Decoder / DecoderFactory**: the narrow incremental-decode seam
//! - **Readiness gate**: verifies the model layout and loads it once at startup
//! - **Vosk backend**: Kaldi recognizer, compiled with the `vosk` feature

pub mod engine;      // Decoder traits and errors
pub mod readiness;   // Startup model verification and loading

#[cfg(feature = "vosk")]
pub mod vosk;        // Kaldi recognizer backend

#[cfg(test)]
pub mod testing;     // Scripted decoders for tests
