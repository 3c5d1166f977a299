//! Deterministic decoders for session and router tests.
//!
//! `WordDecoder` treats each frame as a UTF-8 word instead of audio, so a test
//! can script exactly which hypothesis the engine reports:
//! - `"testing"` extends the partial hypothesis
//! - `"two."` extends it and marks the endpoint
//! - `"!fault"` makes the engine fail
//! - a frame of zero bytes (silence) changes nothing

use crate::audio::pcm::FrameFormat;
use crate::transcription::engine::{Decoder, DecoderError, DecoderFactory, FrameOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Encode a word as a valid 16-bit PCM-sized frame (NUL padded to even length).
pub fn word_frame(word: &str) -> Vec<u8> {
    let mut frame = word.as_bytes().to_vec();
    if frame.len() % 2 != 0 {
        frame.push(0);
    }
    frame
}

/// A frame of digital silence.
pub fn silence_frame(samples: usize) -> Vec<u8> {
    vec![0u8; samples * 2]
}

pub struct WordDecoder {
    words: Vec<String>,
    format: FrameFormat,
    live: Arc<AtomicUsize>,
}

impl Decoder for WordDecoder {
    fn accept_frame(&mut self, frame: &[u8]) -> Result<FrameOutcome, DecoderError> {
        self.format.validate(frame)?;

        let text = String::from_utf8_lossy(frame);
        let word = text.trim_end_matches('\0').trim();

        if word == "!fault" {
            return Err(DecoderError::Engine("scripted fault".to_string()));
        }
        if word.is_empty() {
            return Ok(FrameOutcome::in_progress());
        }

        match word.strip_suffix('.') {
            Some(last) => {
                self.words.push(last.to_string());
                Ok(FrameOutcome::complete())
            }
            None => {
                self.words.push(word.to_string());
                Ok(FrameOutcome::in_progress())
            }
        }
    }

    fn partial_result(&mut self) -> Result<String, DecoderError> {
        Ok(self.words.join(" "))
    }

    fn final_result(&mut self) -> Result<String, DecoderError> {
        Ok(std::mem::take(&mut self.words).join(" "))
    }
}

impl Drop for WordDecoder {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory that tracks how many of its decoders are currently alive.
#[derive(Clone, Default)]
pub struct CountingFactory {
    live: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    fail_create: bool,
    format: FrameFormat,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose `create` always fails, as if the model were unusable.
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// A factory whose decoders enforce `format`, like a real backend bound
    /// to the configured frame limits.
    pub fn with_format(format: FrameFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Decoders created and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Decoders created over the factory's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for CountingFactory {
    fn create(&self) -> Result<Box<dyn Decoder>, DecoderError> {
        if self.fail_create {
            return Err(DecoderError::Engine("model unavailable".to_string()));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(WordDecoder {
            words: Vec::new(),
            format: self.format.clone(),
            live: self.live.clone(),
        }))
    }

    fn describe(&self) -> String {
        "word decoder (test)".to_string()
    }
}
