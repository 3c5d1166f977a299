//! # Vosk / Kaldi Decoding Backend
//!
//! Binds the `Decoder` interface to a Kaldi recognizer via the `vosk` crate.
//! The model is loaded once by the readiness gate and shared; each session gets
//! its own `Recognizer`, which is dropped (freeing its decoding graph state)
//! whenever the session stops or disconnects.

use crate::audio::pcm::FrameFormat;
use crate::transcription::engine::{Decoder, DecoderError, DecoderFactory, FrameOutcome};
use crate::transcription::readiness::ModelLayout;
use std::sync::Arc;
use vosk::{CompleteResult, DecodingState, Model, Recognizer};

/// Loaded Kaldi model plus the frame format every recognizer is bound to.
pub struct VoskDecoderFactory {
    model: Arc<Model>,
    layout: ModelLayout,
    format: FrameFormat,
}

impl VoskDecoderFactory {
    /// Load the model from a verified layout.
    ///
    /// Loading is the expensive step (graph and acoustic model are read into
    /// memory), so this runs exactly once at startup.
    pub fn load(layout: ModelLayout, format: FrameFormat) -> Result<Self, DecoderError> {
        let path = layout.root.to_string_lossy().into_owned();
        let model = Model::new(path.clone())
            .ok_or_else(|| DecoderError::Engine(format!("failed to load model from {}", path)))?;

        // A model that loads but cannot build a recognizer at this sample rate
        // must fail here, before any connection is accepted.
        Recognizer::new(&model, format.sample_rate as f32).ok_or_else(|| {
            DecoderError::Engine(format!(
                "model at {} cannot create a recognizer at {} Hz",
                path, format.sample_rate
            ))
        })?;

        Ok(Self {
            model: Arc::new(model),
            layout,
            format,
        })
    }
}

impl DecoderFactory for VoskDecoderFactory {
    fn create(&self) -> Result<Box<dyn Decoder>, DecoderError> {
        let recognizer = Recognizer::new(&self.model, self.format.sample_rate as f32)
            .ok_or_else(|| DecoderError::Engine("failed to create recognizer".to_string()))?;

        Ok(Box::new(VoskDecoder {
            recognizer,
            format: self.format.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!(
            "vosk ({}, {} Hz)",
            self.layout.root.display(),
            self.format.sample_rate
        )
    }
}

/// One Kaldi recognizer owned by a single session.
pub struct VoskDecoder {
    recognizer: Recognizer,
    format: FrameFormat,
}

impl Decoder for VoskDecoder {
    fn accept_frame(&mut self, frame: &[u8]) -> Result<FrameOutcome, DecoderError> {
        let samples = self.format.samples(frame)?;

        match self.recognizer.accept_waveform(&samples) {
            Ok(DecodingState::Finalized) => Ok(FrameOutcome::complete()),
            Ok(DecodingState::Running) => Ok(FrameOutcome::in_progress()),
            Ok(DecodingState::Failed) => Err(DecoderError::Engine("decoding failed".to_string())),
            Err(err) => Err(DecoderError::Engine(err.to_string())),
        }
    }

    fn partial_result(&mut self) -> Result<String, DecoderError> {
        Ok(self.recognizer.partial_result().partial.trim().to_string())
    }

    fn final_result(&mut self) -> Result<String, DecoderError> {
        match self.recognizer.result() {
            CompleteResult::Single(single) => Ok(single.text.trim().to_string()),
            CompleteResult::Multiple(multiple) => Ok(multiple
                .alternatives
                .first()
                .map(|alt| alt.text.trim().to_string())
                .unwrap_or_default()),
        }
    }
}
