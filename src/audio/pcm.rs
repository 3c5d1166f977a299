//! # PCM Frame Validation
//!
//! Audio frames arrive as raw WebSocket binary payloads and are expected to be
//! 16-bit signed little-endian mono PCM at the configured sample rate. No format
//! conversion happens here; a frame that cannot be read as 16-bit samples is
//! rejected and the caller drops it.

use crate::transcription::engine::DecoderError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Bytes per sample for 16-bit PCM.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Format limits applied to every inbound frame.
#[derive(Debug, Clone)]
pub struct FrameFormat {
    /// Sample rate the decoder is bound to (16kHz in the reference deployment)
    pub sample_rate: u32,

    /// Upper bound on a single frame's payload size
    pub max_frame_bytes: usize,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl FrameFormat {
    /// Check that a frame can be read as whole 16-bit samples.
    ///
    /// ## Checks:
    /// 1. **Not empty**: zero-length frames carry no audio
    /// 2. **Even length**: every sample is two bytes
    /// 3. **Bounded size**: guards against a client streaming one giant frame
    pub fn validate(&self, frame: &[u8]) -> Result<(), DecoderError> {
        if frame.is_empty() {
            return Err(DecoderError::InvalidFrame("frame is empty".to_string()));
        }

        if frame.len() % BYTES_PER_SAMPLE != 0 {
            return Err(DecoderError::InvalidFrame(format!(
                "frame length {} is not a whole number of 16-bit samples",
                frame.len()
            )));
        }

        if frame.len() > self.max_frame_bytes {
            return Err(DecoderError::InvalidFrame(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                frame.len(),
                self.max_frame_bytes
            )));
        }

        Ok(())
    }

    /// Validate and decode a frame into signed samples.
    pub fn samples(&self, frame: &[u8]) -> Result<Vec<i16>, DecoderError> {
        self.validate(frame)?;

        let mut cursor = Cursor::new(frame);
        let mut samples = Vec::with_capacity(frame.len() / BYTES_PER_SAMPLE);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        Ok(samples)
    }
}
