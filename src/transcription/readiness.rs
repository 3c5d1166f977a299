//! # Readiness Gate
//!
//! Startup-only check that the decoder model is present and loadable before the
//! HTTP listener is bound. There is no runtime state here: either every check
//! passes and the server starts, or startup aborts with an operator-facing error.
//!
//! ## Expected Model Layout:
//! ```text
//! <model.path>/
//! ├── am/final.mdl      acoustic model
//! ├── graph/            decoding graph
//! └── conf/mfcc.conf    feature extraction config
//! ```

use crate::audio::pcm::FrameFormat;
use crate::transcription::engine::DecoderFactory;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Reasons the model cannot be served.
#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("model directory {0} does not exist")]
    MissingModelDir(PathBuf),

    #[error("acoustic model {0} is missing")]
    MissingAcousticModel(PathBuf),

    #[error("decoding graph directory {0} is missing")]
    MissingGraph(PathBuf),

    #[error("feature extraction config {0} is missing")]
    MissingFeatureConfig(PathBuf),

    #[error("model failed to load: {0}")]
    LoadFailed(String),

    #[error("no decoder backend compiled in; rebuild with `--features vosk`")]
    NoBackend,
}

/// Paths of a verified model directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelLayout {
    pub root: PathBuf,
    pub acoustic_model: PathBuf,
    pub graph: PathBuf,
    pub feature_config: PathBuf,
}

impl ModelLayout {
    /// Resolve the expected sub-resource paths under `root` without touching disk.
    pub fn resolve(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            acoustic_model: root.join("am").join("final.mdl"),
            graph: root.join("graph"),
            feature_config: root.join("conf").join("mfcc.conf"),
            root,
        }
    }

    /// Verify every required sub-resource exists, in dependency order.
    pub fn verify(root: impl AsRef<Path>) -> Result<Self, ReadinessError> {
        let layout = Self::resolve(root);

        if !layout.root.is_dir() {
            return Err(ReadinessError::MissingModelDir(layout.root));
        }
        if !layout.acoustic_model.is_file() {
            return Err(ReadinessError::MissingAcousticModel(layout.acoustic_model));
        }
        if !layout.graph.is_dir() {
            return Err(ReadinessError::MissingGraph(layout.graph));
        }
        if !layout.feature_config.is_file() {
            return Err(ReadinessError::MissingFeatureConfig(layout.feature_config));
        }

        Ok(layout)
    }
}

/// Verify the model layout and load the decoder backend.
///
/// ## Returns:
/// - **Ok(factory)**: model loaded; sessions may create decoders from it
/// - **Err(ReadinessError)**: startup must abort
pub fn ensure_ready(
    model_path: &Path,
    format: FrameFormat,
) -> Result<Arc<dyn DecoderFactory>, ReadinessError> {
    info!("Verifying speech model at {}", model_path.display());

    let layout = ModelLayout::verify(model_path).map_err(|err| {
        error!("Speech model is invalid: {}", err);
        err
    })?;

    info!("Model structure verified, loading decoder backend");
    let factory = load_backend(layout, format)?;
    info!("Decoder backend ready: {}", factory.describe());

    Ok(factory)
}

#[cfg(feature = "vosk")]
fn load_backend(
    layout: ModelLayout,
    format: FrameFormat,
) -> Result<Arc<dyn DecoderFactory>, ReadinessError> {
    let factory = crate::transcription::vosk::VoskDecoderFactory::load(layout, format)
        .map_err(|err| ReadinessError::LoadFailed(err.to_string()))?;
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "vosk"))]
fn load_backend(
    _layout: ModelLayout,
    _format: FrameFormat,
) -> Result<Arc<dyn DecoderFactory>, ReadinessError> {
    Err(ReadinessError::NoBackend)
}
