//! # Configuration Management
//!
//! Loads the server configuration from layered sources:
//! - Environment variables (with APP_ prefix)
//! - Configuration file (config.toml, optional)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platform conventions)
//! 2. Environment variables (APP_SERVER__PORT, APP_MODEL__PATH, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore so field names that contain an
//! underscore survive: `APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS=8` maps to
//! `performance.max_concurrent_sessions`.

use crate::audio::pcm::{FrameFormat, BYTES_PER_SAMPLE};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Listener and connection liveness settings.
///
/// ## Fields:
/// - `host`: IP address to bind to ("0.0.0.0" in containers)
/// - `port`: TCP port to listen on
/// - `heartbeat_interval_secs`: how often each WebSocket is pinged
/// - `client_timeout_secs`: silence after which a connection is closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Location of the speech model, loaded once at startup.
///
/// The directory must contain `am/final.mdl`, `graph/` and `conf/mfcc.conf`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
}

/// Inbound audio format.
///
/// ## Fields:
/// - `sample_rate`: rate every decoder is created with; clients must send
///   audio at this rate, nothing is resampled
/// - `max_frame_bytes`: largest accepted binary frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            model: ModelConfig {
                path: PathBuf::from("/app/models/en"),
            },
            audio: AudioConfig {
                sample_rate: 16000,
                max_frame_bytes: 1024 * 1024,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_MODEL__PATH=/models/en-us`: Override the model directory
    /// - `APP_AUDIO__SAMPLE_RATE=8000`: Override the decoder sample rate
    /// - `HOST=0.0.0.0` / `PORT=3000`: Deployment platform overrides
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.server.client_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be greater than the heartbeat interval ({}s)",
                self.server.client_timeout_secs,
                self.server.heartbeat_interval_secs
            ));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.max_frame_bytes == 0 || self.audio.max_frame_bytes % BYTES_PER_SAMPLE != 0 {
            return Err(anyhow::anyhow!(
                "Max frame size must be a positive multiple of {} bytes",
                BYTES_PER_SAMPLE
            ));
        }

        Ok(())
    }

    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat {
            sample_rate: self.audio.sample_rate,
            max_frame_bytes: self.audio.max_frame_bytes,
        }
    }

    /// Largest WebSocket frame the codec accepts.
    ///
    /// Twice the audio frame limit, so an oversized audio frame still reaches
    /// frame validation and is dropped there while the connection stays open.
    /// Only frames past this bound fail at the protocol layer.
    pub fn ws_frame_limit(&self) -> usize {
        self.audio.max_frame_bytes.saturating_mul(2)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.server.client_timeout_secs)
    }
}
