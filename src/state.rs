//! # Application State Management
//!
//! State shared by every HTTP handler and WebSocket actor.
//!
//! ## Sharing Pattern:
//! - **config**: read-only after startup, so a plain `Arc` is enough
//! - **router**: owns the session registry and decoder factory; it does its
//!   own locking internally, so handlers only ever need `&EventRouter`
//! - **start_time**: never changes
//!
//! `AppState` is cloned into each actix worker; every clone points at the same
//! router and therefore the same sessions.

use crate::audio::registry::SessionRegistry;
use crate::config::AppConfig;
use crate::router::EventRouter;
use crate::transcription::engine::DecoderFactory;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub router: Arc<EventRouter>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the shared state around a decoder factory that already passed
    /// the readiness gate.
    pub fn new(config: AppConfig, factory: Arc<dyn DecoderFactory>) -> Self {
        let registry = SessionRegistry::new(config.performance.max_concurrent_sessions);

        Self {
            router: Arc::new(EventRouter::new(registry, factory)),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
