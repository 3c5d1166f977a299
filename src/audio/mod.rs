//! # Audio Session Module
//!
//! Per-connection speech sessions and the registry that owns them.
//!
//! ## Key Components:
//! - **PCM validation**: frames must be whole 16-bit little-endian samples
//! - **Session**: typed state machine owning at most one decoder
//! - **Session Registry**: one session per connection id
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (configurable, fixed per deployment)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod pcm;          // Frame validation and sample decoding
pub mod registry;     // Connection id -> session map
pub mod session;      // Session state machine

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Session and registry data stay structurally valid across a panic (every
/// mutation is a single assignment), so the poisoned guard is safe to reuse.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
