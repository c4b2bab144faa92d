//! Foundational low-level utilities shared across kpub crates.
//!
//! Atomic file writes for credential and configuration persistence, and the
//! cancellation token that drives shutdown of the monitor and supervisor.

pub mod atomic_io;
pub mod cancellation;

pub use atomic_io::{write_json_atomic, write_text_atomic};
pub use cancellation::CancellationToken;
