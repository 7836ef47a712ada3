//! Coordination primitives for podforward
//!
//! This crate provides the one-shot broadcast [`Signal`] used for session
//! lifecycle events and the cancellation [`Context`] that governs a session.

pub mod context;
pub mod signal;

pub use context::{CancelHandle, Context, ContextError};
pub use signal::Signal;
