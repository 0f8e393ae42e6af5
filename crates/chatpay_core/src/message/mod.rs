//! Message module - Message content types
//!
//! Shared message types used across the engine.

mod content;

pub use content::{MediaKind, MessageContent};
