//! chat_state - State machine and session records for monetized chats
//!
//! This crate provides the lifecycle state machine of a chat session
//! (free, awaiting deposit, paid, expired, closed) together with the
//! `ChatSession` record it drives and the prepaid bucket backing paid chats.

pub mod bucket;
pub mod machine;
pub mod session;

// Re-export commonly used types
pub use bucket::PrepaidBucket;
pub use machine::{CloseReason, SessionEvent, SessionState, StateMachine, StateTransition, TransitionError};
pub use session::ChatSession;
