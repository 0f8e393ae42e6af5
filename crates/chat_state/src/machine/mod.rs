//! State machine module
//!
//! Contains the FSM implementation for the chat session lifecycle.

mod events;
mod states;
mod transitions;

pub use events::{CloseReason, SessionEvent};
pub use states::SessionState;
pub use transitions::{StateMachine, StateTransition, TransitionError};
