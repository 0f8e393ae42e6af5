//! chatpay_core - Core types for the chat monetization engine
//!
//! This crate provides the storage-free building blocks used by the other
//! chatpay crates:
//! - `ids` - UserId, ChatId newtypes
//! - `participant` - ParticipantContext and its tagged attributes
//! - `roles` - ChatRoles and the ordered role resolver
//! - `message` - message content (text or media)
//! - `word_count` - billable word counting
//! - `config` - engine configuration loading

pub mod config;
pub mod ids;
pub mod message;
pub mod participant;
pub mod roles;
pub mod word_count;

// Re-export commonly used types
pub use config::{AbuseConfig, AuditConfig, ConfigError, EngineConfig, ExpiryConfig};
pub use ids::{ChatId, UserId};
pub use message::{MediaKind, MessageContent};
pub use participant::{Gender, ParticipantContext, Popularity};
pub use roles::{
    resolve_roles, resolve_roles_with, ChatMode, ChatRoles, FreeMessageLimit, PricingPolicy,
    RoleRule,
};
pub use word_count::count_billable_words;
