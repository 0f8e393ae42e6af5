//! Role module
//!
//! Decides who pays, who earns, and at which rate for a pair of participants.

mod resolver;
mod types;

pub use resolver::{resolve_roles, resolve_roles_with};
pub use types::{
    ChatMode, ChatRoles, FreeMessageLimit, PricingPolicy, RoleRule, EARNER_SPLIT_PERCENT,
    PLATFORM_SPLIT_PERCENT, ROYAL_FREE_MESSAGES, ROYAL_WORDS_PER_TOKEN, STANDARD_FREE_MESSAGES,
    STANDARD_WORDS_PER_TOKEN,
};
