//! ParticipantContext - the per-user facts role resolution depends on.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
}

/// Popularity tier assigned by the external ranking system.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Popularity {
    Low,
    #[default]
    Normal,
    Royal,
}

/// Snapshot of one participant, taken when a chat is initiated.
///
/// Immutable for the duration of role resolution; a later profile change only
/// affects a session through an explicit role refresh.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ParticipantContext {
    pub user_id: UserId,
    pub gender: Gender,
    /// Whether the user opted in to earning from chats.
    #[serde(default)]
    pub earn_mode: bool,
    #[serde(default)]
    pub influencer: bool,
    /// Royal (premium) membership, distinct from the royal popularity tier.
    #[serde(default)]
    pub royal_member: bool,
    #[serde(default)]
    pub popularity: Popularity,
    /// Custom chat price requested by the user when they are the earner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_override: Option<u64>,
}

impl ParticipantContext {
    /// Create a context with every flag off and normal popularity.
    pub fn new(user_id: impl Into<UserId>, gender: Gender) -> Self {
        Self {
            user_id: user_id.into(),
            gender,
            earn_mode: false,
            influencer: false,
            royal_member: false,
            popularity: Popularity::Normal,
            price_override: None,
        }
    }

    pub fn with_earn_mode(mut self, on: bool) -> Self {
        self.earn_mode = on;
        self
    }

    pub fn with_influencer(mut self, on: bool) -> Self {
        self.influencer = on;
        self
    }

    pub fn with_royal_member(mut self, on: bool) -> Self {
        self.royal_member = on;
        self
    }

    pub fn with_popularity(mut self, popularity: Popularity) -> Self {
        self.popularity = popularity;
        self
    }

    pub fn with_price_override(mut self, price: u64) -> Self {
        self.price_override = Some(price);
        self
    }

    /// Earn mode is off and the popularity tier is low.
    pub fn qualifies_for_free_chat(&self) -> bool {
        !self.earn_mode && self.popularity == Popularity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let ctx: ParticipantContext =
            serde_json::from_str(r#"{"user_id":"u1","gender":"female"}"#).unwrap();
        assert_eq!(ctx.gender, Gender::Female);
        assert!(!ctx.earn_mode);
        assert_eq!(ctx.popularity, Popularity::Normal);
        assert_eq!(ctx.price_override, None);
    }

    #[test]
    fn free_chat_qualification() {
        let low = ParticipantContext::new("a", Gender::Male).with_popularity(Popularity::Low);
        assert!(low.qualifies_for_free_chat());
        assert!(!low.clone().with_earn_mode(true).qualifies_for_free_chat());
        assert!(!ParticipantContext::new("b", Gender::Male).qualifies_for_free_chat());
    }
}
