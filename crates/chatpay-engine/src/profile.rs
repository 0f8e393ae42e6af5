//! User profile lookup.

use chatpay_core::{ParticipantContext, UserId};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("no profile for {0}")]
    NotFound(UserId),

    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

pub trait ProfileStore: Send + Sync {
    fn participant_context(&self, user: &UserId) -> Result<ParticipantContext, ProfileError>;
}

#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: DashMap<UserId, ParticipantContext>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn upsert(&self, profile: ParticipantContext) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn participant_context(&self, user: &UserId) -> Result<ParticipantContext, ProfileError> {
        self.profiles
            .get(user)
            .map(|profile| profile.clone())
            .ok_or_else(|| ProfileError::NotFound(user.clone()))
    }
}
