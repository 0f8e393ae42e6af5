//! Session storage contract and the in-memory backend.

use std::sync::{Arc, Mutex};

use chat_state::ChatSession;
use chatpay_core::ChatId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{EngineError, Result};

/// Callback run against a working copy of a session.
pub type SessionUpdate<'a> = dyn FnMut(&mut ChatSession) -> Result<()> + 'a;

/// Session storage trait
///
/// `update` is the atomic read-modify-write primitive: the closure runs on a
/// copy of the session while the session is locked, and the copy replaces
/// the stored session only if the closure returns `Ok`. Updates of different
/// chats never block each other.
pub trait SessionStore: Send + Sync {
    /// Store a new session; fails with `SessionExists` if the id is taken.
    fn insert(&self, session: ChatSession) -> Result<()>;

    /// Snapshot of a session.
    fn get(&self, chat_id: &ChatId) -> Result<Option<ChatSession>>;

    fn update(&self, chat_id: &ChatId, f: &mut SessionUpdate<'_>) -> Result<()>;

    /// Ids of sessions in a non-terminal state.
    fn list_active_ids(&self) -> Result<Vec<ChatId>>;
}

impl dyn SessionStore + '_ {
    /// Run `f` under the session lock and return its value.
    pub fn with_session_lock<T, F>(&self, chat_id: &ChatId, f: F) -> Result<T>
    where
        F: FnOnce(&mut ChatSession) -> Result<T>,
    {
        let mut f = Some(f);
        let mut output = None;
        self.update(chat_id, &mut |session: &mut ChatSession| {
            let f = f
                .take()
                .ok_or_else(|| EngineError::Storage("session update ran twice".to_string()))?;
            output = Some(f(session)?);
            Ok(())
        })?;
        output.ok_or_else(|| EngineError::Storage("session update did not run".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<ChatId, Arc<Mutex<ChatSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn slot(&self, chat_id: &ChatId) -> Result<Arc<Mutex<ChatSession>>> {
        // Clone the Arc out so the map shard is not held while the session is locked.
        self.sessions
            .get(chat_id)
            .map(|slot| Arc::clone(&slot))
            .ok_or_else(|| EngineError::SessionNotFound(chat_id.clone()))
    }
}

fn poisoned(chat_id: &ChatId) -> EngineError {
    EngineError::Storage(format!("session lock poisoned: {chat_id}"))
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: ChatSession) -> Result<()> {
        match self.sessions.entry(session.chat_id.clone()) {
            Entry::Occupied(entry) => Err(EngineError::SessionExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(session)));
                Ok(())
            }
        }
    }

    fn get(&self, chat_id: &ChatId) -> Result<Option<ChatSession>> {
        let Some(slot) = self.sessions.get(chat_id).map(|slot| Arc::clone(&slot)) else {
            return Ok(None);
        };
        let session = slot.lock().map_err(|_| poisoned(chat_id))?;
        Ok(Some(session.clone()))
    }

    fn update(&self, chat_id: &ChatId, f: &mut SessionUpdate<'_>) -> Result<()> {
        let slot = self.slot(chat_id)?;
        let mut stored = slot.lock().map_err(|_| poisoned(chat_id))?;
        let mut working = stored.clone();
        f(&mut working)?;
        *stored = working;
        Ok(())
    }

    fn list_active_ids(&self) -> Result<Vec<ChatId>> {
        let slots: Vec<(ChatId, Arc<Mutex<ChatSession>>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut ids = Vec::new();
        for (chat_id, slot) in slots {
            let session = slot.lock().map_err(|_| poisoned(&chat_id))?;
            if session.state().is_active() {
                ids.push(chat_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
