use std::sync::Mutex;

use chatpay_core::ChatId;

use crate::events::{AuditEvent, AuditLog};

/// Audit sink that keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    pub fn events_for_chat(&self, chat_id: &ChatId) -> Vec<AuditEvent> {
        self.lock()
            .iter()
            .filter(|event| event.chat_id() == chat_id)
            .cloned()
            .collect()
    }

    /// Number of recorded events with the given `kind` tag.
    pub fn count_kind(&self, kind: &str) -> usize {
        self.lock().iter().filter(|event| event.kind() == kind).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEvent>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, event: AuditEvent) {
        self.lock().push(event);
    }
}

/// Audit sink used when auditing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditLog;

impl AuditLog for NullAuditLog {
    fn record(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMeta;
    use chatpay_core::UserId;

    #[test]
    fn filters_by_chat_and_kind() {
        let log = MemoryAuditLog::new();
        for chat in ["a", "b", "a"] {
            log.record(AuditEvent::MessageBilled {
                meta: EventMeta::new(),
                chat_id: ChatId::from(chat),
                earner_id: UserId::from("earner"),
                tokens: 1,
                words: 3,
            });
        }
        assert_eq!(log.events().len(), 3);
        assert_eq!(log.events_for_chat(&ChatId::from("a")).len(), 2);
        assert_eq!(log.count_kind("message_billed"), 3);
        assert_eq!(log.count_kind("refund_issued"), 0);
    }
}
