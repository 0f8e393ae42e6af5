use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::bus::AuditReceiver;
use crate::events::AuditEvent;
use crate::storage::AuditStorage;

/// Worker that consumes audit events from the bus and writes them to storage
pub struct AuditWorker {
    storage: Arc<dyn AuditStorage>,
}

impl AuditWorker {
    /// Create a new audit worker with the given storage backend
    pub fn new(storage: Arc<dyn AuditStorage>) -> Self {
        Self { storage }
    }

    /// Spawn the worker task
    ///
    /// The task runs until every `AuditBus` clone is dropped, then resolves
    /// to the number of events it persisted.
    pub fn spawn(&self, mut receiver: AuditReceiver) -> JoinHandle<u64> {
        let storage = Arc::clone(&self.storage);

        tokio::spawn(async move {
            info!("AuditWorker started");
            let mut persisted = 0u64;

            while let Some(event) = receiver.recv().await {
                match Self::handle_event(&storage, &event).await {
                    Ok(()) => persisted += 1,
                    Err(e) => warn!("Failed to persist audit event: {:#}", e),
                }
            }

            info!("AuditWorker stopped after {} events", persisted);
            persisted
        })
    }

    async fn handle_event(storage: &Arc<dyn AuditStorage>, event: &AuditEvent) -> anyhow::Result<()> {
        storage
            .append(event)
            .await
            .with_context(|| format!("{} for chat {}", event.kind(), event.chat_id()))?;

        match event {
            AuditEvent::DepositCaptured {
                chat_id, amount, ..
            } => info!("Audit: DepositCaptured - {} ({} units)", chat_id, amount),
            AuditEvent::RefundIssued {
                chat_id,
                amount,
                reason,
                ..
            } => info!("Audit: RefundIssued - {} ({} units, {})", chat_id, amount, reason),
            AuditEvent::AccountFlagged {
                chat_id, user_id, ..
            } => warn!("Audit: AccountFlagged - {} in {}", user_id, chat_id),
            other => debug!("Audit: {} - {}", other.kind(), other.chat_id()),
        }
        Ok(())
    }
}
