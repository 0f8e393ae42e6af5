use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, warn};
use tokio::sync::mpsc;

use crate::events::{AuditEvent, AuditLog};
use crate::storage::{AuditError, AuditResult};

/// Hand-off from the engine to the audit worker.
///
/// The queue is unbounded: recording never blocks a money path and no event
/// is dropped while the worker runs. A backlog past `backlog_warning` is
/// logged once per crossing. Events emitted after the worker stopped are
/// lost; `emit` reports them as `AuditError::WorkerGone`.
pub struct AuditBus {
    tx: mpsc::UnboundedSender<AuditEvent>,
    backlog: Arc<AtomicUsize>,
    lost: Arc<AtomicU64>,
    backlog_warning: usize,
}

/// Worker side of an [`AuditBus`].
pub struct AuditReceiver {
    rx: mpsc::UnboundedReceiver<AuditEvent>,
    backlog: Arc<AtomicUsize>,
}

impl AuditReceiver {
    /// Next event, or `None` once every bus handle is dropped and the queue
    /// is drained.
    pub async fn recv(&mut self) -> Option<AuditEvent> {
        let event = self.rx.recv().await?;
        self.backlog.fetch_sub(1, Ordering::Relaxed);
        Some(event)
    }
}

impl AuditBus {
    /// Returns the bus and the receiver to hand to `AuditWorker::spawn`.
    pub fn new(backlog_warning: usize) -> (Self, AuditReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                backlog: Arc::clone(&backlog),
                lost: Arc::new(AtomicU64::new(0)),
                backlog_warning: backlog_warning.max(1),
            },
            AuditReceiver { rx, backlog },
        )
    }

    pub fn emit(&self, event: AuditEvent) -> AuditResult<()> {
        let depth = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            let lost = self.lost.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                "Audit worker stopped: lost {} for chat {} ({} lost so far)",
                event.kind(),
                event.chat_id(),
                lost
            );
            return Err(AuditError::WorkerGone {
                kind: event.kind(),
                chat_id: event.chat_id().clone(),
            });
        }
        if depth == self.backlog_warning + 1 {
            warn!(
                "Audit backlog passed {} events, worker is falling behind",
                self.backlog_warning
            );
        }
        Ok(())
    }

    /// Events queued but not yet taken by the worker.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    pub fn lost_count(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Shared loss counter, readable after the bus itself is gone.
    pub fn lost_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.lost)
    }

    /// True once the worker's receiver is dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Clone for AuditBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            backlog: Arc::clone(&self.backlog),
            lost: Arc::clone(&self.lost),
            backlog_warning: self.backlog_warning,
        }
    }
}

impl AuditLog for AuditBus {
    fn record(&self, event: AuditEvent) {
        // Already logged and counted in `emit`.
        let _ = self.emit(event);
    }
}
