pub mod bus;
pub mod events;
pub mod memory;
pub mod storage;
pub mod worker;

pub use bus::{AuditBus, AuditReceiver};
pub use events::{AuditEvent, AuditLog, EventMeta};
pub use memory::{MemoryAuditLog, NullAuditLog};
pub use storage::{AuditError, AuditResult, AuditStorage, ChatTotals, SqliteAuditStorage};
pub use worker::AuditWorker;
