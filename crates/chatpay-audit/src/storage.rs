use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatpay_core::ChatId;
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;

use crate::events::AuditEvent;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task join error: {0}")]
    Task(String),

    #[error("invalid audit data: {0}")]
    InvalidData(String),

    #[error("audit worker stopped, {kind} for chat {chat_id} was not recorded")]
    WorkerGone { kind: &'static str, chat_id: ChatId },
}

/// Money that moved through one chat, summed from its audit trail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChatTotals {
    pub deposited: u64,
    pub billed_tokens: u64,
    pub refunded: u64,
    pub platform_fees: u64,
}

#[async_trait]
pub trait AuditStorage: Send + Sync {
    async fn init(&self) -> AuditResult<()>;

    /// Append one event. Appending the same event id twice is a no-op.
    async fn append(&self, event: &AuditEvent) -> AuditResult<()>;

    /// Events for `chat_id` in append order.
    async fn events_for_chat(&self, chat_id: &ChatId) -> AuditResult<Vec<AuditEvent>>;

    async fn chat_totals(&self, chat_id: &ChatId) -> AuditResult<ChatTotals>;
}

#[derive(Debug, Clone)]
pub struct SqliteAuditStorage {
    db_path: PathBuf,
}

impl SqliteAuditStorage {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, func: F) -> AuditResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> AuditResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_connection(&db_path)?;
            func(&connection)
        })
        .await
        .map_err(|error| AuditError::Task(error.to_string()))?
    }
}

#[async_trait]
impl AuditStorage for SqliteAuditStorage {
    async fn init(&self) -> AuditResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS audit_events (
                    event_id TEXT PRIMARY KEY,
                    occurred_at TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    chat_id TEXT NOT NULL,
                    user_id TEXT,
                    amount INTEGER NOT NULL DEFAULT 0,
                    platform_fee INTEGER NOT NULL DEFAULT 0,
                    payload TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_audit_chat ON audit_events(chat_id);
                CREATE INDEX IF NOT EXISTS idx_audit_kind ON audit_events(kind);
                CREATE INDEX IF NOT EXISTS idx_audit_occurred_at ON audit_events(occurred_at);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    async fn append(&self, event: &AuditEvent) -> AuditResult<()> {
        let meta = event.meta();
        let event_id = meta.event_id.clone();
        let occurred_at = meta.occurred_at.to_rfc3339();
        let kind = event.kind();
        let chat_id = event.chat_id().to_string();
        let user_id = event.subject().map(ToString::to_string);
        let amount = to_sql_amount(event.amount())?;
        let platform_fee = match event {
            AuditEvent::DepositCaptured { platform_fee, .. } => to_sql_amount(*platform_fee)?,
            _ => 0,
        };
        let payload = serde_json::to_string(event)?;

        self.with_connection(move |connection| {
            connection.execute(
                r#"
                INSERT OR IGNORE INTO audit_events (
                    event_id, occurred_at, kind, chat_id, user_id, amount, platform_fee, payload
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    event_id,
                    occurred_at,
                    kind,
                    chat_id,
                    user_id,
                    amount,
                    platform_fee,
                    payload
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn events_for_chat(&self, chat_id: &ChatId) -> AuditResult<Vec<AuditEvent>> {
        let chat_id = chat_id.to_string();
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(
                "SELECT payload FROM audit_events WHERE chat_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = statement.query_map(params![chat_id], |row| row.get::<_, String>(0))?;

            let mut events = Vec::new();
            for payload in rows {
                events.push(serde_json::from_str(&payload?)?);
            }
            Ok(events)
        })
        .await
    }

    async fn chat_totals(&self, chat_id: &ChatId) -> AuditResult<ChatTotals> {
        let chat_id = chat_id.to_string();
        self.with_connection(move |connection| {
            let (deposited, billed, refunded, fees) = connection.query_row(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN kind = 'deposit_captured' THEN amount END), 0),
                    COALESCE(SUM(CASE WHEN kind = 'message_billed' THEN amount END), 0),
                    COALESCE(SUM(CASE WHEN kind = 'refund_issued' THEN amount END), 0),
                    COALESCE(SUM(platform_fee), 0)
                FROM audit_events
                WHERE chat_id = ?1
                "#,
                params![chat_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )?;

            Ok(ChatTotals {
                deposited: from_sql_amount(deposited)?,
                billed_tokens: from_sql_amount(billed)?,
                refunded: from_sql_amount(refunded)?,
                platform_fees: from_sql_amount(fees)?,
            })
        })
        .await
    }
}

fn open_connection(path: &Path) -> AuditResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn to_sql_amount(amount: u64) -> AuditResult<i64> {
    i64::try_from(amount)
        .map_err(|_| AuditError::InvalidData(format!("amount {amount} exceeds i64 range")))
}

fn from_sql_amount(amount: i64) -> AuditResult<u64> {
    u64::try_from(amount)
        .map_err(|_| AuditError::InvalidData(format!("negative amount {amount} in audit log")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMeta;
    use chat_state::CloseReason;
    use chatpay_core::UserId;
    use tempfile::tempdir;

    fn chat() -> ChatId {
        ChatId::from("chat-1")
    }

    #[tokio::test]
    async fn append_is_idempotent_by_event_id() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteAuditStorage::new(dir.path().join("audit.db"));
        storage.init().await.expect("init");

        let event = AuditEvent::MessageBilled {
            meta: EventMeta::new(),
            chat_id: chat(),
            earner_id: UserId::from("earner"),
            tokens: 3,
            words: 21,
        };
        storage.append(&event).await.expect("append");
        storage.append(&event).await.expect("append again");

        let events = storage.events_for_chat(&chat()).await.expect("query");
        assert_eq!(events, vec![event]);
    }

    #[tokio::test]
    async fn totals_sum_by_kind() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteAuditStorage::new(dir.path().join("nested").join("audit.db"));
        storage.init().await.expect("init");

        let payer = UserId::from("payer");
        let events = [
            AuditEvent::DepositCaptured {
                meta: EventMeta::new(),
                chat_id: chat(),
                payer_id: payer.clone(),
                amount: 100,
                escrow_amount: 65,
                platform_fee: 35,
            },
            AuditEvent::MessageBilled {
                meta: EventMeta::new(),
                chat_id: chat(),
                earner_id: UserId::from("earner"),
                tokens: 3,
                words: 21,
            },
            AuditEvent::RefundIssued {
                meta: EventMeta::new(),
                chat_id: chat(),
                payer_id: payer,
                amount: 62,
                reason: CloseReason::Manual,
            },
        ];
        for event in &events {
            storage.append(event).await.expect("append");
        }

        let totals = storage.chat_totals(&chat()).await.expect("totals");
        assert_eq!(
            totals,
            ChatTotals {
                deposited: 100,
                billed_tokens: 3,
                refunded: 62,
                platform_fees: 35,
            }
        );

        let other = storage
            .chat_totals(&ChatId::from("other"))
            .await
            .expect("totals");
        assert_eq!(other, ChatTotals::default());
    }
}
