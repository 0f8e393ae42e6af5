//! chatpay-engine - runtime of the chat monetization engine
//!
//! - `abuse` - copy-paste detection per sender
//! - `billing` - per-message free/paid gate and bucket metering
//! - `escrow` - deposits, refunds and session closing
//! - `sweeper` - periodic expiry of inactive sessions
//! - `safety` - emergency close on identity mismatch
//! - `store`, `ledger`, `profile`, `clock` - backend contracts with in-memory
//!   implementations
//! - `engine` - the `MonetizationEngine` facade

pub mod abuse;
pub mod billing;
pub mod clock;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod profile;
pub mod safety;
pub mod store;
pub mod sweeper;

pub use abuse::{AbuseGuard, CopyPasteRecord};
pub use billing::{message_cost, BillingProcessor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineBuilder, MonetizationEngine};
pub use error::{EngineError, MessageOutcome, Rejection, Result};
pub use escrow::{refund_for, CloseOutcome, DepositReceipt, EscrowManager};
pub use ledger::{op_id, InMemoryLedger, LedgerError, WalletLedger};
pub use profile::{InMemoryProfileStore, ProfileError, ProfileStore};
pub use safety::SafetyCloser;
pub use store::{InMemorySessionStore, SessionStore, SessionUpdate};
pub use sweeper::{ExpiredSession, ExpiryPolicy, ExpiryRule, ExpirySweeper, SweepFailure, SweepReport};
