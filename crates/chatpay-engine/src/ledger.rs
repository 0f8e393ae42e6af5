//! Wallet ledger contract and an in-memory implementation.
//!
//! Every mutation carries an operation id. Applying the same id twice is a
//! no-op, which lets the engine retry a transaction wholesale.

use chatpay_core::{ChatId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{user} has {balance}, needs {required}")]
    InsufficientFunds {
        user: UserId,
        balance: u64,
        required: u64,
    },

    #[error("balance overflow for {0}")]
    Overflow(UserId),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

pub trait WalletLedger: Send + Sync {
    fn balance(&self, user: &UserId) -> Result<u64, LedgerError>;

    /// Atomically check and decrement `user`'s balance.
    fn debit(&self, op_id: &str, user: &UserId, amount: u64) -> Result<(), LedgerError>;

    fn credit(&self, op_id: &str, user: &UserId, amount: u64) -> Result<(), LedgerError>;
}

/// Deterministic operation ids, one per money movement.
pub mod op_id {
    use super::ChatId;

    pub fn deposit(chat_id: &ChatId) -> String {
        format!("deposit:{chat_id}")
    }

    pub fn refund(chat_id: &ChatId) -> String {
        format!("refund:{chat_id}")
    }

    pub fn bill(chat_id: &ChatId, seq: u64) -> String {
        format!("bill:{chat_id}:{seq}")
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<UserId, u64>,
    applied: DashMap<String, u64>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a wallet outside of any operation id.
    pub fn set_balance(&self, user: impl Into<UserId>, amount: u64) {
        self.balances.insert(user.into(), amount);
    }

    /// Whether an operation id has been applied.
    pub fn is_applied(&self, op_id: &str) -> bool {
        self.applied.contains_key(op_id)
    }

    fn apply<F>(&self, op_id: &str, amount: u64, mutate: F) -> Result<(), LedgerError>
    where
        F: FnOnce() -> Result<(), LedgerError>,
    {
        // The applied-op entry is held across the balance update so two
        // concurrent calls with the same id cannot both apply. Lock order is
        // always `applied` then `balances`.
        match self.applied.entry(op_id.to_string()) {
            Entry::Occupied(_) => {
                debug!(op_id, "ledger operation already applied");
                Ok(())
            }
            Entry::Vacant(slot) => {
                mutate()?;
                slot.insert(amount);
                Ok(())
            }
        }
    }
}

impl WalletLedger for InMemoryLedger {
    fn balance(&self, user: &UserId) -> Result<u64, LedgerError> {
        Ok(self.balances.get(user).map(|b| *b).unwrap_or(0))
    }

    fn debit(&self, op_id: &str, user: &UserId, amount: u64) -> Result<(), LedgerError> {
        self.apply(op_id, amount, || {
            let mut balance = self.balances.entry(user.clone()).or_insert(0);
            if *balance < amount {
                return Err(LedgerError::InsufficientFunds {
                    user: user.clone(),
                    balance: *balance,
                    required: amount,
                });
            }
            *balance -= amount;
            Ok(())
        })
    }

    fn credit(&self, op_id: &str, user: &UserId, amount: u64) -> Result<(), LedgerError> {
        self.apply(op_id, amount, || {
            let mut balance = self.balances.entry(user.clone()).or_insert(0);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Overflow(user.clone()))?;
            Ok(())
        })
    }
}
