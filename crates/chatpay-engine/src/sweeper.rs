//! Periodic expiry of inactive sessions.

use std::sync::Arc;

use chat_state::{ChatSession, CloseReason};
use chatpay_core::{ChatId, ExpiryConfig};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::escrow::{CloseOutcome, EscrowManager};
use crate::store::SessionStore;

/// Which inactivity rule expired a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryRule {
    /// A paid message was sent and the chat then went quiet.
    PaidInactivity,
    /// No activity at all for the absolute limit.
    AbsoluteInactivity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredSession {
    pub chat_id: ChatId,
    pub rule: ExpiryRule,
    pub refund: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub chat_id: ChatId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: Vec<ExpiredSession>,
    pub failures: Vec<SweepFailure>,
}

/// Inactivity thresholds, in the order they are checked.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    paid_inactivity: Duration,
    absolute_inactivity: Duration,
}

impl ExpiryPolicy {
    pub fn from_config(config: &ExpiryConfig) -> Self {
        Self {
            paid_inactivity: Duration::hours(config.paid_inactivity_hours),
            absolute_inactivity: Duration::hours(config.absolute_inactivity_hours),
        }
    }

    /// The rule `session` breaks at `now`, if any. The paid rule wins when
    /// both apply.
    pub fn rule_for(&self, session: &ChatSession, now: DateTime<Utc>) -> Option<ExpiryRule> {
        if !session.state().is_active() {
            return None;
        }
        let idle = now - session.last_activity_at;
        if session.first_paid_message_at.is_some() && idle > self.paid_inactivity {
            Some(ExpiryRule::PaidInactivity)
        } else if idle > self.absolute_inactivity {
            Some(ExpiryRule::AbsoluteInactivity)
        } else {
            None
        }
    }
}

pub struct ExpirySweeper {
    sessions: Arc<dyn SessionStore>,
    escrow: Arc<EscrowManager>,
    clock: Arc<dyn Clock>,
    policy: ExpiryPolicy,
    interval: std::time::Duration,
}

impl ExpirySweeper {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        escrow: Arc<EscrowManager>,
        clock: Arc<dyn Clock>,
        config: &ExpiryConfig,
    ) -> Self {
        Self {
            sessions,
            escrow,
            clock,
            policy: ExpiryPolicy::from_config(config),
            interval: std::time::Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    /// Scan every active session once and expire the inactive ones.
    ///
    /// Each session is re-checked under its own lock, so a message that
    /// lands between listing and closing keeps the session alive. A failure
    /// on one session is logged and recorded; the sweep carries on.
    pub fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let ids = self.sessions.list_active_ids()?;
        let mut report = SweepReport {
            scanned: ids.len(),
            ..SweepReport::default()
        };

        for chat_id in ids {
            let result = self.sessions.with_session_lock(&chat_id, |session| {
                match self.policy.rule_for(session, now) {
                    None => Ok(None),
                    Some(rule) => {
                        let (outcome, events) =
                            self.escrow
                                .settle(session, None, CloseReason::Expiration, now)?;
                        Ok(Some((rule, outcome, events)))
                    }
                }
            });

            match result {
                Ok(Some((rule, CloseOutcome::Closed { refund, .. }, events))) => {
                    self.escrow.publish(events);
                    debug!(chat_id = %chat_id, ?rule, refund, "session expired");
                    report.expired.push(ExpiredSession {
                        chat_id,
                        rule,
                        refund,
                    });
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(chat_id = %chat_id, %error, "failed to expire session");
                    report.failures.push(SweepFailure {
                        chat_id,
                        error: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Run `sweep` on the configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match self.sweep() {
                        Ok(report) if report.expired.is_empty() && report.failures.is_empty() => {
                            debug!(scanned = report.scanned, "sweep found nothing to expire");
                        }
                        Ok(report) => info!(
                            scanned = report.scanned,
                            expired = report.expired.len(),
                            failures = report.failures.len(),
                            "sweep finished"
                        ),
                        Err(error) => warn!(%error, "sweep failed"),
                    },
                }
            }

            info!("expiry sweeper stopped");
        })
    }
}
