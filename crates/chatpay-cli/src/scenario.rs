//! Scripted chat scenarios replayed against in-memory backends.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chat_state::CloseReason;
use chatpay_audit::AuditLog;
use chatpay_core::{ChatId, ChatRoles, EngineConfig, MessageContent, ParticipantContext, UserId};
use chatpay_engine::{
    Clock, CloseOutcome, DepositReceipt, InMemoryLedger, InMemoryProfileStore, ManualClock,
    MessageOutcome, MonetizationEngine, SweepReport, WalletLedger,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Wall-clock start; defaults to 2026-01-01T00:00:00Z.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profiles: Vec<ParticipantContext>,
    #[serde(default)]
    pub balances: BTreeMap<UserId, u64>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Open {
        chat: ChatId,
        a: UserId,
        b: UserId,
        initiator: UserId,
    },
    Message {
        chat: ChatId,
        sender: UserId,
        content: MessageContent,
    },
    Deposit {
        chat: ChatId,
        payer: UserId,
    },
    Close {
        chat: ChatId,
        by: UserId,
        #[serde(default = "manual")]
        reason: CloseReason,
    },
    Mismatch {
        chat: ChatId,
        reporter: UserId,
        suspect: UserId,
    },
    Refresh {
        chat: ChatId,
    },
    /// Replace a participant's profile; open sessions only see it on refresh.
    Profile(ParticipantContext),
    Advance {
        #[serde(default)]
        hours: i64,
        #[serde(default)]
        minutes: i64,
    },
    Sweep,
}

fn manual() -> CloseReason {
    CloseReason::Manual
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Message { .. } => "message",
            Self::Deposit { .. } => "deposit",
            Self::Close { .. } => "close",
            Self::Mismatch { .. } => "mismatch",
            Self::Refresh { .. } => "refresh",
            Self::Profile(_) => "profile",
            Self::Advance { .. } => "advance",
            Self::Sweep => "sweep",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepOutcome {
    Opened { roles: ChatRoles },
    Message(MessageOutcome),
    Deposited(DepositReceipt),
    Closed(CloseOutcome),
    Refreshed { roles: ChatRoles },
    ProfileUpdated { user_id: UserId },
    Advanced { now: DateTime<Utc> },
    Swept(SweepReport),
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match self {
            Self::Opened { roles } => format!(
                "payer {} earner {} mode {:?} price {} ({:?})",
                roles.payer_id,
                roles
                    .earner_id
                    .as_ref()
                    .map_or("platform", |id| id.as_str()),
                roles.mode,
                roles.price,
                roles.rule
            ),
            Self::Message(outcome) if outcome.allowed => {
                format!("delivered, {} token(s)", outcome.tokens_cost)
            }
            Self::Message(outcome) => match &outcome.reason {
                Some(reason) => format!("rejected: {reason}"),
                None => "rejected".to_string(),
            },
            Self::Deposited(receipt) => format!(
                "escrow {} fee {} expires {}",
                receipt.escrow_amount, receipt.platform_fee, receipt.expires_at
            ),
            Self::Closed(outcome) if outcome.is_already_terminal() => {
                format!("already {:?}", outcome.state())
            }
            Self::Closed(outcome) => {
                format!("{:?}, refund {}", outcome.state(), outcome.refund())
            }
            Self::Refreshed { roles } => format!("mode {:?} payer {}", roles.mode, roles.payer_id),
            Self::ProfileUpdated { user_id } => format!("profile of {user_id} replaced"),
            Self::Advanced { now } => format!("clock at {now}"),
            Self::Swept(report) => format!(
                "scanned {} expired {} failed {}",
                report.scanned,
                report.expired.len(),
                report.failures.len()
            ),
            Self::Failed { error } => error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: &'static str,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
    pub balances: BTreeMap<UserId, u64>,
}

impl ScenarioReport {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_failure()).count()
    }
}

/// Engine wired to in-memory backends and a manual clock.
pub struct ScenarioRunner {
    engine: MonetizationEngine,
    ledger: Arc<InMemoryLedger>,
    profiles: Arc<InMemoryProfileStore>,
    clock: Arc<ManualClock>,
}

impl ScenarioRunner {
    pub fn new(
        config: EngineConfig,
        audit: Arc<dyn AuditLog>,
        start: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let ledger = Arc::new(InMemoryLedger::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let clock = Arc::new(ManualClock::new(start));
        let engine = MonetizationEngine::builder(config)
            .ledger(ledger.clone())
            .profiles(profiles.clone())
            .audit(audit)
            .clock(clock.clone())
            .build()
            .context("invalid engine configuration")?;

        Ok(Self {
            engine,
            ledger,
            profiles,
            clock,
        })
    }

    pub fn default_start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_767_225_600, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Seed profiles and balances, then run every step. Engine errors are
    /// recorded per step and do not stop the run.
    pub fn run(&self, scenario: &Scenario) -> anyhow::Result<ScenarioReport> {
        for profile in &scenario.profiles {
            self.profiles.upsert(profile.clone());
        }
        for (user, balance) in &scenario.balances {
            self.ledger.set_balance(user.clone(), *balance);
        }

        let steps = scenario
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                let outcome = self.apply(step);
                debug!(index, action = step.name(), outcome = %outcome.summary(), "step applied");
                StepReport {
                    index,
                    action: step.name(),
                    outcome,
                }
            })
            .collect();

        let mut balances = BTreeMap::new();
        let users = scenario
            .profiles
            .iter()
            .map(|p| &p.user_id)
            .chain(scenario.balances.keys());
        for user in users {
            let balance = self
                .ledger
                .balance(user)
                .with_context(|| format!("failed to read balance of {user}"))?;
            balances.insert(user.clone(), balance);
        }

        Ok(ScenarioReport { steps, balances })
    }

    fn apply(&self, step: &Step) -> StepOutcome {
        let result = match step {
            Step::Open {
                chat,
                a,
                b,
                initiator,
            } => self
                .engine
                .open_chat(chat.clone(), a, b, initiator)
                .map(|session| StepOutcome::Opened {
                    roles: session.roles,
                }),
            Step::Message {
                chat,
                sender,
                content,
            } => self
                .engine
                .process_message(chat, sender, content)
                .map(StepOutcome::Message),
            Step::Deposit { chat, payer } => {
                self.engine.deposit(chat, payer).map(StepOutcome::Deposited)
            }
            Step::Close { chat, by, reason } => self
                .engine
                .close_session(chat, by, *reason)
                .map(StepOutcome::Closed),
            Step::Mismatch {
                chat,
                reporter,
                suspect,
            } => self
                .engine
                .handle_mismatch(chat, reporter, suspect)
                .map(StepOutcome::Closed),
            Step::Refresh { chat } => self
                .engine
                .refresh_roles(chat)
                .map(|roles| StepOutcome::Refreshed { roles }),
            Step::Profile(profile) => {
                self.profiles.upsert(profile.clone());
                Ok(StepOutcome::ProfileUpdated {
                    user_id: profile.user_id.clone(),
                })
            }
            Step::Advance { hours, minutes } => {
                self.clock
                    .advance(Duration::hours(*hours) + Duration::minutes(*minutes));
                Ok(StepOutcome::Advanced {
                    now: self.clock.now(),
                })
            }
            Step::Sweep => self.engine.sweep_expired().map(StepOutcome::Swept),
        };

        result.unwrap_or_else(|error| StepOutcome::Failed {
            error: error.to_string(),
        })
    }
}
