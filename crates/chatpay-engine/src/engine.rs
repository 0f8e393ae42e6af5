//! MonetizationEngine - the public entry point wiring every component together.

use std::sync::Arc;

use chat_state::{ChatSession, CloseReason, SessionState, TransitionError};
use chatpay_audit::{AuditEvent, AuditLog, EventMeta, NullAuditLog};
use chatpay_core::{
    resolve_roles_with, ChatId, ChatRoles, EngineConfig, MessageContent, ParticipantContext,
    UserId,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::abuse::AbuseGuard;
use crate::billing::BillingProcessor;
use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, MessageOutcome, Result};
use crate::escrow::{CloseOutcome, DepositReceipt, EscrowManager};
use crate::ledger::{InMemoryLedger, WalletLedger};
use crate::profile::{InMemoryProfileStore, ProfileStore};
use crate::safety::SafetyCloser;
use crate::store::{InMemorySessionStore, SessionStore};
use crate::sweeper::{ExpirySweeper, SweepReport};

/// Builder for [`MonetizationEngine`]. Backends left unset fall back to the
/// in-memory implementations, a system clock and no auditing.
pub struct EngineBuilder {
    config: EngineConfig,
    sessions: Option<Arc<dyn SessionStore>>,
    ledger: Option<Arc<dyn WalletLedger>>,
    profiles: Option<Arc<dyn ProfileStore>>,
    audit: Option<Arc<dyn AuditLog>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn WalletLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and wire the engine.
    pub fn build(self) -> Result<MonetizationEngine> {
        self.config.validate()?;

        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(InMemoryLedger::new()));
        let profiles = self
            .profiles
            .unwrap_or_else(|| Arc::new(InMemoryProfileStore::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(NullAuditLog));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let billing = BillingProcessor::new(
            Arc::clone(&sessions),
            Arc::clone(&ledger),
            Arc::clone(&audit),
            Arc::clone(&clock),
            AbuseGuard::new(&self.config.abuse),
        );
        let escrow = Arc::new(EscrowManager::new(
            Arc::clone(&sessions),
            Arc::clone(&ledger),
            Arc::clone(&audit),
            Arc::clone(&clock),
            self.config.expiry.paid_session_hours,
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::clone(&sessions),
            Arc::clone(&escrow),
            Arc::clone(&clock),
            &self.config.expiry,
        ));
        let safety = SafetyCloser::new(
            Arc::clone(&sessions),
            Arc::clone(&escrow),
            Arc::clone(&audit),
            Arc::clone(&clock),
        );

        Ok(MonetizationEngine {
            config: self.config,
            sessions,
            ledger,
            profiles,
            audit,
            clock,
            billing,
            escrow,
            sweeper,
            safety,
        })
    }
}

pub struct MonetizationEngine {
    config: EngineConfig,
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn WalletLedger>,
    profiles: Arc<dyn ProfileStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    billing: BillingProcessor,
    escrow: Arc<EscrowManager>,
    sweeper: Arc<ExpirySweeper>,
    safety: SafetyCloser,
}

impl MonetizationEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            sessions: None,
            ledger: None,
            profiles: None,
            audit: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn WalletLedger> {
        &self.ledger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolve roles with this engine's pricing policy.
    pub fn resolve_roles(
        &self,
        a: &ParticipantContext,
        b: &ParticipantContext,
        initiator: &UserId,
    ) -> ChatRoles {
        resolve_roles_with(&self.config.pricing, a, b, initiator)
    }

    /// Create a session in `FreeActive` for already-resolved roles.
    pub fn initialize_session(
        &self,
        chat_id: ChatId,
        participants: [UserId; 2],
        roles: ChatRoles,
    ) -> Result<ChatSession> {
        if participants[0] == participants[1] {
            return Err(EngineError::InvalidParticipants(format!(
                "{} cannot chat with themselves",
                participants[0]
            )));
        }
        let parties = std::iter::once(&roles.payer_id).chain(roles.earner_id.as_ref());
        for party in parties {
            if !participants.contains(party) {
                return Err(EngineError::NotParticipant {
                    chat_id,
                    user: party.clone(),
                });
            }
        }

        let now = self.clock.now();
        let session = ChatSession::new(chat_id, participants, roles, now);
        self.sessions.insert(session.clone())?;

        info!(
            chat_id = %session.chat_id,
            payer = %session.roles.payer_id,
            mode = ?session.roles.mode,
            rule = ?session.roles.rule,
            "session opened"
        );
        self.audit.record(AuditEvent::SessionOpened {
            meta: EventMeta::at(now),
            chat_id: session.chat_id.clone(),
            payer_id: session.roles.payer_id.clone(),
            earner_id: session.roles.earner_id.clone(),
            mode: session.roles.mode,
            price: session.roles.price,
        });
        Ok(session)
    }

    /// Look up both profiles, resolve roles and initialize the session.
    pub fn open_chat(
        &self,
        chat_id: ChatId,
        a: &UserId,
        b: &UserId,
        initiator: &UserId,
    ) -> Result<ChatSession> {
        if initiator != a && initiator != b {
            return Err(EngineError::NotParticipant {
                chat_id,
                user: initiator.clone(),
            });
        }
        let ctx_a = self.profiles.participant_context(a)?;
        let ctx_b = self.profiles.participant_context(b)?;
        let roles = self.resolve_roles(&ctx_a, &ctx_b, initiator);
        self.initialize_session(chat_id, [a.clone(), b.clone()], roles)
    }

    pub fn process_message(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        content: &MessageContent,
    ) -> Result<MessageOutcome> {
        self.billing.process_message(chat_id, sender, content)
    }

    pub fn deposit(&self, chat_id: &ChatId, payer: &UserId) -> Result<DepositReceipt> {
        self.escrow.deposit(chat_id, payer)
    }

    /// Close a chat on behalf of a participant.
    ///
    /// Only `Manual` is accepted here. Expiration belongs to the sweeper and
    /// a mismatch close to [`Self::handle_mismatch`].
    pub fn close_session(
        &self,
        chat_id: &ChatId,
        closed_by: &UserId,
        reason: CloseReason,
    ) -> Result<CloseOutcome> {
        if reason != CloseReason::Manual {
            return Err(EngineError::ReservedCloseReason(reason));
        }
        self.escrow.close(chat_id, closed_by)
    }

    pub fn handle_mismatch(
        &self,
        chat_id: &ChatId,
        reporter: &UserId,
        suspect: &UserId,
    ) -> Result<CloseOutcome> {
        self.safety.handle_mismatch(chat_id, reporter, suspect)
    }

    pub fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweeper.sweep()
    }

    /// Start the periodic expiry sweep on the current tokio runtime.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.sweeper).spawn(cancel)
    }

    /// Snapshot of a session.
    pub fn session(&self, chat_id: &ChatId) -> Result<ChatSession> {
        self.sessions
            .get(chat_id)?
            .ok_or_else(|| EngineError::SessionNotFound(chat_id.clone()))
    }

    /// Re-resolve roles of a free low-popularity chat from current profiles.
    ///
    /// Returns the roles in force afterwards. A chat that resolves to paid
    /// roles keeps its free-message counters and moves to `AwaitingPrepaid`
    /// if the new allowance is already spent.
    pub fn refresh_roles(&self, chat_id: &ChatId) -> Result<ChatRoles> {
        let snapshot = self.session(chat_id)?;
        ensure_refreshable(&snapshot)?;

        let [a, b] = &snapshot.participants;
        let ctx_a = self.profiles.participant_context(a)?;
        let ctx_b = self.profiles.participant_context(b)?;
        // The nominal payer of a free chat is its initiator.
        let roles = self.resolve_roles(&ctx_a, &ctx_b, &snapshot.roles.payer_id);
        if roles.is_free() {
            return Ok(snapshot.roles);
        }

        let now = self.clock.now();
        let state = self.sessions.with_session_lock(chat_id, |session| {
            ensure_refreshable(session)?;
            Ok(session.replace_roles(roles.clone(), now)?.to)
        })?;

        info!(
            chat_id = %chat_id,
            payer = %roles.payer_id,
            rule = ?roles.rule,
            state = ?state,
            "free chat switched to paid roles"
        );
        self.audit.record(AuditEvent::SessionOpened {
            meta: EventMeta::at(now),
            chat_id: chat_id.clone(),
            payer_id: roles.payer_id.clone(),
            earner_id: roles.earner_id.clone(),
            mode: roles.mode,
            price: roles.price,
        });
        Ok(roles)
    }
}

fn ensure_refreshable(session: &ChatSession) -> Result<()> {
    let state = session.state();
    if state == SessionState::FreeActive && session.roles.is_free() {
        return Ok(());
    }
    Err(EngineError::InvalidTransition(
        TransitionError::InvalidTransition {
            from: state,
            event: "roles_refreshed".to_string(),
        },
    ))
}
