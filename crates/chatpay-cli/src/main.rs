mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chatpay_audit::{
    AuditBus, AuditLog, AuditStorage, AuditWorker, NullAuditLog, SqliteAuditStorage,
};
use chatpay_core::{
    count_billable_words, resolve_roles_with, ChatId, EngineConfig, MessageContent,
    ParticipantContext, UserId,
};
use chatpay_engine::message_cost;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scenario::{Scenario, ScenarioReport, ScenarioRunner};

#[derive(Parser)]
#[command(name = "chatpay")]
#[command(about = "Inspect and simulate the chat monetization engine")]
#[command(version)]
struct Cli {
    /// Config file (TOML, or JSON by extension). Defaults to $CHATPAY_CONFIG or chatpay.toml
    #[arg(long, short, env = "CHATPAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve chat roles for two participant profiles
    Resolve {
        /// First participant (JSON ParticipantContext)
        a: PathBuf,
        /// Second participant (JSON ParticipantContext)
        b: PathBuf,
        /// User id of the participant starting the chat
        #[arg(long)]
        initiator: String,
    },
    /// Count billable words and the token cost of a text
    Words {
        text: String,
        #[arg(long, default_value_t = 7)]
        words_per_token: u32,
    },
    /// Replay a scenario file against in-memory backends
    Simulate {
        scenario: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Skip the SQLite audit trail
        #[arg(long)]
        no_audit: bool,
    },
    /// Print the audit trail of one chat
    Audit {
        #[arg(long)]
        chat: String,
        /// Audit database; defaults to the configured path
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Resolve { a, b, initiator } => resolve(&config, &a, &b, initiator),
        Commands::Words {
            text,
            words_per_token,
        } => {
            words(&text, words_per_token);
            Ok(())
        }
        Commands::Simulate {
            scenario,
            json,
            no_audit,
        } => simulate(config, &scenario, json, no_audit).await,
        Commands::Audit { chat, db, json } => {
            let db = db.unwrap_or_else(|| config.audit.db_path.clone());
            audit(&db, &ChatId::from(chat), json).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return EngineConfig::load().context("failed to load configuration");
    };
    let mut config = EngineConfig::from_path(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn read_participant(path: &Path) -> anyhow::Result<ParticipantContext> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid participant in {}", path.display()))
}

fn resolve(config: &EngineConfig, a: &Path, b: &Path, initiator: String) -> anyhow::Result<()> {
    let a = read_participant(a)?;
    let b = read_participant(b)?;
    let initiator = UserId::from(initiator);
    if initiator != a.user_id && initiator != b.user_id {
        bail!("initiator {initiator} is neither {} nor {}", a.user_id, b.user_id);
    }

    let roles = resolve_roles_with(&config.pricing, &a, &b, &initiator);
    println!("{}", format!("rule: {:?}", roles.rule).cyan());
    println!("{}", serde_json::to_string_pretty(&roles)?);
    Ok(())
}

fn words(text: &str, words_per_token: u32) {
    let (tokens, billed) = message_cost(&MessageContent::text(text), words_per_token);
    println!(
        "{} billable word(s), {} token(s) at {} words/token",
        count_billable_words(text).to_string().bold(),
        tokens.to_string().bold(),
        words_per_token
    );
    tracing::debug!(billed, "metered text");
}

async fn simulate(
    config: EngineConfig,
    path: &Path,
    json: bool,
    no_audit: bool,
) -> anyhow::Result<()> {
    let scenario = Scenario::from_path(path)?;
    let start = scenario
        .start
        .unwrap_or_else(ScenarioRunner::default_start);

    let report = if no_audit || !config.audit.enabled {
        ScenarioRunner::new(config, Arc::new(NullAuditLog), start)?.run(&scenario)?
    } else {
        let storage = Arc::new(SqliteAuditStorage::new(&config.audit.db_path));
        storage
            .init()
            .await
            .with_context(|| format!("failed to open {}", config.audit.db_path.display()))?;
        let (bus, receiver) = AuditBus::new(config.audit.backlog_warning);
        let worker = AuditWorker::new(storage).spawn(receiver);
        let lost = bus.lost_counter();
        let db_path = config.audit.db_path.clone();

        let audit: Arc<dyn AuditLog> = Arc::new(bus);
        let report = ScenarioRunner::new(config, audit, start)?.run(&scenario)?;

        // The runner owned the last bus handle, so the worker drains and exits.
        let persisted = worker.await.context("audit worker panicked")?;
        println!(
            "{}",
            format!(
                "audit: {} event(s) written to {}",
                persisted,
                db_path.display()
            )
            .dimmed()
        );
        let lost = lost.load(std::sync::atomic::Ordering::Relaxed);
        if lost > 0 {
            bail!("{lost} audit event(s) were not recorded");
        }
        report
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if report.failures() > 0 {
        bail!("{} step(s) failed", report.failures());
    }
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    for step in &report.steps {
        let line = format!(
            "#{:<3} {:<9} {}",
            step.index,
            step.action,
            step.outcome.summary()
        );
        let line = match &step.outcome {
            scenario::StepOutcome::Failed { .. } => line.red(),
            scenario::StepOutcome::Message(outcome) if !outcome.allowed => line.yellow(),
            scenario::StepOutcome::Closed(_) | scenario::StepOutcome::Swept(_) => line.cyan(),
            _ => line.normal(),
        };
        println!("{line}");
    }

    println!("{}", "balances".bold());
    for (user, balance) in &report.balances {
        println!("  {user:<12} {balance}");
    }
}

async fn audit(db: &Path, chat_id: &ChatId, json: bool) -> anyhow::Result<()> {
    if !db.exists() {
        bail!("audit database {} does not exist", db.display());
    }
    let storage = SqliteAuditStorage::new(db);
    let events = storage.events_for_chat(chat_id).await?;
    let totals = storage.chat_totals(chat_id).await?;

    if json {
        let out = serde_json::json!({ "events": events, "totals": totals });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("{}", format!("no audit events for {chat_id}").yellow());
        return Ok(());
    }
    for event in &events {
        let subject = event
            .subject()
            .map_or_else(|| "-".to_string(), |user| user.to_string());
        let amount = match event.amount() {
            0 => String::new(),
            amount => amount.to_string(),
        };
        println!(
            "{}  {:<16} {:<12} {}",
            event.meta().occurred_at.format("%Y-%m-%d %H:%M:%S"),
            event.kind().green(),
            subject,
            amount
        );
    }
    println!(
        "{}",
        format!(
            "deposited {} billed {} refunded {} fees {}",
            totals.deposited, totals.billed_tokens, totals.refunded, totals.platform_fees
        )
        .bold()
    );
    Ok(())
}
