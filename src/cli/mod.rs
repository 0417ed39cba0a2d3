use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use crate::application::{LedgerConfig, LedgerError, PointLedger, UnknownUserPolicy};
use crate::domain::{parse_points, IntegrityReport, Points, UserId};
use crate::io::Exporter;
use crate::storage::{MemoryBalanceStore, MemoryHistoryLog, IN_MEMORY_URL};

/// Pointledger - per-user point balances with serialized charge/use
#[derive(Parser)]
#[command(name = "pointledger")]
#[command(about = "Charge and use points per user, with an append-only history")]
#[command(version)]
pub struct Cli {
    /// Storage backend
    #[arg(long, value_enum, default_value = "memory", env = "POINTLEDGER_BACKEND")]
    pub backend: Backend,

    /// SQLite database URL (sqlite backend only)
    #[arg(long, default_value = IN_MEMORY_URL, env = "POINTLEDGER_DATABASE_URL")]
    pub database_url: String,

    /// Simulated latency of every store access in milliseconds (memory backend only)
    #[arg(long, env = "POINTLEDGER_LATENCY_MS")]
    pub latency_ms: Option<u64>,

    /// How `use` treats a user that was never charged or opened
    #[arg(long, value_enum, default_value = "reject", env = "POINTLEDGER_UNKNOWN_USER")]
    pub unknown_user: UnknownUserPolicy,

    /// Give up on a request after waiting this long for its user (milliseconds)
    #[arg(long, env = "POINTLEDGER_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: Option<u64>,

    /// Print one JSON object per response
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process maps
    Memory,
    /// SQLite through sqlx
    Sqlite,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run request lines from a script (stdin if omitted) against one ledger
    Session {
        /// Script file, one request per line
        script: Option<PathBuf>,

        /// Stop at the first failed request
        #[arg(long)]
        fail_fast: bool,
    },

    /// Fire concurrent `use` requests at one user and verify the outcome
    Stress {
        /// Target user id
        #[arg(long, default_value = "1")]
        user: UserId,

        /// Points charged before the run
        #[arg(long, default_value = "500")]
        initial: Points,

        /// Number of concurrent requests
        #[arg(long, default_value = "5")]
        tasks: usize,

        /// Points used by each request
        #[arg(long, default_value = "100")]
        amount: Points,
    },
}

/// One request line inside a session, e.g. `charge 1 50`
#[derive(Parser)]
#[command(no_binary_name = true)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct RequestLine {
    #[command(subcommand)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Request {
    /// Show a user's balance
    Point { user_id: UserId },

    /// Show a user's charge/use history
    History { user_id: UserId },

    /// Credit points to a user
    Charge {
        user_id: UserId,
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },

    /// Spend points from a user
    Use {
        user_id: UserId,
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },

    /// Create a user with a zero balance
    Open { user_id: UserId },

    /// Compare a user's balance with its history
    Check { user_id: UserId },

    /// Export a user's history (csv) or snapshot (json)
    Export {
        user_id: UserId,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },
}

impl Request {
    /// Parse a single request line. Blank lines and `#` comments yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let parsed = RequestLine::try_parse_from(line.split_whitespace())
            .with_context(|| format!("Invalid request '{}'", line))?;
        Ok(Some(parsed.request))
    }
}

/// Counts of a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of a stress run
#[derive(Debug, Clone)]
pub struct StressOutcome {
    pub succeeded: usize,
    pub rejected: usize,
    pub final_balance: Points,
    pub report: IntegrityReport,
}

impl Cli {
    pub fn ledger_config(&self) -> LedgerConfig {
        let config = LedgerConfig::default().with_unknown_user(self.unknown_user);
        match self.lock_timeout_ms {
            Some(ms) => config.with_lock_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }

    /// Build the ledger selected by the global flags.
    pub async fn build_ledger(&self) -> Result<PointLedger> {
        let ledger = match self.backend {
            Backend::Memory => {
                let mut balances = MemoryBalanceStore::new();
                let mut history = MemoryHistoryLog::new();
                if let Some(ms) = self.latency_ms {
                    balances = balances.with_latency(Duration::from_millis(ms));
                    history = history.with_latency(Duration::from_millis(ms));
                }
                PointLedger::new(Arc::new(balances), Arc::new(history))
            }
            Backend::Sqlite => PointLedger::sqlite(&self.database_url)
                .await
                .with_context(|| format!("Failed to open {}", self.database_url))?,
        };
        Ok(ledger.with_config(self.ledger_config()))
    }

    pub async fn run(self) -> Result<()> {
        let ledger = self.build_ledger().await?;
        let stdout = std::io::stdout();

        match self.command {
            Commands::Session { script, fail_fast } => {
                let summary = match script {
                    Some(path) => {
                        let file = File::open(&path)
                            .with_context(|| format!("Failed to open {}", path.display()))?;
                        run_session(
                            &ledger,
                            BufReader::new(file),
                            &mut stdout.lock(),
                            self.json,
                            fail_fast,
                        )
                        .await?
                    }
                    None => {
                        run_session(
                            &ledger,
                            std::io::stdin().lock(),
                            &mut stdout.lock(),
                            self.json,
                            fail_fast,
                        )
                        .await?
                    }
                };
                eprintln!(
                    "{} request(s) succeeded, {} failed",
                    summary.succeeded, summary.failed
                );
            }

            Commands::Stress {
                user,
                initial,
                tasks,
                amount,
            } => {
                let outcome = run_stress(Arc::new(ledger), user, initial, tasks, amount).await?;
                print_stress(&mut stdout.lock(), user, &outcome, self.json)?;
                if !outcome.report.is_consistent() {
                    anyhow::bail!("Ledger integrity check failed for user {}", user);
                }
            }
        }

        Ok(())
    }
}

/// Execute request lines from `reader`, writing one response per request.
///
/// Failed requests are reported inline and do not stop the session unless
/// `fail_fast` is set. Malformed lines count as failures.
pub async fn run_session<R: BufRead, W: Write>(
    ledger: &PointLedger,
    reader: R,
    out: &mut W,
    json: bool,
    fail_fast: bool,
) -> Result<SessionSummary> {
    let mut summary = SessionSummary::default();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read request line")?;

        let outcome = match Request::parse_line(&line) {
            Ok(None) => continue,
            Ok(Some(request)) => handle_request(ledger, request, out, json).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                summary.failed += 1;
                write_error(out, line_num + 1, &e, json)?;
                if fail_fast {
                    break;
                }
            }
        }
    }

    out.flush()?;
    Ok(summary)
}

/// Execute one request and write its response.
pub async fn handle_request<W: Write>(
    ledger: &PointLedger,
    request: Request,
    out: &mut W,
    json: bool,
) -> Result<()> {
    match request {
        Request::Point { user_id } => {
            let balance = ledger.get_balance(user_id).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string(&balance)?)?;
            } else {
                writeln!(
                    out,
                    "User {}: {} points (updated {})",
                    balance.user_id,
                    balance.balance,
                    balance.updated_at.format("%Y-%m-%d %H:%M:%S")
                )?;
            }
        }

        Request::History { user_id } => {
            let history = ledger.list_history(user_id).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string(&history)?)?;
            } else if history.is_empty() {
                writeln!(out, "No history for user {}", user_id)?;
            } else {
                writeln!(out, "History for user {} ({} records)", user_id, history.len())?;
                writeln!(out, "{:>6}  {:<8} {:>10}  {}", "ID", "KIND", "AMOUNT", "RECORDED")?;
                for record in &history {
                    writeln!(
                        out,
                        "{:>6}  {:<8} {:>10}  {}",
                        record.id,
                        record.kind,
                        record.amount,
                        record.recorded_at.format("%Y-%m-%d %H:%M:%S")
                    )?;
                }
            }
        }

        Request::Charge { user_id, amount } => {
            let amount = parse_points(&amount).context("Invalid amount format. Use e.g. '50'")?;
            let balance = ledger.charge(user_id, amount).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string(&balance)?)?;
            } else {
                writeln!(
                    out,
                    "Charged {} points to user {}: balance {}",
                    amount, user_id, balance.balance
                )?;
            }
        }

        Request::Use { user_id, amount } => {
            let amount = parse_points(&amount).context("Invalid amount format. Use e.g. '50'")?;
            let balance = ledger.use_points(user_id, amount).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string(&balance)?)?;
            } else {
                writeln!(
                    out,
                    "Used {} points from user {}: balance {}",
                    amount, user_id, balance.balance
                )?;
            }
        }

        Request::Open { user_id } => {
            let balance = ledger.open_account(user_id).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string(&balance)?)?;
            } else {
                writeln!(out, "User {} open: balance {}", user_id, balance.balance)?;
            }
        }

        Request::Check { user_id } => {
            let report = ledger.verify(user_id).await?;
            if json {
                writeln!(out, "{}", serde_json::to_string(&report)?)?;
            } else {
                write_report(out, &report)?;
            }
        }

        Request::Export { user_id, format } => {
            let exporter = Exporter::new(ledger);
            match format.as_str() {
                "csv" => {
                    exporter.export_history_csv(user_id, &mut *out).await?;
                }
                "json" => {
                    exporter.export_user_json(user_id, &mut *out).await?;
                    writeln!(out)?;
                }
                other => anyhow::bail!("Unknown export format '{}' (use csv or json)", other),
            }
        }
    }
    Ok(())
}

/// Charge `initial` points to `user`, then run `tasks` concurrent uses of
/// `amount` each and verify the user afterwards.
pub async fn run_stress(
    ledger: Arc<PointLedger>,
    user: UserId,
    initial: Points,
    tasks: usize,
    amount: Points,
) -> Result<StressOutcome> {
    ledger.open_account(user).await?;
    if initial > 0 {
        ledger.charge(user, initial).await?;
    }

    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.use_points(user, amount).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.context("Stress task panicked")? {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientBalance { .. }) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
    }

    let final_balance = ledger.get_balance(user).await?.balance;
    let report = ledger.verify(user).await?;

    Ok(StressOutcome {
        succeeded,
        rejected,
        final_balance,
        report,
    })
}

fn print_stress<W: Write>(
    out: &mut W,
    user: UserId,
    outcome: &StressOutcome,
    json: bool,
) -> Result<()> {
    if json {
        writeln!(
            out,
            "{}",
            json!({
                "user_id": user,
                "succeeded": outcome.succeeded,
                "rejected": outcome.rejected,
                "final_balance": outcome.final_balance,
                "report": outcome.report,
            })
        )?;
    } else {
        writeln!(
            out,
            "{} use(s) succeeded, {} rejected, final balance {}",
            outcome.succeeded, outcome.rejected, outcome.final_balance
        )?;
        write_report(out, &outcome.report)?;
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &IntegrityReport) -> Result<()> {
    let stored = report
        .stored_balance
        .map(|b| b.to_string())
        .unwrap_or_else(|| "none".to_string());
    writeln!(
        out,
        "User {}: stored {}, replayed {} ({} records, +{} / -{}) {}",
        report.user_id,
        stored,
        report.replayed_balance,
        report.record_count,
        report.total_charged,
        report.total_used,
        if report.is_consistent() {
            "OK"
        } else {
            "INCONSISTENT"
        }
    )?;
    for issue in &report.errors {
        writeln!(out, "  - {}", issue)?;
    }
    Ok(())
}

fn write_error<W: Write>(out: &mut W, line: usize, err: &anyhow::Error, json: bool) -> Result<()> {
    let kind = err
        .downcast_ref::<LedgerError>()
        .map(|e| e.kind())
        .unwrap_or("bad_request");
    if json {
        writeln!(
            out,
            "{}",
            json!({ "line": line, "error": kind, "message": format!("{:#}", err) })
        )?;
    } else {
        writeln!(out, "error (line {}): {:#}", line, err)?;
    }
    Ok(())
}
