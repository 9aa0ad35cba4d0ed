use anyhow::Result;
use clap::{Parser, Subcommand};
use expense_core::clock::Clock;
use expense_core::config;
use expense_core::ledger::{NewReceipt, NewTransaction};
use expense_core::warming;
use expense_core::Engine;
use expense_cli::{output, parse};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    let engine = Engine::open(cfg).await?;
    run(&engine, &cli.user, cli.command).await
}

#[derive(Parser)]
#[command(name = "expense")]
#[command(about = "Receipt matching and GL/department categorization", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Owner of every record read or written
    #[arg(short, long, default_value = "default", env = "EXPENSE_USER")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a card/bank transaction
    AddTransaction {
        /// Posting date (YYYY-MM-DD or MM/DD/YYYY)
        #[arg(long)]
        date: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        json: bool,
    },
    /// Record an extracted receipt
    AddReceipt {
        #[arg(long)]
        vendor: String,
        #[arg(long)]
        date: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long, default_value = "USD")]
        currency: String,
        /// Extraction confidence applied to vendor, date and amount
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        #[arg(long)]
        json: bool,
    },
    /// Suggest a GL code and department for a description
    Categorize {
        description: String,
        /// Also ask the AI tier when a cheaper tier already answered
        #[arg(long)]
        ai_assist: bool,
        #[arg(long)]
        json: bool,
    },
    /// Confirm a categorization and teach it to every tier
    ConfirmCategory {
        description: String,
        #[arg(long)]
        gl_code: String,
        #[arg(long)]
        department: String,
        /// Also store the codes on this transaction
        #[arg(long)]
        transaction: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Score unmatched receipts against unmatched transactions
    AutoMatch {
        /// Comma-separated receipt ids; all unmatched receipts if omitted
        #[arg(long)]
        receipts: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Accept a proposed match
    ConfirmMatch {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Decline a proposed match
    RejectMatch {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Link a receipt and transaction directly
    ManualMatch {
        #[arg(long)]
        receipt: i64,
        #[arg(long)]
        transaction: i64,
        #[arg(long)]
        json: bool,
    },
    /// Remove a match and free both sides
    Unmatch {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// List match proposals
    Proposals {
        /// proposed|confirmed|rejected
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List receipts and transactions that are not matched yet
    Unmatched {
        #[arg(long)]
        json: bool,
    },
    /// Matching statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Categorization tier usage
    Usage {
        #[arg(long)]
        json: bool,
    },
    /// Run the vendor alias confidence decay once
    Decay {
        /// Limit to the selected user
        #[arg(long)]
        only_user: bool,
        #[arg(long)]
        json: bool,
    },
    /// Delete expired provisional embeddings once
    Cleanup {
        #[arg(long)]
        only_user: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run the maintenance jobs on their schedule until interrupted
    Schedule,
    /// Seed the categorization tiers from a historical expense CSV
    Warm {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

async fn run(engine: &Engine, user: &str, command: Commands) -> Result<()> {
    match command {
        Commands::AddTransaction {
            date,
            amount,
            description,
            json,
        } => {
            let txn = engine
                .ledger
                .add_transaction(
                    user,
                    NewTransaction {
                        posted_on: parse::date(&date)?,
                        amount: parse::amount(&amount)?,
                        description,
                    },
                    engine.clock.now(),
                )
                .await?;
            output::emit(json, &txn, output::transaction)
        }
        Commands::AddReceipt {
            vendor,
            date,
            amount,
            currency,
            confidence,
            json,
        } => {
            let confidence = confidence.clamp(0.0, 1.0);
            let receipt = engine
                .ledger
                .add_receipt(
                    user,
                    NewReceipt {
                        vendor,
                        receipt_date: parse::date(&date)?,
                        amount: parse::amount(&amount)?,
                        currency,
                        vendor_confidence: confidence,
                        date_confidence: confidence,
                        amount_confidence: confidence,
                    },
                    engine.clock.now(),
                )
                .await?;
            output::emit(json, &receipt, output::receipt)
        }
        Commands::Categorize {
            description,
            ai_assist,
            json,
        } => {
            let outcome = engine
                .router
                .categorize(user, &description, ai_assist)
                .await?;
            output::emit(json, &outcome, output::categorization)
        }
        Commands::ConfirmCategory {
            description,
            gl_code,
            department,
            transaction,
            json,
        } => {
            let report = engine
                .router
                .confirm_categorization(user, &description, &gl_code, &department)
                .await?;
            if let Some(id) = transaction {
                engine
                    .ledger
                    .set_categorization(user, id, gl_code.trim(), department.trim())
                    .await?;
            }
            output::emit(json, &report, output::write_back)
        }
        Commands::AutoMatch { receipts, json } => {
            let ids = receipts.as_deref().map(parse::ids).transpose()?;
            let summary = engine.matcher.auto_match(user, ids.as_deref()).await?;
            output::emit(json, &summary, output::auto_match)
        }
        Commands::ConfirmMatch { id, json } => {
            let p = engine.matcher.confirm(user, id).await?;
            output::emit(json, &p, output::proposal)
        }
        Commands::RejectMatch { id, json } => {
            let p = engine.matcher.reject(user, id).await?;
            output::emit(json, &p, output::proposal)
        }
        Commands::ManualMatch {
            receipt,
            transaction,
            json,
        } => {
            let p = engine.matcher.manual_match(user, receipt, transaction).await?;
            output::emit(json, &p, output::proposal)
        }
        Commands::Unmatch { id, json } => {
            let p = engine.matcher.unmatch(user, id).await?;
            output::emit(json, &p, |p| format!("removed {}", output::proposal(p)))
        }
        Commands::Proposals { status, json } => {
            let status = status.as_deref().map(parse::status).transpose()?;
            let list = engine.matcher.list_proposals(user, status).await?;
            output::emit(json, &list, |l| output::proposals(l))
        }
        Commands::Unmatched { json } => {
            let receipts = engine.ledger.unmatched_receipts(user).await?;
            let transactions = engine.ledger.unmatched_transactions(user).await?;
            let value = serde_json::json!({
                "receipts": receipts,
                "transactions": transactions,
            });
            output::emit(json, &value, |_| {
                receipts
                    .iter()
                    .map(output::receipt)
                    .chain(transactions.iter().map(output::transaction))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Commands::Stats { json } => {
            let stats = engine.matcher.statistics(user).await?;
            output::emit(json, &stats, output::statistics)
        }
        Commands::Usage { json } => {
            let summary = engine.usage.summary(user).await?;
            output::emit(json, &summary, output::usage)
        }
        Commands::Decay { only_user, json } => {
            let scope = only_user.then_some(user);
            let report = engine.jobs.run_decay(scope, &CancellationToken::new()).await;
            output::emit(json, &report, output::job)?;
            if report.failed() {
                anyhow::bail!("decay run failed");
            }
            Ok(())
        }
        Commands::Cleanup { only_user, json } => {
            let scope = only_user.then_some(user);
            let report = engine.jobs.run_cleanup(scope, &CancellationToken::new()).await;
            output::emit(json, &report, output::job)?;
            if report.failed() {
                anyhow::bail!("cleanup run failed");
            }
            Ok(())
        }
        Commands::Schedule => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; stopping after the current batch");
                }
                on_signal.cancel();
            });
            engine.jobs.run_scheduled(cancel).await;
            Ok(())
        }
        Commands::Warm { path, json } => {
            let report = warming::warm_from_path(&engine.router, user, &path).await?;
            output::emit(json, &report, output::warming)
        }
    }
}
