//! Chat Autopilot - Entry Point
//!
//! Modes:
//! - Default: monitor chat lines (`username: message`) from stdin
//! - --once: read stdin to the end, run one cycle, print it as JSON
//! - --report: print the performance report
//! - --feedback <timestamp> <rating> [comment]: rate a past action

use anyhow::{bail, Context};
use chat_autopilot::{
    AnalysisStrategy, ChatMessage, ClaudeStrategy, Config, DryRunCapability, FeedbackSource,
    FeedbackStore, HeuristicStrategy, Monitor,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let once_mode = args.iter().any(|a| a == "--once");
    let report_mode = args.iter().any(|a| a == "--report");
    let json_logs = args.iter().any(|a| a == "--json-logs");
    let feedback_args = args
        .iter()
        .position(|a| a == "--feedback")
        .map(|i| args[i + 1..].to_vec());

    if help_mode {
        println!("Chat Autopilot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: chat-autopilot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --once                              Run one cycle over stdin and print it");
        println!("  --report                            Print the performance report");
        println!("  --feedback <timestamp> <rating> [comment]");
        println!("                                      Rate the action taken at <timestamp> (RFC 3339)");
        println!("  --json-logs                         Log as JSON");
        println!("  --help, -h                          Show this help");
        println!();
        println!("Default: monitor `username: message` lines from stdin (dry run)");
        println!();
        println!("Environment variables:");
        println!("  AUTOPILOT_ENABLED          Enable autonomous cycles (default: true)");
        println!("  AUTOPILOT_INTERVAL_SECS    Seconds between cycles (default: 30)");
        println!("  AUTOPILOT_BUFFER_CAPACITY  Chat messages kept (default: 100)");
        println!("  AUTOPILOT_FEEDBACK_DIR     Action/feedback history directory");
        println!("  AUTOPILOT_RETENTION_DAYS   Days of history kept (default: 30)");
        println!("  AUTOPILOT_RULES            Path to a TOML rules file");
        println!("  ANTHROPIC_API_KEY          Use Claude for analysis instead of heuristics");
        return Ok(());
    }

    // Setup logging; stdout is reserved for command output
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    let store = Arc::new(FeedbackStore::open(&config.feedback_dir, config.retention_days)?);

    if let Some(rest) = feedback_args {
        return record_feedback(&store, &rest);
    }

    if report_mode {
        let (report, path) = store.write_report(Utc::now())?;
        println!("{}", report);
        if let Some(path) = path {
            info!("Report saved to {}", path.display());
        }
        return Ok(());
    }

    let strategy: Arc<dyn AnalysisStrategy> = match &config.anthropic_api_key {
        Some(key) => Arc::new(ClaudeStrategy::new(key)?),
        None => {
            info!("ANTHROPIC_API_KEY not set, using heuristic analysis");
            Arc::new(HeuristicStrategy::new())
        }
    };
    let dry_run = Arc::new(DryRunCapability::new());
    let monitor = Arc::new(Monitor::new(config, strategy, dry_run.clone(), dry_run, store)?);

    info!("Chat Autopilot v{}", env!("CARGO_PKG_VERSION"));

    if once_mode {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut batch = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if let Some(message) = ChatMessage::parse_line(&line) {
                batch.push(message);
            }
        }
        monitor.ingest(batch);

        let report = monitor.force_analysis().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (ingest, _drain) = monitor.ingest_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match ChatMessage::parse_line(&line) {
                    Some(message) => {
                        if ingest.send_one(message).is_err() {
                            break;
                        }
                    }
                    None => warn!("Ignoring malformed chat line: {}", line),
                },
                Ok(None) => {
                    info!("stdin closed; monitoring continues until Ctrl-C");
                    break;
                }
                Err(e) => {
                    warn!("stdin read error: {}", e);
                    break;
                }
            }
        }
    });

    if !monitor.start() {
        bail!("Monitor is disabled (AUTOPILOT_ENABLED)");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    if let Some(report) = monitor.stop() {
        println!("{}", report);
    }
    Ok(())
}

fn record_feedback(store: &FeedbackStore, args: &[String]) -> anyhow::Result<()> {
    let (Some(timestamp), Some(rating)) = (args.first(), args.get(1)) else {
        bail!("Usage: chat-autopilot --feedback <timestamp> <rating> [comment]");
    };

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(timestamp)
        .with_context(|| format!("Invalid timestamp '{}'", timestamp))?
        .with_timezone(&Utc);
    let rating: u8 = rating
        .parse()
        .with_context(|| format!("Invalid rating '{}'", rating))?;
    let comment = (args.len() > 2).then(|| args[2..].join(" "));

    let entry = store.add_feedback(timestamp, rating, comment, FeedbackSource::Manual)?;
    println!(
        "Recorded {}/5 for action {} at {}",
        entry.rating, entry.action_id, entry.action_timestamp
    );
    Ok(())
}
