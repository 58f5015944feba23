mod logging;

use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

use autoreply_engine::{
    DeliverySink, Dispatcher, EngineConfig, RandomSource, RuleTable, SeededRandom,
    SuppressionObserver, ThreadRandom,
};

use crate::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(
    name = "autoreply-bot",
    version,
    about = "Rule-driven auto-reply responder for bounded chat sessions"
)]
struct Args {
    /// Path to YAML config with pacing settings and the rule catalogue
    #[arg(long, env = "AUTOREPLY_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Start with the responder enabled instead of waiting for /start
    #[arg(long, env = "AUTOREPLY_ENABLED")]
    enabled: bool,

    /// Seed the RNG for reproducible reply selection
    #[arg(long, env = "AUTOREPLY_SEED")]
    seed: Option<u64>,
}

/// Delivery collaborator for the console host: replies go to stdout.
struct ConsoleSink;

#[async_trait]
impl DeliverySink for ConsoleSink {
    async fn deliver(&self, sender_id: &str, text: &str) -> Result<()> {
        println!("[reply -> {sender_id}] {text}");
        Ok(())
    }
}

/// Signal collaborator: suppressed matches surface as loud log lines.
struct LogObserver;

#[async_trait]
impl SuppressionObserver for LogObserver {
    async fn on_suppressed(&self, sender_id: &str, category: &str, text: &str) {
        warn!(sender = %sender_id, category = %category, text = %text, "Signal raised, no reply sent");
        println!("[signal:{category}] {sender_id}: {text}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Load .env if present so clap can pick up env vars.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = load_config(&args.config)?;
    config.settings.validate().context("validating settings")?;
    let table = RuleTable::compile(config.rules).context("compiling rule catalogue")?;
    info!(rules = table.len(), "Rule catalogue loaded");

    let random: Arc<dyn RandomSource> = match args.seed {
        Some(seed) => {
            info!(seed, "Reply selection seeded");
            Arc::new(SeededRandom::new(seed))
        }
        None => Arc::new(ThreadRandom),
    };

    let dispatcher = Dispatcher::new(
        table,
        &config.settings,
        Arc::new(ConsoleSink),
        Arc::new(LogObserver),
        random,
    );
    if args.enabled {
        dispatcher.set_enabled(true).await;
    }
    print_banner(dispatcher.is_enabled());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                handle_line(&dispatcher, line.trim()).await;
            }
        }
    }
    Ok(())
}

async fn handle_line(dispatcher: &Dispatcher, line: &str) {
    if line.is_empty() {
        return;
    }
    if let Some(cmd) = line.strip_prefix('/') {
        run_admin_command(dispatcher, cmd).await;
        return;
    }
    match parse_inbound(line) {
        Some((sender, text)) => dispatcher.handle(sender, text).await,
        None => warn!(line = %line, "Unrecognized input, expected `sender -> text`"),
    }
}

async fn run_admin_command(dispatcher: &Dispatcher, cmd: &str) {
    let mut parts = cmd.split_whitespace();
    match parts.next() {
        Some("start") => {
            dispatcher.set_enabled(true).await;
            println!("[autoreply] enabled");
        }
        Some("stop") => {
            dispatcher.set_enabled(false).await;
            println!("[autoreply] disabled, sessions cleared");
        }
        Some("status") => {
            let state = if dispatcher.is_enabled() {
                "enabled"
            } else {
                "disabled"
            };
            println!(
                "[autoreply] {state}, {} active session(s)",
                dispatcher.active_sessions().await
            );
        }
        Some("clear") => {
            if let Some(sender) = parts.next() {
                dispatcher.clear_one(sender).await;
                println!("[autoreply] cleared session for {sender}");
            } else {
                dispatcher.clear_all().await;
                println!("[autoreply] cleared all sessions");
            }
        }
        Some(other) => {
            println!("[autoreply] unknown command `/{other}` (try /start /stop /status /clear)");
        }
        None => {}
    }
}

/// Inbound lines look like `sender -> text` (or `sender: text`). Reducing a
/// real transport's raw framing to this shape is the host's job; for the
/// console host the line format is all there is.
fn parse_inbound(line: &str) -> Option<(&str, &str)> {
    let (sender, text) = line.split_once(" -> ").or_else(|| line.split_once(": "))?;
    let sender = sender.trim();
    let text = text.trim();
    if sender.is_empty() || text.is_empty() || sender.contains(char::is_whitespace) {
        return None;
    }
    Some((sender, text))
}

fn load_config(path: &PathBuf) -> Result<EngineConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "config file not found at {}. Create one or set --config",
            path.display()
        ));
    }
    let yaml = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {}", path.display()))?;
    let cfg: EngineConfig = serde_yaml::from_str(&yaml).context("parsing YAML config")?;
    Ok(cfg)
}

fn print_banner(enabled: bool) {
    if enabled {
        eprintln!("== autoreply: ENABLED. Feed `sender -> text` lines, /stop to pause ==");
    } else {
        eprintln!("== autoreply: disabled. /start to begin responding ==");
    }
}
