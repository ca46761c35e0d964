//! iotivp-verify - run a batch of gateway items through the verifier
//!
//! Reads a JSON array of items (stdin by default), writes the forwarded
//! items as a JSON array to stdout. Logs go to stderr, filtered by `RUST_LOG`.
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use iotivp_core::{Gateway, GatewayConfig, Item, LayoutRegistry, MemoryReplayState};

#[derive(Debug, Parser)]
#[command(name = "iotivp-verify", version, about = "Decode and verify IoTIVP packets")]
struct Cli {
    /// Gateway configuration (TOML); IOTIVP_SHARED_SECRET overrides sharedSecret
    #[arg(long, short)]
    config: PathBuf,

    /// JSON array of items; stdin when omitted
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Replay snapshot restored at start and saved at exit
    #[arg(long)]
    replay_state: Option<PathBuf>,

    /// Verification time in Unix seconds instead of the system clock
    #[arg(long)]
    now: Option<u64>,
}

fn read_items(input: Option<&PathBuf>) -> anyhow::Result<Vec<Item>> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("reading stdin")?;
            text
        }
    };

    let values: Vec<Value> = serde_json::from_str(&text).context("input must be a JSON array")?;
    let mut items = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match value {
            Value::Object(item) => items.push(item),
            other => bail!("item {} is not a JSON object: {}", index, other),
        }
    }
    Ok(items)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let replay = match &cli.replay_state {
        Some(path) if path.exists() => {
            let state = MemoryReplayState::load_from(path)
                .with_context(|| format!("restoring replay state from {}", path.display()))?;
            info!(path = %path.display(), tracked = state.snapshot().entries.len(), "Replay state restored");
            Arc::new(state)
        }
        _ => Arc::new(MemoryReplayState::new()),
    };

    let gateway = Gateway::new(&config, LayoutRegistry::default(), replay.clone())?;

    let items = read_items(cli.input.as_ref())?;
    let outcome = match cli.now {
        Some(now) => gateway.process_batch_at(items, now),
        None => gateway.process_batch(items),
    };

    println!("{}", serde_json::to_string_pretty(&outcome.items)?);

    if let Some(path) = &cli.replay_state {
        replay
            .save_to(path)
            .with_context(|| format!("saving replay state to {}", path.display()))?;
    }

    Ok(())
}
