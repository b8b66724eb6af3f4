//! Replay device telemetry through the fall detector.
//!
//! Usage:
//!   fallwatch --input samples.jsonl --config thresholds.json
//!   tail -f telemetry.jsonl | fallwatch --redis-url redis://127.0.0.1/

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fall_cli::{load_config, run};
use fall_redis::RedisNotifier;
use fall_registry::{BackgroundNotifier, FallMonitor, LogNotifier};
use log::{info, warn};

/// Feed JSON-lines telemetry to per-device fall detectors.
#[derive(Parser)]
#[command(name = "fallwatch", about = "Replay device telemetry through the fall detector")]
struct Cli {
    /// JSON-lines input file. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// JSON registry config (thresholds, idle TTL).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store and enqueue detected falls in this Redis instance.
    #[arg(long)]
    redis_url: Option<String>,

    /// Expiry of stored fall alerts, in seconds.
    #[arg(long, default_value_t = 86_400)]
    alert_ttl: usize,

    /// Evict idle detectors every N lines (needs `idleTtlMs` in the config).
    #[arg(long)]
    sweep_every: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    if cli.sweep_every.is_some() && config.idle_ttl_ms.is_none() {
        warn!("--sweep-every has no effect without idleTtlMs in the config");
    }

    let mut monitor = FallMonitor::new(config)?;
    monitor.add_notifier(Box::new(LogNotifier));
    if let Some(url) = &cli.redis_url {
        let redis = RedisNotifier::open(url, cli.alert_ttl)?;
        monitor.add_notifier(Box::new(BackgroundNotifier::spawn(Box::new(redis))?));
        info!("publishing fall alerts to {url}");
    }

    let stdout = io::stdout().lock();
    let stats = match &cli.input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            run(&monitor, BufReader::new(file), stdout, cli.sweep_every)?
        }
        None => run(&monitor, io::stdin().lock(), stdout, cli.sweep_every)?,
    };

    info!(
        "processed {} line(s): {} rejected, {} fall(s), {} detector(s) evicted",
        stats.lines, stats.rejected, stats.falls, stats.evicted
    );
    Ok(())
}
