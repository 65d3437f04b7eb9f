//! BusBridge - Headless Runner
//!
//! Starts the configured blocks on the real bus, feeds newline-delimited JSON
//! from stdin to the outbound block and prints every block output as one JSON
//! line on stdout. Logs go to stderr (and optionally to daily log files).
//!
//! ```text
//! busbridge [--config <path>]
//! ```

use anyhow::{bail, Context};
use busbridge_rs::{
    blocks::{BlockHandle, BlockOutput, CallTarget, FromBus, ToBus},
    bus::{BusConnection, ZbusConnector},
    config::{default_config_path, BridgeConfig, LoggingSettings},
};
use crossbeam_channel::{bounded, never, select, Receiver};
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file prefix inside `logging.log_dir`
const LOG_FILE: &str = "busbridge.log";

fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Keep the guard alive for the entire program lifetime
    let _log_guard = init_logging(&config.logging)?;

    tracing::info!("Starting BusBridge");
    config
        .validate()
        .context("Configuration validation failed")?;

    let inbound = config.inbound.enabled.then(|| {
        let block = FromBus::spawn(connection(&config));
        block.set_rule(FromBus::rule(&config.inbound.address, &config.inbound.filter));
        block
    });

    let outbound = config.outbound.enabled.then(|| {
        let block = ToBus::spawn(connection(&config));
        let target = CallTarget {
            destination: config.outbound.destination.clone(),
            object_path: config.outbound.object_path.clone(),
            method: config.outbound.method.clone(),
            signature: config.outbound.signature.clone(),
        };
        block.set_rule(ToBus::rule(&config.outbound.address, &target));
        block
    });

    if inbound.is_none() && outbound.is_none() {
        tracing::warn!("No blocks enabled, nothing to do");
    }

    run(inbound, outbound)?;

    tracing::info!("Shutting down...");
    Ok(())
}

/// `--config <path>` or the default location
fn load_config() -> anyhow::Result<BridgeConfig> {
    let mut args = std::env::args().skip(1);
    let mut path: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let value = args.next().context("--config needs a path")?;
                path = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument {:?}", other),
        }
    }

    match path {
        Some(path) => BridgeConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => Ok(default_config_path()
            .map(BridgeConfig::load_or_default)
            .unwrap_or_default()),
    }
}

fn init_logging(settings: &LoggingSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    // stdout carries block outputs
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(log_dir) = &settings.log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    tracing::info!("File logging enabled to {:?}", log_dir.join(LOG_FILE));
    Ok(Some(guard))
}

fn connection(config: &BridgeConfig) -> BusConnection {
    BusConnection::with_queue(
        Box::new(ZbusConnector::new()),
        config.bus.signal_queue_capacity,
        config.bus.overflow_policy,
    )
}

/// Read lines from stdin on a helper thread; the channel closes on EOF
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = bounded(64);
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!("Failed to spawn stdin reader: {}", e);
    }
    rx
}

fn outputs_of(block: &Option<BlockHandle>) -> Receiver<BlockOutput> {
    block
        .as_ref()
        .map(|b| b.outputs().clone())
        .unwrap_or_else(never)
}

fn print_output(out: &mut impl Write, block: &str, output: BlockOutput) -> std::io::Result<()> {
    let line = match output {
        BlockOutput::Message(message) => json!({ "block": block, "message": message }),
        BlockOutput::Error(error) => json!({ "block": block, "error": error }),
    };
    writeln!(out, "{}", line)?;
    out.flush()
}

fn forward_line(line: &str, outbound: &Option<BlockHandle>) -> anyhow::Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let Some(block) = outbound else {
        tracing::warn!("Outbound block disabled, ignoring input");
        return Ok(());
    };
    match serde_json::from_str(line) {
        Ok(message) => block.send(message).context("Outbound block rejected input")?,
        Err(e) => tracing::warn!("Ignoring malformed input line: {}", e),
    }
    Ok(())
}

fn run(mut inbound: Option<BlockHandle>, mut outbound: Option<BlockHandle>) -> anyhow::Result<()> {
    let lines = stdin_lines();
    let inbound_rx = outputs_of(&inbound);
    let outbound_rx = outputs_of(&outbound);
    let mut stdout = std::io::stdout().lock();

    loop {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => forward_line(&line, &outbound)?,
                Err(_) => {
                    tracing::debug!("End of input");
                    break;
                }
            },
            recv(inbound_rx) -> output => match output {
                Ok(output) => print_output(&mut stdout, "from-bus", output)?,
                Err(_) => bail!("from-bus block stopped unexpectedly"),
            },
            recv(outbound_rx) -> output => match output {
                Ok(output) => print_output(&mut stdout, "to-bus", output)?,
                Err(_) => bail!("to-bus block stopped unexpectedly"),
            },
        }
    }

    for block in [&mut inbound, &mut outbound].into_iter().flatten() {
        block.shutdown();
        for output in block.drain() {
            print_output(&mut stdout, block.name(), output)?;
        }
    }
    Ok(())
}
