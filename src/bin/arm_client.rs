//! Arm client - drives a robot arm widget from the terminal.
//!
//! Connects to the robot's WebSocket endpoint, possesses it, and reads
//! operator commands from stdin, one per line:
//!
//!   down X Y     press the pointer at (X, Y)
//!   move X Y     drag the pointer
//!   up X Y       release the pointer
//!   retract      play the retract animation
//!   extend       play the extend animation
//!   grab         send the grab event
//!
//! Usage:
//!   arm-client [options]
//!
//! Options:
//!   --config <file>     JSON config file
//!   --url <url>         Robot WebSocket URL (default: ws://192.168.0.1/ws)
//!   --uuid <id>         Grid widget id of the arm (default: 0)
//!   --retry-ms <ms>     Retry ticker period (default: 100)
//!   --attempts <n>      Attempt budget for reliable commands (default: 30)

use anyhow::{Context, Result};
use gridarm::{run_client, ArmInput, ClientConfig, TracingView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Args {
    config: Option<String>,
    url: Option<String>,
    uuid: Option<u32>,
    retry_ms: Option<u64>,
    attempts: Option<u32>,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        config: None,
        url: None,
        uuid: None,
        retry_ms: None,
        attempts: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                result.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--url" if i + 1 < args.len() => {
                result.url = Some(args[i + 1].clone());
                i += 2;
            }
            "--uuid" if i + 1 < args.len() => {
                result.uuid = Some(args[i + 1].parse().context("invalid --uuid")?);
                i += 2;
            }
            "--retry-ms" if i + 1 < args.len() => {
                result.retry_ms = Some(args[i + 1].parse().context("invalid --retry-ms")?);
                i += 2;
            }
            "--attempts" if i + 1 < args.len() => {
                result.attempts = Some(args[i + 1].parse().context("invalid --attempts")?);
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    Ok(result)
}

fn print_usage() {
    println!("Arm Client - control a robot arm widget over WebSocket");
    println!();
    println!("Usage: arm-client [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <file>     JSON config file");
    println!("  --url <url>         Robot WebSocket URL (default: ws://192.168.0.1/ws)");
    println!("  --uuid <id>         Grid widget id of the arm (default: 0)");
    println!("  --retry-ms <ms>     Retry ticker period (default: 100)");
    println!("  --attempts <n>      Attempt budget for reliable commands (default: 30)");
    println!();
    println!("Commands (stdin): down X Y | move X Y | up X Y | retract | extend | grab");
    println!();
    println!("Examples:");
    println!("  arm-client --url ws://127.0.0.1:9000/ws             # local fake server");
    println!("  arm-client --config arm.json --uuid 4");
}

fn build_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match args.config {
        Some(ref path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path))?,
        None => ClientConfig::default(),
    };
    if let Some(ref url) = args.url {
        config.url = url.clone();
    }
    if let Some(uuid) = args.uuid {
        config.widget_uuid = uuid;
    }
    if let Some(ms) = args.retry_ms {
        config.retry_interval_ms = ms;
    }
    if let Some(n) = args.attempts {
        config.retry_attempts = n;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gridarm=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let args = parse_args()?;
    let config = build_config(&args)?;

    println!();
    println!("========================================");
    println!("Arm Client");
    println!("========================================");
    println!("Robot:     {}", config.url);
    println!("Widget:    {}", config.widget_uuid);
    println!("Retry:     {} ms x {}", config.retry_interval_ms, config.retry_attempts);
    println!("Bones:     {}", config.arm.bones.len());
    println!("========================================");
    println!();

    let cancel = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::channel(64);

    // stdin -> operator input
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.parse::<ArmInput>() {
                        Ok(input) => {
                            if input_tx.send(input).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Bad command {:?}: {}", line, e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("stdin error: {}", e);
                    break;
                }
            }
        }
    });

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    run_client(config, TracingView, input_rx, cancel).await
}
