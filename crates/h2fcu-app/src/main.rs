//! `h2fcu` command line
//!
//! `h2fcu bridge` serves a simulated FCU to WebSocket observers. `h2fcu monitor` connects
//! to a bridge, keeps the chart history and fault log, optionally logs to
//! CSV, and accepts operator commands on stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use h2fcu_core::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Log filter variable checked before `RUST_LOG`
const LOG_ENV: &str = "H2FCU_LOG";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("H2FCU_BUILD_ID"), ")"),
    about = "H2 FCU telemetry bridge",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", env = "H2FCU_CONFIG", default_value = "h2fcu.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve a simulated FCU to observers
    Bridge {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Observer updates per second
        #[arg(long)]
        rate: Option<u32>,
        /// Fixed simulator seed
        #[arg(long)]
        seed: Option<u64>,
        /// Observer protocol: websocket or lines
        #[arg(long)]
        protocol: Option<ObserverProtocol>,
    },
    /// Connect to a bridge and follow its telemetry
    Monitor {
        /// Bridge address as host:port or ws:// URL
        #[arg(long)]
        address: Option<String>,
        /// Bridge protocol: websocket or lines
        #[arg(long)]
        protocol: Option<ObserverProtocol>,
        /// Start CSV logging immediately
        #[arg(long)]
        log: bool,
        /// Directory for CSV logs
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,
        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {} directive ({}); defaulting to info", LOG_ENV, err);
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = MonitorConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Bridge {
            host,
            port,
            rate,
            seed,
            protocol,
        } => {
            if let Some(host) = host {
                config.bridge.host = host;
            }
            if let Some(port) = port {
                config.bridge.port = port;
            }
            if let Some(rate) = rate {
                config.bridge.broadcast_rate_hz = rate;
            }
            if let Some(protocol) = protocol {
                config.bridge.protocol = protocol;
            }
            run_bridge(config, seed).await
        }
        Commands::Monitor {
            address,
            protocol,
            log,
            log_dir,
            json,
        } => {
            if let Some(address) = address {
                config.session.address = address;
            }
            if let Some(protocol) = protocol {
                config.session.protocol = protocol;
            }
            if let Some(dir) = log_dir {
                config.datalog.directory = Some(dir.to_string_lossy().into_owned());
            }
            run_monitor(config, log, json).await
        }
    }
}

async fn run_bridge(config: MonitorConfig, seed: Option<u64>) -> Result<()> {
    let simulator = seed.map(DemoSimulator::with_seed).unwrap_or_default();
    let bridge = BridgeServer::new(config.bridge.clone())
        .spawn(VirtualBus::new(simulator))
        .await?;
    info!("H2 FCU bridge {} ready on {}", h2fcu_core::VERSION, bridge.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    bridge.shutdown().await?;
    Ok(())
}

async fn run_monitor(config: MonitorConfig, log: bool, json: bool) -> Result<()> {
    let session = SessionManager::spawn(
        transport_for(config.session.protocol),
        config.session.clone(),
    );
    let destination = Arc::new(FileDestination::from_config(&config.datalog));
    let monitor = MonitorPipeline::spawn(&session, MonitorStore::new(&config, destination));

    if let Err(e) = session.connect(config.session.address.clone()).await {
        warn!("Initial connection failed, retrying in background: {}", e);
    }
    if log {
        monitor.toggle_logging().await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut report = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = report.tick() => print_snapshot(&monitor, json).await?,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if let Err(e) = operator_command(&monitor, line.trim()).await {
                        warn!("{}", e);
                    }
                }
                // Keep reporting until interrupted
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    monitor.shutdown().await;
    session.disconnect().await;
    Ok(())
}

async fn print_snapshot(monitor: &MonitorHandle, json: bool) -> Result<()> {
    let snapshot = monitor.snapshot().await?;
    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
        return Ok(());
    }

    let state = &snapshot.state;
    println!(
        "{} {:?} | stack {:.2} V {:.1} A {:.1} °C | DC/DC {:.2} V {:.1} A {:.1}% | faults {}{}",
        if snapshot.connected { "online " } else { "offline" },
        state.status.state,
        state.power.stack_voltage,
        state.power.stack_current,
        state.sensors.stack_temp,
        state.power.dcf_out_voltage,
        state.power.dcf_out_current,
        state.power.dcf_efficiency,
        snapshot.fault_log.len(),
        if snapshot.logging { " | logging" } else { "" },
    );
    if let Some(diagnosis) = &snapshot.diagnosis {
        println!("  diagnosis: {} ({:.1}%)", diagnosis.label, diagnosis.confidence);
    }
    Ok(())
}

async fn operator_command(monitor: &MonitorHandle, line: &str) -> Result<()> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(());
    };

    let command = match verb {
        "start" => Some(Command::Start),
        "shutdown" => Some(Command::Shutdown),
        "estop" => Some(Command::EmergencyStop),
        "reset" => Some(Command::Reset),
        _ => None,
    };
    if let Some(command) = command {
        monitor.trigger_command(command).await?;
        info!("Sent {:?}", command);
        return Ok(());
    }

    match verb {
        "auto" | "manual" => {
            let mode = if verb == "auto" {
                ControlMode::Auto
            } else {
                ControlMode::Manual
            };
            monitor
                .update_control(ControlPatch {
                    mode: Some(mode),
                    ..ControlPatch::default()
                })
                .await?;
        }
        "fan" => {
            let speed: f64 = words
                .next()
                .context("usage: fan <percent>")?
                .parse()
                .context("fan speed must be a number")?;
            let control = monitor
                .update_control(ControlPatch {
                    fan1_target_speed: Some(speed),
                    ..ControlPatch::default()
                })
                .await?;
            info!("Fan target {:.0}%", control.fan1_target_speed);
        }
        "log" => {
            let logging = monitor.toggle_logging().await?;
            info!("Logging {}", if logging { "on" } else { "off" });
        }
        "feedback" => {
            let label = words.next().context("usage: feedback <label>")?;
            let label: DiagnosisLabel = serde_json::from_value(serde_json::Value::from(label))
                .with_context(|| format!("unknown label '{}'", label))?;
            monitor.send_feedback(label).await?;
        }
        other => anyhow::bail!(
            "unknown command '{}' (start, shutdown, estop, reset, auto, manual, fan, log, feedback)",
            other
        ),
    }
    Ok(())
}
