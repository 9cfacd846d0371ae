//! CLI Entry Point for kesf-daq
//!
//! Headless front end for the KES-F rig:
//! - list serial ports
//! - acquire from both boards until Ctrl+C or the run-length limit, then save the CSV
//! - run the same pipeline against simulated boards
//! - send a single motor command
//!
//! # Usage
//!
//! ```bash
//! kesf-daq ports
//! kesf-daq run --control-port /dev/ttyUSB0 --sensor-port /dev/ttyUSB1 --name trial-01
//! kesf-daq simulate --ticks 5000
//! kesf-daq motor --port /dev/ttyUSB0 --axis one --action reverse
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kesf_daq::acquisition::AcquisitionState;
use kesf_daq::app::{KesfApp, UserAction};
use kesf_daq::config::AppConfig;
use kesf_daq::events::{AcquisitionEvent, DisplaySink, EventBus};
use kesf_daq::motor::CommandDispatcher;
use kesf_daq::protocol::{Axis, MotorAction};
use kesf_daq::sample::{Channel, TIME_AXIS_LABEL};
use kesf_daq::synchronizer::DisplaySeries;
use kesf_daq::telemetry;
use kesf_daq::transport::mock::{control_board, sensor_board, MockLine};
use kesf_daq::transport::{self, wrap_shared, LineTransport, PortRole, SerialLine};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kesf-daq")]
#[command(about = "KES-F rig acquisition: two serial boards, five channels, CSV archive", long_about = None)]
struct Cli {
    /// Configuration file (default: config/kesf.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Acquire from both boards until Ctrl+C, then save
    Run {
        /// Control board port (overrides serial.control_port)
        #[arg(long)]
        control_port: Option<String>,

        /// Sensor board port (overrides serial.sensor_port)
        #[arg(long)]
        sensor_port: Option<String>,

        /// Archive file stem (default: timestamped)
        #[arg(long)]
        name: Option<String>,
    },

    /// Acquire from simulated boards
    Simulate {
        /// Microseconds between simulated records
        #[arg(long, default_value = "1000")]
        period_us: u64,

        /// Stop after this many poll ticks instead of waiting for Ctrl+C
        #[arg(long)]
        ticks: Option<u64>,

        /// Archive file stem (default: timestamped)
        #[arg(long)]
        name: Option<String>,
    },

    /// Send one motor command to the control board
    Motor {
        /// Control board port (overrides serial.control_port)
        #[arg(long)]
        port: Option<String>,

        /// Motor axis
        #[arg(long, value_enum)]
        axis: AxisArg,

        /// What to do with it
        #[arg(long, value_enum)]
        action: ActionArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AxisArg {
    One,
    Two,
}

impl From<AxisArg> for Axis {
    fn from(value: AxisArg) -> Self {
        match value {
            AxisArg::One => Axis::One,
            AxisArg::Two => Axis::Two,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Start,
    Stop,
    Reverse,
}

impl From<ActionArg> for MotorAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Start => MotorAction::Start,
            ActionArg::Stop => MotorAction::Stop,
            ActionArg::Reverse => MotorAction::Reverse,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;
    telemetry::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Run {
            control_port,
            sensor_port,
            name,
        } => {
            let control_port = control_port
                .or_else(|| config.serial.control_port.clone())
                .context("no control port given (--control-port or serial.control_port)")?;
            let sensor_port = sensor_port
                .or_else(|| config.serial.sensor_port.clone())
                .context("no sensor port given (--sensor-port or serial.sensor_port)")?;

            let control = SerialLine::from_config(&config.serial);
            let sensor = SerialLine::from_config(&config.serial);
            let mut app = KesfApp::new(config, Box::new(control), Box::new(sensor));
            app.select_port(PortRole::Control, &control_port).await?;
            app.select_port(PortRole::Sensor, &sensor_port).await?;
            acquire(app, name).await
        }
        Commands::Simulate {
            period_us,
            ticks,
            name,
        } => {
            let mut config = config;
            if let Some(ticks) = ticks {
                config.acquisition.max_run_length = ticks.max(2);
            }
            let interval = Duration::from_micros(period_us);
            let control = MockLine::generated("sim-control", control_board(0, period_us))
                .with_interval(interval);
            let sensor = MockLine::generated("sim-sensor", sensor_board());
            let app = KesfApp::new(config, Box::new(control), Box::new(sensor));
            acquire(app, name).await
        }
        Commands::Motor { port, axis, action } => {
            let port = port
                .or_else(|| config.serial.control_port.clone())
                .context("no control port given (--port or serial.control_port)")?;
            let mut line = SerialLine::from_config(&config.serial);
            line.open(&port).await?;
            let motors = CommandDispatcher::new(wrap_shared(line), EventBus::default());
            motors.dispatch(axis.into(), action.into()).await?;
            println!("Sent {} {:?} to {}", Axis::from(axis), MotorAction::from(action), port);
            Ok(())
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = transport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

/// Prints a progress line every `every` plotted points.
struct ProgressDisplay {
    every: usize,
}

impl DisplaySink for ProgressDisplay {
    fn render(&mut self, series: &DisplaySeries) {
        if series.is_empty() || series.len() % self.every != 0 {
            return;
        }
        let Some(latest) = series.sample(series.len() - 1) else {
            return;
        };
        let channels: Vec<String> = Channel::ALL
            .iter()
            .map(|&c| format!("{}={:.3}", c.label(), latest.channel(c)))
            .collect();
        println!("{TIME_AXIS_LABEL}={:.3}  {}", latest.t, channels.join("  "));
    }
}

/// Start a run, stop on Ctrl+C or the length limit, save, exit.
async fn acquire(mut app: KesfApp, name: Option<String>) -> Result<()> {
    app.add_display_sink(Box::new(ProgressDisplay { every: 200 }));

    let (tx, rx) = mpsc::channel(16);
    app.handle(UserAction::Start).await;
    if app.acquisition().state() != AcquisitionState::Running {
        bail!("acquisition did not start");
    }
    info!("Acquiring; press Ctrl+C to stop");

    let mut events = app.events().subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(UserAction::Stop).await;
                }
                event = events.recv() => match event {
                    Ok(AcquisitionEvent::StateChanged(AcquisitionState::Stopped)) => {
                        let _ = tx.send(UserAction::Save { name }).await;
                        let _ = tx.send(UserAction::Exit).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event listener fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    app.run(rx).await;
    println!("Recorded {} samples", app.acquisition().archive().len());
    Ok(())
}
