//! `pulp-daq`: run a batch against the simulated plant.
//!
//! ```bash
//! pulp-daq run --cooking-duration 30 --target-temperature 90 \
//!     --target-pressure 15 --impregnation-time 30
//! pulp-daq config --config pulp.toml
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use pulp_daq::config::Settings;
use pulp_daq::transport::SimulatedPlant;
use pulp_daq::{logging, BatchController, BatchEvent, BatchParameters};

#[derive(Parser, Debug)]
#[command(name = "pulp-daq", version, about = "Pulp digester batch sequencer")]
struct Cli {
    /// TOML settings file; `PULP_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run one batch against the simulated plant.
    Run(RunArgs),
    /// Print the effective settings as TOML.
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Cooking duration in seconds (0-180).
    #[arg(long)]
    cooking_duration: f64,
    /// Target digester temperature in °C (20-100).
    #[arg(long)]
    target_temperature: f64,
    /// Target digester pressure in bar (0-300).
    #[arg(long)]
    target_pressure: f64,
    /// Impregnation time in seconds (0-180).
    #[arg(long)]
    impregnation_time: f64,
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("load settings")?;

    match cli.cmd {
        Cmd::Config => {
            let rendered = toml::to_string_pretty(&settings).context("render settings")?;
            println!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Run(args) => {
            logging::init(&settings.application).context("initialize logging")?;
            run_batch(settings, args).await
        }
    }
}

async fn run_batch(settings: Settings, args: RunArgs) -> anyhow::Result<ExitCode> {
    let params = BatchParameters {
        cooking_duration_secs: args.cooking_duration,
        target_temperature: args.target_temperature,
        target_pressure: args.target_pressure,
        impregnation_time_secs: args.impregnation_time,
    };

    let plant = SimulatedPlant::spawn(settings.simulator.clone());
    let controller = BatchController::new(plant, settings).context("create batch controller")?;
    let mut events = controller.subscribe();

    let run_id = controller.start_run(params).context("start batch run")?;
    info!(%run_id, "Batch started; press Ctrl-C to abort");

    let mut interrupted = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("listen for Ctrl-C")?;
                interrupted = true;
                if let Err(err) = controller.abort() {
                    warn!(error = %err, "Abort not accepted");
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, args.json)?;
                    if matches!(event, BatchEvent::Finished { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let outcome = controller
        .wait_for_outcome()
        .await
        .context("run finished without an outcome")?;
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_event(event: &BatchEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        BatchEvent::StateChanged { state } => println!("state      {state}"),
        BatchEvent::PhaseStarted {
            phase, started_at, ..
        } => println!("phase      {phase} started at {}", started_at.format("%H:%M:%S")),
        BatchEvent::PhaseCompleted {
            phase, elapsed_ms, ..
        } => println!("phase      {phase} completed in {:.1}s", *elapsed_ms as f64 / 1000.0),
        BatchEvent::SafeStateApplied { failed_points, .. } if failed_points.is_empty() => {
            println!("reset      all actuators neutral")
        }
        BatchEvent::SafeStateApplied { failed_points, .. } => {
            println!("reset      incomplete, failed: {}", failed_points.join(", "))
        }
        BatchEvent::Finished { run_id, outcome, .. } => println!("finished   {run_id}: {outcome}"),
    }
    Ok(())
}
