use anyhow::Context;
use clap::{Parser, ValueEnum};
use presenter::console::Console;
use std::path::PathBuf;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use vnacore::acquisition::EngineState;
use vnacore::sweep::SweepMode;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod presenter;
mod workflow;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Single,
    Continuous,
    Average,
}

impl From<Mode> for SweepMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Single => SweepMode::Single,
            Mode::Continuous => SweepMode::Continuous,
            Mode::Average => SweepMode::Average,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Calibrated sweeps against a simulated vector network analyzer")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Start frequency in MHz, or with its own suffix (e.g. 433.92M)
    #[arg(long, default_value = "1")]
    start: String,
    #[arg(long, default_value = "30")]
    end: String,
    #[arg(long, default_value_t = 101)]
    points: usize,
    #[arg(long, default_value_t = 1)]
    segments: usize,
    #[arg(long, value_enum, default_value_t = Mode::Single)]
    mode: Mode,
    /// Run the guided short/open/load/through procedure before measuring
    #[arg(long, default_value_t = false)]
    calibrate: bool,
    /// Touchstone file for the corrected result
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write the final presentation model as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(
            &args.start,
            &args.end,
            args.points,
            args.segments,
            args.mode.into(),
        )
    };
    if args.calibrate {
        workflow_config.calibration.guided = true;
    }
    if args.output.is_some() {
        workflow_config.outputs.touchstone = args.output.clone();
    }

    let console = Console::new();
    let mut runner = Runner::new(workflow_config.clone(), console.clone())?;

    let monitor = runner.monitor();
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                if signal::ctrl_c().await.is_ok() {
                    println!("[VNA] Stop requested, finishing current segment...");
                    monitor.request_stop();
                }
            });
        })
        .context("spawning signal handler")?;

    if workflow_config.calibration.guided {
        console.publish_status("Guided calibration started");
        runner.calibrate()?;
    }

    let calibration_status = match runner.calibration().read() {
        Ok(calibration) if calibration.is_calculated() => format!(
            "Calibration active: {} points, {}",
            calibration.frequencies().count(),
            if calibration.is_valid_2port() { "2-port" } else { "1-port" }
        ),
        _ => "No calibration loaded, showing raw readings".to_string(),
    };
    console.publish_status(&calibration_status);

    console.publish_status("Sweeping device under test (Ctrl+C to stop)...");
    let outcome = runner.execute()?;
    match outcome.state {
        EngineState::Stopped => console.publish_status("Run stopped before completion."),
        _ => console.publish_status(&format!(
            "Run complete at {}: {} points, {} tracked passes",
            outcome.result.timestamp.format("%H:%M:%S"),
            outcome.model.points,
            outcome.tracking.len()
        )),
    }

    if let Some(path) = &args.summary {
        console.write_json(path)?;
        console.publish_status(&format!("Summary written to {}", path.display()));
    }
    Ok(())
}
