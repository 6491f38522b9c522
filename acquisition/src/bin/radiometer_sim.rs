use acquisition::{
    AcquisitionController, AcquisitionWorker, BackendConfig, DeviceSet, JsonLinesSink,
    MemorySink, RecordSink, SessionConfig, SimFaults, WorkerCommand,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use hardware::sim::{FaultPlan, LoadModel, SimBench, HOUSEKEEPING_CHANNELS};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "radiometer_sim")]
#[command(
    about = "Runs calibration cycles against a simulated radiometer",
    long_about = "Drives a simulated chopper, wobbler, frontend and backends through \
        the four-phase calibration cycle and reports the integrated brightness \
        temperature of every backend.\n\n\
        Backends are given with --backend kind:name:channels, for example \
        --backend power:AFFTS:256 --backend correlator:ACS:64. Without any, one \
        spectrometer and one correlator are simulated."
)]
struct Args {
    #[command(flatten)]
    session: SessionConfig,

    #[arg(long, help = "JSON session configuration, replacing the session flags")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "3", help = "Calibration cycles to run")]
    cycles: u64,

    #[arg(long, default_value = "150.0", help = "Simulated sky temperature in K")]
    sky_k: f64,

    #[arg(long, help = "Backend whose initialization should fail (repeatable)")]
    fail_backend: Vec<String>,

    #[arg(long, help = "Write records as JSON lines below the output directory")]
    write_records: bool,

    #[arg(long, help = "Write integrated spectra to this CSV file")]
    csv: Option<PathBuf>,
}

fn default_backends() -> Result<Vec<BackendConfig>> {
    ["power:AFFTS:256", "correlator:ACS:64"]
        .iter()
        .map(|s| s.parse::<BackendConfig>().context("default backend"))
        .collect()
}

fn write_csv(path: &Path, controller: &AcquisitionController) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = std::io::BufWriter::new(file);
    writeln!(out, "backend,channel,temperature_k,noise_k")?;
    for backend in &controller.config().backends {
        let Some(state) = controller.calibration(&backend.name) else {
            continue;
        };
        let (Some(temperature), Some(noise)) =
            (state.integrated_temperature(), state.integrated_noise())
        else {
            continue;
        };
        for (channel, (t, n)) in temperature.iter().zip(noise.iter()).enumerate() {
            writeln!(out, "{},{},{:.4},{:.4}", backend.name, channel, t, n)?;
        }
    }
    out.flush()?;
    info!("Wrote integrated spectra to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut session = match &args.config {
        Some(path) => SessionConfig::load_json(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => args.session.clone(),
    };
    if session.backends.is_empty() {
        session.backends = default_backends()?;
    }
    session.validate().context("Invalid session configuration")?;

    let bench = SimBench::new(LoadModel {
        sky_k: args.sky_k,
        cold_k: session.t_cold_k,
        hot_k: session.t_hot_k,
        ..LoadModel::default()
    });
    let faults = args
        .fail_backend
        .iter()
        .fold(SimFaults::default(), |faults, name| {
            faults.backend(name, FaultPlan::default().failing_init())
        });
    let devices = DeviceSet::simulated_with_faults(&session, &bench, faults);

    let sink: Box<dyn RecordSink> = if args.write_records {
        let names = HOUSEKEEPING_CHANNELS.iter().map(|s| s.to_string()).collect();
        Box::new(JsonLinesSink::new(names))
    } else {
        Box::new(MemorySink::new())
    };

    info!(
        backends = session.backends.len(),
        mode = ?session.chopper_mode,
        integration_ms = session.integration_time_ms,
        "Starting simulated session"
    );
    let start = session.wobbler_start;
    let cycle_time = session.integration_time() * 4 * 2 + Duration::from_secs(5);
    let controller = AcquisitionController::new(session, devices, sink)?;
    let worker = AcquisitionWorker::spawn(controller);

    worker.send(WorkerCommand::Init(start))?;
    if !worker.wait_for(Duration::from_secs(30), |s| {
        s.initialized || s.last_error.is_some()
    }) {
        bail!("Timed out waiting for initialization");
    }
    if let Some(e) = worker.status().last_error {
        bail!("Initialization failed: {e}");
    }

    worker.send(WorkerCommand::Run)?;
    let target = args.cycles;
    let finished = worker.wait_for(cycle_time * target.max(1) as u32, |s| {
        s.cycles_completed >= target || s.last_error.is_some()
    });
    worker.send(WorkerCommand::Stop)?;
    if !finished {
        warn!("Stopped before completing {target} cycles");
    }

    let status = worker.status();
    worker.send(WorkerCommand::Close)?;
    let controller = worker.shutdown()?;

    for (label, health) in controller.health() {
        info!("{label}: {health:?}");
    }
    for failure in controller.failures() {
        warn!(
            "{} lost during {}: {}",
            failure.device, failure.capability, failure.reason
        );
    }
    for backend in &controller.config().backends {
        if let Some(t) = controller
            .calibration(&backend.name)
            .and_then(|c| c.integrated_temperature())
        {
            info!(
                "{}: mean brightness temperature {:.2} K over {} channels",
                backend.name,
                t.mean().unwrap_or(f64::NAN),
                t.len()
            );
        }
    }
    if let Some(path) = &args.csv {
        write_csv(path, &controller)?;
    }

    if let Some(e) = status.last_error {
        bail!("Session ended with error: {e}");
    }
    info!("Completed {} cycles", status.cycles_completed);
    Ok(())
}
