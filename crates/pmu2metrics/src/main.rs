use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use metric_engine::{load_definitions, Diagnostics, FramePipeline, Metadata, MetricStream};
use perf_stat::GroupLayout;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod metric_writer;
mod target;
mod target_completion_handler;

use target::{run_target, Target, STDIN};
use target_completion_handler::target_completion_handler;

/// Derives CPU metrics from `perf stat --json -I` interval output
#[derive(Debug, Parser)]
struct Command {
    /// Metric definition file (JSON array of {"name", "expression"} objects)
    #[arg(short, long)]
    metrics: PathBuf,

    /// Event group layout file: groups separated by ';', events by ','
    #[arg(short, long)]
    events: PathBuf,

    /// perf stat output to process, one per target ('-' reads stdin)
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// lscpu output describing the host (runs lscpu locally when absent)
    #[arg(long)]
    lscpu: Option<PathBuf>,

    /// Override the hardware threads per core
    #[arg(long)]
    threads_per_core: Option<u32>,

    /// Override the TSC frequency in Hz
    #[arg(long)]
    tsc_frequency: Option<u64>,

    /// Directory for <target>_metrics.csv files (stdout when absent)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Print the event list to pass to `perf stat -e` and exit
    #[arg(long)]
    print_perf_events: bool,

    /// Verbose debug output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn read_metadata(opts: &Command) -> Result<Metadata> {
    let mut metadata = match &opts.lscpu {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read lscpu file: {}", path.display()))?;
            Metadata::from_lscpu(&text)
                .with_context(|| format!("Failed to parse lscpu file: {}", path.display()))?
        }
        None => local_metadata(),
    };

    if let Some(threads_per_core) = opts.threads_per_core {
        metadata.threads_per_core = threads_per_core;
    }
    if let Some(tsc_frequency) = opts.tsc_frequency {
        metadata.tsc_frequency_hz = Some(tsc_frequency);
    }
    Ok(metadata)
}

fn local_metadata() -> Metadata {
    let output = match process::Command::new("lscpu").output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!("lscpu exited with {}, using default host metadata", output.status);
            return Metadata::default();
        }
        Err(e) => {
            warn!("Failed to run lscpu ({}), using default host metadata", e);
            return Metadata::default();
        }
    };

    Metadata::from_lscpu(&String::from_utf8_lossy(&output.stdout)).unwrap_or_else(|e| {
        warn!("{}, using default host metadata", e);
        Metadata::default()
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Command::parse();
    init_logging(opts.verbose);

    let layout_text = fs::read_to_string(&opts.events)
        .with_context(|| format!("Failed to read event layout: {}", opts.events.display()))?;
    let layout = GroupLayout::parse(&layout_text)
        .with_context(|| format!("Failed to parse event layout: {}", opts.events.display()))?;

    if opts.print_perf_events {
        println!("{}", layout.perf_event_list());
        return Ok(());
    }

    let metadata = read_metadata(&opts)?;
    debug!("Host metadata: {:?}", metadata);

    let definitions_text = fs::read_to_string(&opts.metrics)
        .with_context(|| format!("Failed to read metric definitions: {}", opts.metrics.display()))?;
    let definitions = load_definitions(&definitions_text, &metadata)
        .with_context(|| format!("Failed to load metric definitions: {}", opts.metrics.display()))?;
    info!(
        "Loaded {} metrics over {} event groups",
        definitions.len(),
        layout.groups().len()
    );

    if let Some(output_dir) = &opts.output_dir {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    }

    let inputs = if opts.input.is_empty() {
        vec![PathBuf::from(STDIN)]
    } else {
        opts.input.clone()
    };
    let targets: Vec<Target> = inputs
        .into_iter()
        .map(|input| Target::new(input, opts.output_dir.as_deref(), &metadata.hostname))
        .collect();

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, stopping targets");
        signal_token.cancel();
    });

    let diagnostics = Diagnostics { verbose: opts.verbose };
    let handlers = targets.into_iter().map(|target| {
        let pipeline = FramePipeline::new(definitions.clone()).with_diagnostics(diagnostics);
        let stream = MetricStream::new(pipeline, layout.clone(), metadata.clone());
        let token = token.clone();
        let label = target.label.clone();
        let handle = tokio::task::spawn_blocking(move || run_target(&target, stream, &token));
        async move { target_completion_handler(handle, &label).await }
    });
    let results = futures::future::join_all(handlers).await;

    let failed = results.iter().filter(|succeeded| !**succeeded).count();
    if failed > 0 {
        bail!("{} of {} targets failed", failed, results.len());
    }
    Ok(())
}
