use clap::Parser;
use log::{error, info};
use node_power_annotate::utils::logger::setup_logger;
use node_power_annotate::{
    AnnotateConfig, SourceKind, annotate_energy, annotate_power, annotate_power_domain, global,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Record node power and energy around a timed idle period.
#[derive(Parser, Debug)]
#[command(name = "node-power-annotate", version)]
struct Cli {
    /// Measurement source: variorum, rapl or dummy
    #[arg(long)]
    source: Option<SourceKind>,

    /// Directory receiving the per-host CSV logs
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Background sampling rate in Hz (0 disables)
    #[arg(long)]
    rate: Option<f64>,

    /// Seconds to run between the opening and closing annotations
    #[arg(long, default_value_t = 10.0)]
    duration: f64,

    /// Also log the node power-domain description
    #[arg(long)]
    domain_info: bool,
}

fn build_config(cli: &Cli) -> node_power_annotate::Result<AnnotateConfig> {
    let mut config = AnnotateConfig::from_env()?;
    if let Some(source) = cli.source {
        config = config.with_source(source);
    }
    if let Some(dir) = &cli.output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(rate) = cli.rate {
        config = config.with_sample_rate(rate)?;
    }
    Ok(config)
}

/// Node-local rank from a shared-memory split of the world communicator.
///
/// The returned universe finalizes MPI when dropped.
#[cfg(feature = "mpi")]
fn with_mpi_node_rank(
    config: AnnotateConfig,
) -> (AnnotateConfig, Option<mpi::environment::Universe>) {
    use log::warn;
    use node_power_annotate::NodeRank;

    match mpi::initialize() {
        Some(universe) => {
            let node_rank = NodeRank::from_communicator(&universe.world());
            (config.with_node_rank(node_rank), Some(universe))
        }
        None => {
            warn!("MPI was already initialised; node rank falls back to launcher variables");
            (config, None)
        }
    }
}

fn main() -> ExitCode {
    setup_logger();
    info!("Application started");
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    #[cfg(feature = "mpi")]
    let (config, _universe) = with_mpi_node_rank(config);

    if let Err(e) = global::init(&config) {
        error!("Failed to initialise the annotator: {}", e);
        return ExitCode::FAILURE;
    }

    if cli.domain_info {
        annotate_power_domain!();
    }
    annotate_power!();
    annotate_energy!();

    info!("Monitoring for {} seconds...", cli.duration);
    std::thread::sleep(Duration::from_secs_f64(cli.duration.max(0.0)));

    annotate_power!();
    annotate_energy!();

    if let Some(report) = global::finalize() {
        info!("Session report:\n{}", report);
    }
    info!("Program ended successfully.");
    ExitCode::SUCCESS
}
