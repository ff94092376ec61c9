//! Command-line front end for spectral inversion runs.
//!
//! ```sh
//! leafopt --root work init leaf_a --clear
//! leafopt --root work run leaf_a --optimizer basin_hopping --resolution 5
//! leafopt --root work aggregate leaf_a
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use leafopt::optimizer::Aggregator;
use leafopt::{
    BatchReport, BatchScheduler, CsvPlotter, ExternalSimulator, FitConfig, FsStore, Plotter,
    Simulator, SlabSimulator,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leafopt")]
#[command(about = "Fit leaf material parameters to measured reflectance and transmittance")]
#[command(version)]
struct Cli {
    /// Workspace root holding one folder per set.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// TOML file overriding bounds, tolerances and budgets.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// `analytic` for the built-in slab model, otherwise a renderer program.
    #[arg(long, global = true, default_value = "analytic")]
    simulator: String,
    /// Extra argument passed to the renderer program before the request flags.
    #[arg(long = "simulator-arg", global = true, allow_hyphen_values = true)]
    simulator_args: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the set's folders and clear scratch renders.
    Init {
        set: String,
        /// Also delete existing subresults.
        #[arg(long)]
        clear: bool,
    },
    /// Fit every wavelength of the set that has no subresult yet.
    Run {
        set: String,
        /// Split the targets into this many strided batches.
        #[arg(long)]
        batches: Option<usize>,
        #[arg(long, default_value = "basin_hopping")]
        optimizer: String,
        /// Fit one wavelength at a time.
        #[arg(long)]
        sequential: bool,
        /// Fit only every n-th wavelength.
        #[arg(long, default_value_t = 1)]
        resolution: usize,
    },
    /// Rebuild the final result from existing subresults.
    Aggregate { set: String },
    /// Write plot tables for one wavelength or the whole set.
    Plot {
        set: String,
        #[arg(long)]
        wavelength: Option<f64>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FitConfig> {
    match path {
        Some(path) => FitConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FitConfig::default()),
    }
}

fn build_simulator(choice: &str, args: Vec<String>, working_dir: PathBuf) -> Box<dyn Simulator> {
    match choice {
        "analytic" => Box::new(SlabSimulator::new()),
        program => Box::new(
            ExternalSimulator::new(program)
                .with_args(args)
                .with_working_dir(working_dir),
        ),
    }
}

fn log_report(report: &BatchReport) {
    for (wavelength, error) in &report.failed {
        tracing::error!(wavelength, %error, "wavelength left unfinished");
    }
    if let Some(result) = &report.final_result {
        tracing::info!(
            r_rmse = result.r_rmse,
            t_rmse = result.t_rmse,
            wall_clock_min = result.wall_clock_elapsed_min,
            process_min = result.process_elapsed_min,
            "set summary"
        );
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let store = FsStore::new(&cli.root);
    let plotter = CsvPlotter::new(store.clone());

    match cli.command {
        Commands::Init { set, clear } => {
            store
                .init(&set, clear)
                .with_context(|| format!("initializing set '{}'", set))?;
            tracing::info!(set, root = %cli.root.display(), "set initialized");
        }
        Commands::Run {
            set,
            batches,
            optimizer,
            sequential,
            resolution,
        } => {
            store.init(&set, false)?;
            let simulator =
                build_simulator(&cli.simulator, cli.simulator_args, store.working_dir(&set));
            let scheduler = BatchScheduler::new(simulator.as_ref(), &store, &plotter, &config);

            let report = match batches {
                Some(batch_n) => scheduler.run_in_batches(&set, batch_n, &optimizer)?,
                None => scheduler.run(&set, None, !sequential, &optimizer, resolution)?,
            };
            log_report(&report);
            if !report.is_clean() {
                anyhow::bail!("{} wavelength(s) failed", report.failed.len());
            }
        }
        Commands::Aggregate { set } => {
            let result = Aggregator::new(&store, &plotter).aggregate(&set, 0.0)?;
            tracing::info!(
                r_rmse = result.r_rmse,
                t_rmse = result.t_rmse,
                wavelengths = result.wavelengths.len(),
                "aggregated"
            );
        }
        Commands::Plot { set, wavelength } => match wavelength {
            Some(wl) => plotter.plot_wavelength_history(&set, wl)?,
            None => {
                for wl in store.completed_wavelengths(&set)? {
                    plotter.plot_wavelength_history(&set, wl)?;
                }
                plotter.plot_final(&set)?;
            }
        },
    }
    Ok(())
}
