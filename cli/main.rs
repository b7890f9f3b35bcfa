#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use rangecast::config::RunConfig;
use rangecast::pipeline;
use rangecast::project::ChangeMatrix;

#[derive(Parser)]
#[command(
    name = "rangecast",
    about = "Species distribution modelling and climate-driven range forecasting",
    long_about = "Fits a presence/pseudo-absence logistic model over bioclimatic, \
                 elevation, and soil covariates, then projects the selected model \
                 onto future climate windows."
)]
struct Cli {
    /// Path to the run configuration
    #[arg(long, global = true, default_value = "rangecast.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download any missing remote inputs into the cache directory
    #[command(about = "Download missing inputs into the cache")]
    Fetch,

    /// Run the full pipeline from cached inputs to artifacts
    #[command(about = "Run the pipeline (outputs: surfaces, rankings, selected_model.toml)")]
    Run {
        /// Overwrite existing output files
        #[arg(long)]
        force: bool,
    },

    /// Re-render projection artifacts from a saved model without refitting
    #[command(about = "Re-render surfaces and change summaries from a saved model")]
    Report {
        /// Saved model file; defaults to selected_model.toml in the output directory
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// Overwrite existing output files
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let Cli { config, command } = cli;

    let result = match command {
        Some(Commands::Fetch) => run_fetch(&config),
        Some(Commands::Run { force }) => run_pipeline(&config, force),
        Some(Commands::Report { model, force }) => run_report(&config, model, force),
        Some(Commands::Version) => {
            println!("rangecast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_fetch(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(config_path)?;
    let summary = pipeline::fetch(&config)?;
    println!(
        "{} inputs downloaded, {} already cached",
        summary.downloaded, summary.cached
    );
    Ok(())
}

fn run_pipeline(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(config_path)?;
    let summary = pipeline::run(&config, force)?;
    println!(
        "{} presences / {} pseudo-absences; selected model [{}]",
        summary.presences,
        summary.absences,
        summary.selected.join(", ")
    );
    println!(
        "held-out AUC {:.3}, presence threshold {:.3}",
        summary.auc, summary.threshold
    );
    print_change(&summary.change);
    Ok(())
}

fn run_report(
    config_path: &Path,
    model: Option<PathBuf>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = RunConfig::load(config_path)?;
    let model_path =
        model.unwrap_or_else(|| config.run.output_dir.join("selected_model.toml"));
    let change = pipeline::report_from_artifact(&config, &model_path, force)?;
    print_change(&change);
    Ok(())
}

fn print_change(change: &[(String, ChangeMatrix)]) {
    for (window, matrix) in change {
        println!(
            "{window}: {} -> {} presence cells (ratio {:.3})",
            matrix.historical_presence(),
            matrix.future_presence(),
            matrix.ratio()
        );
    }
}
