use clap::{Parser, Subcommand};
use imgopt::config::{self, OptimizerConfig};
use imgopt::discover;
use imgopt::imaging::RustBackend;
use imgopt::incremental::FsTimestamps;
use imgopt::lfs::GitLfs;
use imgopt::output;
use imgopt::pipeline::{Collaborators, Pipeline, PipelineError, ProgressEvent};
use imgopt::retry::ThreadSleeper;
use imgopt::state::StateStore;
use std::path::PathBuf;
use std::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imgopt")]
#[command(about = "Incremental, resumable batch image optimizer")]
#[command(long_about = "\
Incremental, resumable batch image optimizer

Converts every image under the input directory into each configured format,
mirroring the directory layout in the output directory:

  images/                          optimized/
  ├── logo.png            →        ├── logo.webp, logo.avif
  └── marketing/                   └── marketing/
      └── banner-hero.jpg  →           └── banner-hero.webp, banner-hero.avif

Files whose outputs are newer than the source are skipped. Every outcome is
recorded in the state file, so 'imgopt run --resume' continues an interrupted
batch without redoing finished files. Final errors are appended to the error
log as JSON lines.

Run 'imgopt gen-config' to generate a documented imgopt.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = stock defaults)
    #[arg(long, default_value = "imgopt.toml", global = true)]
    config: PathBuf,

    /// Input directory (overrides input_dir)
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// Output directory (overrides output_dir)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone)]
struct RunArgs {
    /// Ignore output timestamps and reprocess every file
    #[arg(long)]
    force: bool,

    /// Continue from the saved state instead of starting a new one
    #[arg(long)]
    resume: bool,

    /// Record fatal file errors and keep going instead of aborting
    #[arg(long)]
    continue_on_error: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize every image under the input directory
    Run(RunArgs),
    /// Summarize the saved state and list logged errors
    Status,
    /// Delete the saved state
    Clear,
    /// Print a stock imgopt.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Run(args) => run(&cli, args)?,
        Command::Status => {
            let config = load(&cli)?;
            let store = open_store(&config, true)?;
            output::print_state_report(&store.generate_report()?);
        }
        Command::Clear => {
            let config = load(&cli)?;
            let mut store = open_store(&config, false)?;
            store.clear()?;
            println!("Cleared {}", store.path().display());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "imgopt=debug" } else { "imgopt=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load the config file and apply CLI overrides, then re-validate.
fn load(cli: &Cli) -> Result<OptimizerConfig, config::ConfigError> {
    let mut config = config::load_config(&cli.config)?;
    if let Some(input) = &cli.input {
        config.input_dir = input.clone();
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Command::Run(args) = &cli.command {
        config.force |= args.force;
        config.retry.continue_on_error |= args.continue_on_error;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(
    config: &OptimizerConfig,
    resume: bool,
) -> Result<StateStore, imgopt::state::StateError> {
    let state = &config.state;
    if resume {
        StateStore::resume(&state.state_file, &state.error_log, config.snapshot())
    } else {
        Ok(StateStore::new(
            &state.state_file,
            &state.error_log,
            config.snapshot(),
        ))
    }
}

fn run(cli: &Cli, args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(cli)?;
    let files = discover::discover(&config.input_dir, &config.output_dir)?;
    let mut store = open_store(&config, args.resume)?;

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let printer = std::thread::spawn(move || {
        let mut total = 0;
        for event in rx {
            if let ProgressEvent::Started { total: t } = event {
                total = t;
            }
            for line in output::format_progress_event(&event, total) {
                println!("{}", line);
            }
        }
    });

    let backend = RustBackend::new();
    let lfs = GitLfs::new(".");
    let collaborators = Collaborators {
        backend: &backend,
        lfs: &lfs,
        timestamps: &FsTimestamps,
        sleeper: &ThreadSleeper,
        progress: &tx,
    };
    let result = Pipeline::new(&config, collaborators).and_then(|p| p.run(&mut store, &files));
    drop(tx);
    if printer.join().is_err() {
        tracing::warn!("progress printer panicked");
    }

    match result {
        Ok(report) => {
            output::print_run_report(&report);
            if report.has_errors() {
                return Err(format!("{} file(s) failed", report.errors + report.lfs_errors).into());
            }
            Ok(())
        }
        Err(err) => {
            if let PipelineError::Aborted { report, .. } = &err {
                output::print_run_report(report);
            }
            Err(err.into())
        }
    }
}
