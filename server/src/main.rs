use clap::{Parser, Subcommand};
use rcm_server::{Coordinator, CoordinatorError, ServerConfig};
use std::{fs, io, path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compose and submit remote session job scripts")]
struct Args {
    /// Server configuration file
    #[arg(short, long, default_value = "rcm.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the options document as JSON
    Options,
    /// Resolve a choices document into a job script and submit it
    Submit {
        /// Choices as a JSON object of dotted keys
        #[arg(long, conflicts_with = "choices_file", required_unless_present = "choices_file")]
        choices: Option<String>,
        /// Read the choices document from a file
        #[arg(long)]
        choices_file: Option<PathBuf>,
        /// Only print the resolved script
        #[arg(long)]
        dry_run: bool,
    },
    /// List jobs on the working schedulers
    Jobs {
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long)]
        scheduler: Option<String>,
    },
    /// Kill a job
    Kill {
        #[arg(short, long)]
        scheduler: String,
        jobid: String,
    },
    /// Report which schedulers were loaded and what they are missing
    Diagnostics,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error("Choices file {path:?} could not be read")]
    ChoicesFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Output could not be serialized")]
    Output(#[from] serde_json::Error),
}

// RUST_LOG wins over the configured filter
fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or("info")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_choices(choices: Option<String>, choices_file: Option<PathBuf>) -> Result<String, CliError> {
    match (choices, choices_file) {
        (Some(choices), _) => Ok(choices),
        (None, Some(path)) => {
            fs::read_to_string(&path).map_err(|source| CliError::ChoicesFile { path, source })
        }
        // rejected by clap already
        (None, None) => Ok("{}".to_string()),
    }
}

fn run(coordinator: &Coordinator, action: Action) -> Result<ExitCode, CliError> {
    match action {
        Action::Options => {
            println!("{}", coordinator.gui_options_json()?);
        }
        Action::Submit {
            choices,
            choices_file,
            dry_run,
        } => {
            let document = read_choices(choices, choices_file)?;
            let resolution = coordinator.handle_choices(&document)?;

            if dry_run {
                info!("Dry run, job script for {} not submitted", resolution.scheduler);
                println!("{}", resolution.script);
            } else {
                let submission = coordinator.submit(&resolution)?;
                println!("{}", serde_json::to_string_pretty(&submission)?);
            }
        }
        Action::Jobs { user, scheduler } => {
            let jobs = coordinator.get_user_jobs(user.as_deref(), scheduler.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Action::Kill { scheduler, jobid } => {
            if !coordinator.kill_job(&jobid, Some(scheduler.as_str())) {
                error!("Job {jobid} could not be killed on {scheduler}");
                return Ok(ExitCode::FAILURE);
            }
            println!("{jobid}");
        }
        Action::Diagnostics => {
            println!("{}", serde_json::to_string_pretty(coordinator.diagnostics())?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = ServerConfig::load(&args.config);

    init_tracing(
        config
            .as_ref()
            .ok()
            .and_then(|config| config.logging.filter.as_deref()),
    );

    let config = match config {
        Ok(config) => config,
        Err(error) => {
            error!(error = ?error, "Unable to load {}: {error}", args.config.to_string_lossy());
            return ExitCode::FAILURE;
        }
    };

    if config.preflight_checks() {
        error!("Configuration contains errors, see above");
        return ExitCode::FAILURE;
    }

    let coordinator = Coordinator::load(&config);

    match run(&coordinator, args.action) {
        Ok(code) => code,
        Err(error) => {
            error!(error = ?error, "{error}");
            ExitCode::FAILURE
        }
    }
}
