mod commands;
mod os;
mod pbs;
mod slurm;

pub use commands::{check_executable, Commands};
pub use os::OsScheduler;
pub use pbs::PbsScheduler;
pub use slurm::SlurmScheduler;

use crate::config::SchedulerConfig;
use rcm_composer::Templates;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, Permissions},
    io,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// template holding the job id pattern of a scheduler
pub const JOBID_REGEX: &str = "JOBID_REGEX";
/// template holding the tag embedded in generated job names
pub const JOB_MARKER: &str = "JOB_MARKER";
/// used when neither the backend nor the templates provide a pattern
pub const DEFAULT_JOBID_REGEX: &str = r"Submitted  (\d+)";

pub const ACCOUNT: &str = "ACCOUNT";
pub const QUEUE: &str = "QUEUE";

/// job id -> backend specific description
pub type JobMap = BTreeMap<String, String>;

/// queries the live backend for the values of one parameter
type ParamProvider = fn(&Commands) -> Vec<String>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Command '{0}' is not available")]
    CommandUnavailable(String),
    #[error("Failed to spawn '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("'{command}' exited with {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("Unable to extract a job id from output: {output}")]
    Submission { output: String },
    #[error("Job id pattern is invalid")]
    InvalidRegex(#[from] regex::Error),
    #[error("Failed to prepare job file {path:?}")]
    JobFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No usable process group for {jobid}: '{output}'")]
    ProcessGroup { jobid: String, output: String },
    #[error("Failed to signal process group")]
    Signal(#[from] nix::errno::Errno),
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Slurm,
    Pbs,
    #[serde(alias = "os", alias = "local")]
    Ssh,
}

impl SchedulerKind {
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Slurm => "Slurm",
            Self::Pbs => "PBS",
            Self::Ssh => "SSH",
        }
    }

    /// logical command names the backend needs to work
    pub fn commands(self) -> &'static [&'static str] {
        match self {
            Self::Slurm => &slurm::COMMANDS,
            Self::Pbs => &pbs::COMMANDS,
            Self::Ssh => &os::COMMANDS,
        }
    }
}

/// outcome of loading one scheduler, collected for startup diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub name: String,
    pub kind: SchedulerKind,
    pub working: bool,
    pub missing: Vec<String>,
}

/// State shared by every backend: bound commands, templates and the
/// parameters discovered from the live system at load time.
#[derive(Debug, Clone)]
pub struct Plugin {
    name: String,
    commands: Commands,
    templates: Templates,
    params: BTreeMap<String, Vec<String>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, commands: Commands, templates: Templates) -> Self {
        Self {
            name: name.into(),
            commands,
            templates,
            params: BTreeMap::new(),
        }
    }

    pub fn working(&self) -> bool {
        self.commands.is_complete()
    }

    /// query the live backend for `param` once; skipped for a plugin that is not working
    fn discover(&mut self, param: &str, provider: ParamProvider) {
        if !self.working() {
            return;
        }

        let values = provider(&self.commands);
        debug!(scheduler = %self.name, param = %param, values = ?values, "Discovered parameter");
        self.params.insert(param.to_string(), values);
    }

    fn job_marker(&self) -> &str {
        self.templates.get(JOB_MARKER).unwrap_or(&self.name)
    }

    /// write the job file, hand it to `batch_command` and extract the job id
    fn generic_submit(
        &self,
        script: &str,
        jobfile: &Path,
        batch_command: &str,
        default_regex: &str,
    ) -> Result<String, SchedulerError> {
        let job_file_error = |source| SchedulerError::JobFile {
            path: jobfile.to_path_buf(),
            source,
        };

        if !script.is_empty() {
            fs::write(jobfile, script).map_err(job_file_error)?;
        }
        fs::set_permissions(jobfile, Permissions::from_mode(0o700)).map_err(job_file_error)?;

        info!(scheduler = %self.name, jobfile = ?jobfile, "Submitting job file");

        let output = self.commands.run(batch_command, [jobfile])?;
        let pattern = self.templates.get(JOBID_REGEX).unwrap_or(default_regex);
        let jobid = extract_job_id(pattern, &output)?;

        info!(scheduler = %self.name, jobid = %jobid, "Job submitted");

        Ok(jobid)
    }
}

/// first capture group of `pattern`, which has to match from the start of the submit output
pub fn extract_job_id(pattern: &str, output: &str) -> Result<String, SchedulerError> {
    let regex = Regex::new(&format!("^(?:{pattern})"))?;

    regex
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|jobid| jobid.as_str().to_string())
        .ok_or_else(|| SchedulerError::Submission {
            output: output.to_string(),
        })
}

/// All supported batch system backends.
/// Built from `Schedulers::load`, dispatch is a plain match over the variants.
#[derive(Debug, Clone)]
pub enum Schedulers {
    Slurm(SlurmScheduler),
    Pbs(PbsScheduler),
    Ssh(OsScheduler),
}

impl Schedulers {
    /// Load a backend; never fails, a backend missing commands is only
    /// reported as not working.
    pub fn load(config: &SchedulerConfig, templates: Templates) -> Self {
        let name = config.display_name();
        let commands = Commands::resolve(config.kind.commands(), &config.commands);
        let plugin = Plugin::new(name, commands, templates);

        match config.kind {
            SchedulerKind::Slurm => Self::Slurm(SlurmScheduler::load(plugin)),
            SchedulerKind::Pbs => Self::Pbs(PbsScheduler::load(plugin)),
            SchedulerKind::Ssh => Self::Ssh(OsScheduler::load(plugin)),
        }
    }

    fn plugin(&self) -> &Plugin {
        match self {
            Self::Slurm(scheduler) => &scheduler.plugin,
            Self::Pbs(scheduler) => &scheduler.plugin,
            Self::Ssh(scheduler) => &scheduler.plugin,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        match self {
            Self::Slurm(_) => SchedulerKind::Slurm,
            Self::Pbs(_) => SchedulerKind::Pbs,
            Self::Ssh(_) => SchedulerKind::Ssh,
        }
    }

    pub fn name(&self) -> &str {
        &self.plugin().name
    }

    pub fn working(&self) -> bool {
        self.plugin().working()
    }

    pub fn commands(&self) -> &Commands {
        &self.plugin().commands
    }

    /// parameters discovered at load time, e.g. `ACCOUNT` and `QUEUE`
    pub fn params(&self) -> &BTreeMap<String, Vec<String>> {
        &self.plugin().params
    }

    pub fn report(&self) -> LoadReport {
        LoadReport {
            name: self.name().to_string(),
            kind: self.kind(),
            working: self.working(),
            missing: self.commands().missing(),
        }
    }

    /// Submit `script` through `jobfile`; the only operation whose failure
    /// reaches the caller.
    #[instrument(skip(self, script), fields(scheduler = %self.name()))]
    pub fn submit(&self, script: &str, jobfile: &Path) -> Result<String, SchedulerError> {
        match self {
            Self::Slurm(scheduler) => scheduler.submit(script, jobfile),
            Self::Pbs(scheduler) => scheduler.submit(script, jobfile),
            Self::Ssh(scheduler) => scheduler.submit(script, jobfile),
        }
    }

    /// jobs of `username` (all jobs without one), empty when listing fails
    #[instrument(skip(self), fields(scheduler = %self.name()))]
    pub fn get_user_jobs(&self, username: Option<&str>) -> JobMap {
        let username = username.filter(|name| !name.is_empty());
        let result = match self {
            Self::Slurm(scheduler) => scheduler.get_user_jobs(username),
            Self::Pbs(scheduler) => scheduler.get_user_jobs(username),
            Self::Ssh(scheduler) => scheduler.get_user_jobs(username),
        };

        result.unwrap_or_else(|error| {
            warn!(error = ?error, "Failed to list jobs: {error}");
            JobMap::new()
        })
    }

    /// `true` once the backend accepted the kill, failures are only logged
    #[instrument(skip(self), fields(scheduler = %self.name()))]
    pub fn kill_job(&self, jobid: &str) -> bool {
        if jobid.is_empty() {
            return false;
        }

        let result = match self {
            Self::Slurm(scheduler) => scheduler.kill_job(jobid),
            Self::Pbs(scheduler) => scheduler.kill_job(jobid),
            Self::Ssh(scheduler) => scheduler.kill_job(jobid),
        };

        match result {
            Ok(()) => {
                info!(jobid = %jobid, "Killed job");
                true
            }
            Err(error) => {
                error!(jobid = %jobid, error = ?error, "Can not kill job: {error}");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// write a `/bin/sh` stand-in for a backend command
    pub fn fake_command(directory: &Path, name: &str, body: &str) -> PathBuf {
        let path = directory.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn config(kind: SchedulerKind, commands: &[(&str, PathBuf)]) -> SchedulerConfig {
        SchedulerConfig {
            kind,
            name: None,
            commands: commands
                .iter()
                .map(|(name, path)| (name.to_string(), path.clone()))
                .collect(),
        }
    }
}
