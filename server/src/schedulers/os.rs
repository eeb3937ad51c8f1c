use super::{JobMap, Plugin, SchedulerError, DEFAULT_JOBID_REGEX};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use std::path::Path;
use tracing::debug;

pub(super) const COMMANDS: [&str; 2] = ["bash", "ps"];

/// Runs job files directly on the login node through a shell; the job id is
/// whatever pid the job script reports.
#[derive(Debug, Clone)]
pub struct OsScheduler {
    pub(super) plugin: Plugin,
}

impl OsScheduler {
    pub(super) fn load(plugin: Plugin) -> Self {
        Self { plugin }
    }

    pub(super) fn submit(&self, script: &str, jobfile: &Path) -> Result<String, SchedulerError> {
        self.plugin
            .generic_submit(script, jobfile, "bash", DEFAULT_JOBID_REGEX)
    }

    pub(super) fn get_user_jobs(&self, username: Option<&str>) -> Result<JobMap, SchedulerError> {
        let args = match username {
            Some(username) => vec!["-u", username],
            None => Vec::new(),
        };
        let output = self.plugin.commands.run("ps", args)?;

        Ok(parse_ps(&output))
    }

    /// terminate the whole process group `jobid` belongs to
    pub(super) fn kill_job(&self, jobid: &str) -> Result<(), SchedulerError> {
        let output = self
            .plugin
            .commands
            .run("ps", ["-o", "pgid=", "-p", jobid])?;
        let process_group = output
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pgid| *pgid > 1)
            .ok_or_else(|| SchedulerError::ProcessGroup {
                jobid: jobid.to_string(),
                output: output.trim().to_string(),
            })?;

        debug!(jobid = %jobid, process_group, "Signalling process group");
        signal::kill(Pid::from_raw(-process_group), Signal::SIGTERM)?;

        Ok(())
    }
}

/// `ps` lines keyed by their leading pid; the header and blank lines are dropped
fn parse_ps(output: &str) -> JobMap {
    output
        .lines()
        .filter_map(|line| {
            let pid = line.split_whitespace().next()?;

            pid.chars()
                .all(|c| c.is_ascii_digit())
                .then(|| (pid.to_string(), line.to_string()))
        })
        .collect()
}
