use super::{Commands, JobMap, Plugin, SchedulerError, ACCOUNT, QUEUE};
use itertools::Itertools;
use std::path::Path;
use tracing::{debug, warn};

pub(super) const COMMANDS: [&str; 3] = ["qdel", "qstat", "qsub"];

/// qsub prints the bare job id, e.g. `4242.pbs01`
const JOBID_REGEX: &str = r"(\d+\S*)";

#[derive(Debug, Clone)]
pub struct PbsScheduler {
    pub(super) plugin: Plugin,
}

impl PbsScheduler {
    pub(super) fn load(mut plugin: Plugin) -> Self {
        // no portable way to enumerate accounts
        plugin.discover(ACCOUNT, |_| Vec::new());
        plugin.discover(QUEUE, queues);

        Self { plugin }
    }

    pub(super) fn submit(&self, script: &str, jobfile: &Path) -> Result<String, SchedulerError> {
        self.plugin
            .generic_submit(script, jobfile, "qsub", JOBID_REGEX)
    }

    pub(super) fn get_user_jobs(&self, username: Option<&str>) -> Result<JobMap, SchedulerError> {
        let output = self.plugin.commands.run("qstat", Vec::<&str>::new())?;

        Ok(parse_qstat(&output, username, self.plugin.job_marker()))
    }

    pub(super) fn kill_job(&self, jobid: &str) -> Result<(), SchedulerError> {
        self.plugin.commands.run("qdel", [jobid])?;

        Ok(())
    }
}

/// rows of a qstat table, everything after the `----` separator line
fn table_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with('-'))
        .skip(1)
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| !fields.is_empty())
}

/// `Job id  Name  User  Time Use  S  Queue` rows
fn parse_qstat(output: &str, username: Option<&str>, marker: &str) -> JobMap {
    table_rows(output)
        .filter_map(|fields| match fields.as_slice() {
            [jobid, name, user, ..] if name.contains(marker) => {
                match username {
                    Some(username) if username != *user => None,
                    _ => Some((jobid.to_string(), name.to_string())),
                }
            }
            _ => {
                debug!(fields = ?fields, "Skipping qstat row");
                None
            }
        })
        .collect()
}

fn queues(commands: &Commands) -> Vec<String> {
    match commands.run("qstat", ["-Q"]) {
        Ok(output) => table_rows(&output)
            .map(|fields| fields[0].to_string())
            .unique()
            .collect(),
        Err(error) => {
            warn!(error = ?error, "Unable to enumerate queues: {error}");
            Vec::new()
        }
    }
}
