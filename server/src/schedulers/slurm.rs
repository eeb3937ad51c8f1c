use super::{Commands, JobMap, Plugin, SchedulerError, ACCOUNT, QUEUE};
use itertools::Itertools;
use std::path::Path;
use tracing::{debug, warn};

pub(super) const COMMANDS: [&str; 5] = ["sbatch", "scancel", "sinfo", "squeue", "sshare"];

const JOBID_REGEX: &str = r"Submitted batch job (\d+)";
const SQUEUE_FORMAT: [&str; 4] = ["-o", "%i#%t#%j#%a", "-h", "-a"];

#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    pub(super) plugin: Plugin,
}

impl SlurmScheduler {
    pub(super) fn load(mut plugin: Plugin) -> Self {
        plugin.discover(ACCOUNT, accounts);
        plugin.discover(QUEUE, partitions);

        Self { plugin }
    }

    pub(super) fn submit(&self, script: &str, jobfile: &Path) -> Result<String, SchedulerError> {
        self.plugin
            .generic_submit(script, jobfile, "sbatch", JOBID_REGEX)
    }

    pub(super) fn get_user_jobs(&self, username: Option<&str>) -> Result<JobMap, SchedulerError> {
        let mut args: Vec<&str> = SQUEUE_FORMAT.to_vec();
        if let Some(username) = username {
            args.extend(["-u", username]);
        }

        let output = self.plugin.commands.run("squeue", args)?;

        Ok(parse_squeue(&output, self.plugin.job_marker()))
    }

    pub(super) fn kill_job(&self, jobid: &str) -> Result<(), SchedulerError> {
        self.plugin.commands.run("scancel", [jobid])?;

        Ok(())
    }
}

/// lines of the form `jobid#state#name#account` whose name carries `marker`
fn parse_squeue(output: &str, marker: &str) -> JobMap {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split('#').collect();

            match fields.as_slice() {
                [jobid, _state, name, _account] if name.contains(marker) => {
                    Some((jobid.to_string(), name.to_string()))
                }
                _ => {
                    debug!("Skipping squeue line '{line}'");
                    None
                }
            }
        })
        .collect()
}

fn accounts(commands: &Commands) -> Vec<String> {
    match commands.run("sshare", ["--parsable"]) {
        Ok(output) => output
            .lines()
            .skip(1)
            .filter_map(|line| line.split('|').next())
            .map(str::trim)
            .filter(|account| !account.is_empty())
            .unique()
            .map(String::from)
            .collect(),
        Err(error) => {
            warn!(error = ?error, "Unable to enumerate accounts: {error}");
            Vec::new()
        }
    }
}

fn partitions(commands: &Commands) -> Vec<String> {
    match commands.run("sinfo", ["--format=%R"]) {
        Ok(output) => output
            .lines()
            .skip(1)
            .map(str::trim)
            .filter(|partition| !partition.is_empty())
            .unique()
            .map(String::from)
            .collect(),
        Err(error) => {
            warn!(error = ?error, "Unable to enumerate partitions: {error}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedulers::{
        testing::{config, fake_command},
        SchedulerKind, Schedulers,
    };
    use rcm_composer::Templates;
    use std::{fs, path::PathBuf};
    use tempfile::TempDir;

    fn backend(directory: &TempDir, sbatch: &str) -> Vec<(&'static str, PathBuf)> {
        let dir = directory.path();
        vec![
            ("sbatch", fake_command(dir, "sbatch", sbatch)),
            (
                "squeue",
                fake_command(
                    dir,
                    "squeue",
                    "echo \"$@\" > \"$(dirname \"$0\")/squeue.args\"\n\
                     echo '101#R#Slurm_vnc#cin_staff'\n\
                     echo '102#PD#other_job#cin_staff'\n\
                     echo 'garbage'",
                ),
            ),
            (
                "scancel",
                fake_command(dir, "scancel", "[ \"$1\" = 101 ] || exit 1"),
            ),
            (
                "sinfo",
                fake_command(dir, "sinfo", "printf 'PARTITION\\ndebug\\ngll_usr\\ndebug\\n'"),
            ),
            (
                "sshare",
                fake_command(
                    dir,
                    "sshare",
                    "printf 'Account|User|RawShares\\nroot|||\\ncin_staff|alice|1\\n'",
                ),
            ),
        ]
    }

    fn slurm(directory: &TempDir, sbatch: &str) -> Schedulers {
        Schedulers::load(
            &config(SchedulerKind::Slurm, &backend(directory, sbatch)),
            Templates::new(),
        )
    }

    #[test]
    fn discovers_accounts_and_partitions() {
        let directory = tempfile::tempdir().unwrap();
        let scheduler = slurm(&directory, "exit 0");

        assert!(scheduler.working());
        assert_eq!(scheduler.params()[ACCOUNT], vec!["root", "cin_staff"]);
        assert_eq!(scheduler.params()[QUEUE], vec!["debug", "gll_usr"]);
    }

    #[test]
    fn submit_extracts_the_job_id() {
        let directory = tempfile::tempdir().unwrap();
        let scheduler = slurm(&directory, "echo 'Submitted batch job 12345'");
        let jobfile = directory.path().join("job.sh");

        let jobid = scheduler.submit("#!/bin/bash\necho hi\n", &jobfile).unwrap();

        assert_eq!(jobid, "12345");
        assert_eq!(fs::read_to_string(&jobfile).unwrap(), "#!/bin/bash\necho hi\n");
        assert!(crate::schedulers::check_executable(&jobfile).unwrap());
    }

    #[test]
    fn submit_fails_on_unexpected_output() {
        let directory = tempfile::tempdir().unwrap();
        let scheduler = slurm(&directory, "echo 'error: invalid partition'");

        let result = scheduler.submit("#!/bin/bash\n", &directory.path().join("job.sh"));

        assert!(matches!(
            result,
            Err(SchedulerError::Submission { ref output }) if output.trim() == "error: invalid partition"
        ));
    }

    #[test]
    fn lists_only_marked_jobs() {
        let directory = tempfile::tempdir().unwrap();
        let scheduler = slurm(&directory, "exit 0");

        let jobs = scheduler.get_user_jobs(Some("alice"));

        assert_eq!(jobs, JobMap::from([("101".to_string(), "Slurm_vnc".to_string())]));
        assert_eq!(
            fs::read_to_string(directory.path().join("squeue.args")).unwrap(),
            "-o %i#%t#%j#%a -h -a -u alice\n"
        );
    }

    #[test]
    fn marker_template_overrides_the_name() {
        let directory = tempfile::tempdir().unwrap();
        let templates: Templates = [("JOB_MARKER".to_string(), "other".to_string())]
            .into_iter()
            .collect();
        let scheduler = Schedulers::load(
            &config(SchedulerKind::Slurm, &backend(&directory, "exit 0")),
            templates,
        );

        assert_eq!(
            scheduler.get_user_jobs(None).keys().collect::<Vec<_>>(),
            vec!["102"]
        );
    }

    #[test]
    fn kill_reports_backend_failures_as_false() {
        let directory = tempfile::tempdir().unwrap();
        let scheduler = slurm(&directory, "exit 0");

        assert!(scheduler.kill_job("101"));
        assert!(!scheduler.kill_job("999"));
        assert!(!scheduler.kill_job(""));
    }
}
