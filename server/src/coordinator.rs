use crate::{
    config::ServerConfig,
    schedulers::{JobMap, LoadReport, SchedulerError, Schedulers},
};
use parking_lot::RwLock;
use rayon::prelude::*;
use rcm_composer::{
    parse_choices,
    tree::{self, LIST},
    Choices, ClassTable, ComposerError, Kind, Node, NodeFactory, Substitution, Templates, SCRIPT,
};
use serde::Serialize;
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    process,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Choices could not be parsed")]
    Choices(#[from] ComposerError),
    #[error("No SCRIPT could be produced for these choices")]
    NoScript,
    #[error("No working scheduler is selected by '{0}'")]
    NoActiveScheduler(String),
    #[error("Scheduler '{0}' is not loaded")]
    UnknownScheduler(String),
    #[error("Submission failed")]
    Submission(#[from] SchedulerError),
    #[error("Options document could not be serialized")]
    Options(#[from] serde_json::Error),
}

/// What a scheduler child of the manager node needs to know about its plugin.
#[derive(Debug, Clone)]
struct PluginSeed {
    working: bool,
    params: BTreeMap<String, Vec<String>>,
}

/// Builds the scheduler manager node: one managed child per configured
/// scheduler entry, with the values discovered by the plugin merged into the
/// child's presets. Entries of non-working plugins are left out.
struct SchedulerManager {
    seeds: BTreeMap<String, PluginSeed>,
}

impl NodeFactory for SchedulerManager {
    fn construct(&self, name: &str, schema: Value, defaults: Value, table: &ClassTable) -> Node {
        let list_schema = schema.get(LIST).cloned().unwrap_or_else(tree::empty);
        let entries = defaults.as_mapping().cloned().unwrap_or_default();
        let mut manager = Node::new(Kind::ManagerChoice, name, schema, defaults, table);

        for (key, child_defaults) in entries {
            let Some(scheduler) = tree::key_string(&key) else {
                continue;
            };
            if tree::is_reserved(&scheduler) {
                continue;
            }

            let child_defaults = match self.seeds.get(&scheduler) {
                Some(seed) if !seed.working => {
                    info!("Omitting scheduler {scheduler}, its plugin is not working");
                    continue;
                }
                Some(seed) => with_discovered(child_defaults, &seed.params),
                None => {
                    warn!("Scheduler {scheduler} has defaults but no plugin, it can't accept jobs");
                    child_defaults
                }
            };

            manager.push_child(Node::new(
                Kind::ManagedChoice,
                scheduler,
                list_schema.clone(),
                child_defaults,
                table,
            ));
        }

        manager
    }
}

fn with_discovered(defaults: Value, params: &BTreeMap<String, Vec<String>>) -> Value {
    let mut defaults = match defaults {
        Value::Null => tree::empty(),
        defaults => defaults,
    };
    let Some(entries) = defaults.as_mapping_mut() else {
        return defaults;
    };

    for (param, computed) in params {
        let preset = entries.get(param.as_str()).cloned().unwrap_or(Value::Null);
        entries.insert(
            Value::String(param.clone()),
            tree::merge_presets(&preset, computed),
        );
    }

    defaults
}

/// A fully resolved choice set, ready to be handed to its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub script: String,
    pub scheduler: String,
    pub substitutions: Substitution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub jobid: String,
    pub scheduler: String,
    pub jobfile: PathBuf,
}

/// Owns the composer tree and the working schedulers of one server process.
///
/// Every request only reads the tree and the schedulers, the job ledger is
/// the only state written after construction.
#[derive(Debug)]
pub struct Coordinator {
    root: Node,
    schedulers: Vec<Schedulers>,
    diagnostics: Vec<LoadReport>,
    scheduler_key: String,
    jobfile_dir: PathBuf,
    // job id -> scheduler name, for jobs submitted by this process
    submitted: RwLock<BTreeMap<String, String>>,
    jobfiles: AtomicU64,
}

impl Coordinator {
    pub fn load(config: &ServerConfig) -> Self {
        let key = config.scheduler_key.as_str();
        let mut loaded = Vec::new();

        for scheduler_config in config.schedulers.iter() {
            let name = scheduler_config.display_name();
            let templates = Templates::layered(
                &config.schema[key][LIST],
                &config.defaults[key][name.as_str()],
            );
            let scheduler = Schedulers::load(scheduler_config, templates);

            if scheduler.working() {
                info!(kind = ?scheduler.kind(), "Loaded scheduler {name}");
            } else {
                warn!(
                    missing = ?scheduler.commands().missing(),
                    "Scheduler {name} is not working and will not be offered"
                );
            }

            loaded.push(scheduler);
        }

        let seeds = loaded
            .iter()
            .map(|scheduler| {
                let seed = PluginSeed {
                    working: scheduler.working(),
                    params: scheduler.params().clone(),
                };

                (scheduler.name().to_string(), seed)
            })
            .collect();

        let mut table = ClassTable::from_names(config.class_table.iter());
        table.register_factory(key, SchedulerManager { seeds });

        let root = Node::new(
            Kind::AutoChoice,
            config.root_name.as_str(),
            config.schema.clone(),
            config.defaults.clone(),
            &table,
        );

        let diagnostics = loaded.iter().map(Schedulers::report).collect();
        let schedulers = loaded
            .into_iter()
            .filter(Schedulers::working)
            .collect();

        Self {
            root,
            schedulers,
            diagnostics,
            scheduler_key: config.scheduler_key.clone(),
            jobfile_dir: config.jobfile_dir.clone(),
            submitted: RwLock::new(BTreeMap::new()),
            jobfiles: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// load reports of every configured scheduler, working or not
    pub fn diagnostics(&self) -> &[LoadReport] {
        &self.diagnostics
    }

    pub fn schedulers(&self) -> &[Schedulers] {
        &self.schedulers
    }

    pub fn scheduler(&self, name: &str) -> Option<&Schedulers> {
        self.schedulers
            .iter()
            .find(|scheduler| scheduler.name() == name)
    }

    pub fn gui_options_json(&self) -> Result<String, CoordinatorError> {
        Ok(self.root.gui_options_json()?)
    }

    /// the working scheduler selected by `choices[scheduler_key]`, provided
    /// its branch resolves to something
    pub fn active_scheduler(&self, choices: &Choices) -> Option<&Schedulers> {
        let manager = self.root.find(&self.scheduler_key)?;
        let (selected, resolved) = manager.active_branch(choices)?;

        if resolved.is_empty() {
            debug!(scheduler = %selected.name(), "Selected scheduler resolved to nothing");
            return None;
        }

        self.scheduler(selected.name())
    }

    /// parse the serialized choices of a client and resolve them
    pub fn handle_choices(&self, document: &str) -> Result<Resolution, CoordinatorError> {
        let choices = parse_choices(document)?;

        self.resolve(&choices)
    }

    pub fn resolve(&self, choices: &Choices) -> Result<Resolution, CoordinatorError> {
        let substitutions = self.root.substitute(choices);
        let script = substitutions
            .get(SCRIPT)
            .cloned()
            .ok_or(CoordinatorError::NoScript)?;
        let scheduler = self
            .active_scheduler(choices)
            .ok_or_else(|| CoordinatorError::NoActiveScheduler(self.scheduler_key.clone()))?;

        debug!(scheduler = %scheduler.name(), "Resolved script:\n{script}");

        Ok(Resolution {
            script,
            scheduler: scheduler.name().to_string(),
            substitutions,
        })
    }

    #[instrument(skip_all, fields(scheduler = %resolution.scheduler))]
    pub fn submit(&self, resolution: &Resolution) -> Result<Submission, CoordinatorError> {
        let scheduler = self
            .scheduler(&resolution.scheduler)
            .ok_or_else(|| CoordinatorError::UnknownScheduler(resolution.scheduler.clone()))?;
        let jobfile = self.next_jobfile(scheduler.name());

        let jobid = scheduler.submit(&resolution.script, &jobfile)?;
        self.submitted
            .write()
            .insert(jobid.clone(), scheduler.name().to_string());

        Ok(Submission {
            jobid,
            scheduler: scheduler.name().to_string(),
            jobfile,
        })
    }

    fn next_jobfile(&self, scheduler: &str) -> PathBuf {
        let sequence = self.jobfiles.fetch_add(1, Ordering::Relaxed);
        // configured names may contain path separators
        let scheduler: String = scheduler
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        self.jobfile_dir
            .join(format!("rcm-{scheduler}-{}-{sequence}.job", process::id()))
    }

    /// scheduler name -> jobs, listed on every working scheduler in parallel
    pub fn get_user_jobs(
        &self,
        username: Option<&str>,
        scheduler: Option<&str>,
    ) -> Result<BTreeMap<String, JobMap>, CoordinatorError> {
        let selected: Vec<&Schedulers> = match scheduler {
            Some(name) => vec![self
                .scheduler(name)
                .ok_or_else(|| CoordinatorError::UnknownScheduler(name.to_string()))?],
            None => self.schedulers.iter().collect(),
        };

        Ok(selected
            .par_iter()
            .map(|scheduler| {
                (
                    scheduler.name().to_string(),
                    scheduler.get_user_jobs(username),
                )
            })
            .collect())
    }

    /// The scheduler that accepted `jobid` through this coordinator.
    pub fn scheduler_of(&self, jobid: &str) -> Option<String> {
        self.submitted.read().get(jobid).cloned()
    }

    /// Kill `jobid` on `scheduler`, or on the scheduler that accepted it.
    pub fn kill_job(&self, jobid: &str, scheduler: Option<&str>) -> bool {
        let Some(name) = scheduler.map(str::to_string).or_else(|| self.scheduler_of(jobid)) else {
            warn!("Job {jobid} was not submitted here, name its scheduler to kill it");
            return false;
        };
        let Some(scheduler) = self.scheduler(&name) else {
            warn!("Scheduler {name} is not loaded, can't kill {jobid}");
            return false;
        };

        let killed = scheduler.kill_job(jobid);
        if killed {
            self.submitted.write().remove(jobid);
        }

        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(source: &str) -> Value {
        serde_yaml::from_str(source).unwrap()
    }

    #[test]
    fn discovered_values_extend_presets() {
        let params = BTreeMap::from([
            ("QUEUE".to_string(), vec!["debug".to_string(), "long".to_string()]),
            ("ACCOUNT".to_string(), vec!["cin_staff".to_string()]),
        ]);

        let merged = with_discovered(yaml("{QUEUE: [long, short], other: 1}"), &params);

        assert_eq!(
            merged,
            yaml("{QUEUE: [long, short, debug], other: 1, ACCOUNT: {cin_staff: {}}}")
        );
        assert_eq!(
            with_discovered(Value::Null, &params)["QUEUE"],
            yaml("{debug: {}, long: {}}")
        );
    }

    #[test]
    fn job_files_stay_in_the_job_directory() {
        let directory = tempfile::tempdir().unwrap();
        let config = ServerConfig::from_yaml(&format!(
            "jobfile_dir: {}\n",
            directory.path().display()
        ))
        .unwrap();
        let coordinator = Coordinator::load(&config);

        let jobfile = coordinator.next_jobfile("../etc/Slurm.prod");

        assert_eq!(jobfile.parent(), Some(directory.path()));
        assert!(jobfile
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("rcm-___etc_Slurm_prod-"));
        assert_ne!(coordinator.next_jobfile("Slurm"), coordinator.next_jobfile("Slurm"));
    }

    #[test]
    fn manager_omits_non_working_plugins() {
        let seeds = BTreeMap::from([
            (
                "Slurm".to_string(),
                PluginSeed {
                    working: true,
                    params: BTreeMap::from([("QUEUE".to_string(), vec!["debug".to_string()])]),
                },
            ),
            (
                "PBS".to_string(),
                PluginSeed {
                    working: false,
                    params: BTreeMap::new(),
                },
            ),
        ]);
        let manager = SchedulerManager { seeds }.construct(
            "SCHEDULER",
            yaml("{list: {QUEUE: {}}}"),
            yaml("{Slurm: {}, PBS: {}, SSH: {}}"),
            &ClassTable::new(),
        );

        let names: Vec<&str> = manager.children().iter().map(Node::name).collect();
        assert_eq!(manager.kind(), Kind::ManagerChoice);
        assert_eq!(names, vec!["Slurm", "SSH"]);
        assert_eq!(
            manager.get_gui_options()["choices"]["Slurm"]["list"]["QUEUE"]["values"],
            yaml("{debug: {}}")
        );
    }
}
