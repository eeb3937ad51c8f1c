use crate::schedulers::{check_executable, SchedulerKind};
use itertools::Itertools;
use rcm_composer::Kind;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Config file {path:?} could not be read")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Config is not valid: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("schedulers[{index}].kind '{kind}' is not one of slurm, pbs or ssh")]
    InvalidSchedulerKind { index: usize, kind: String },
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    // declarative description of every selectable option
    #[serde(default = "empty_document")]
    pub schema: Value,
    // site values, also decide which optional schema branches exist
    #[serde(default = "empty_document")]
    pub defaults: Value,
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
    // schema key -> node kind name for `list` entries
    #[serde(default)]
    pub class_table: BTreeMap<String, String>,

    #[serde(default = "default_root_name")]
    pub root_name: String,
    #[serde(default = "default_scheduler_key")]
    pub scheduler_key: String,
    #[serde(default = "default_jobfile_dir")]
    pub jobfile_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    // defaults to the kind's own name, see SchedulerKind::default_name
    pub name: Option<String>,
    // logical command name -> executable, everything else is looked up on PATH
    #[serde(default)]
    pub commands: BTreeMap<String, PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

impl SchedulerConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.default_name().to_string())
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let source = fs::read_to_string(path).map_err(|source| ConfigErrors::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml(&source)
    }

    pub fn from_yaml(source: &str) -> Result<Self, ConfigErrors> {
        let document = match serde_yaml::from_str(source)? {
            Value::Null => empty_document(),
            document => document,
        };

        if let Some(Value::Sequence(schedulers)) = document.get("schedulers") {
            for (index, scheduler) in schedulers.iter().enumerate() {
                let Some(kind) = scheduler.get("kind") else {
                    continue;
                };
                if serde_yaml::from_value::<SchedulerKind>(kind.clone()).is_err() {
                    return Err(ConfigErrors::InvalidSchedulerKind {
                        index,
                        kind: serde_yaml::to_string(kind)?.trim().to_string(),
                    });
                }
            }
        }

        Ok(serde_yaml::from_value(document)?)
    }

    /// Report every problem at once; `true` if any of them is fatal.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if !self.schema.is_mapping() {
            error!("schema must be a mapping of option names to their description");
            contains_error = true;
        }

        if !(self.defaults.is_mapping() || self.defaults.is_null()) {
            error!("defaults must be a mapping");
            contains_error = true;
        }

        if !self.jobfile_dir.is_dir() {
            error!(
                "jobfile_dir {} is not a directory, job files can't be written",
                self.jobfile_dir.to_string_lossy()
            );
            contains_error = true;
        }

        if self.schedulers.is_empty() {
            warn!("No scheduler was defined, submissions will always fail");
        }

        let duplicates = self
            .schedulers
            .iter()
            .map(SchedulerConfig::display_name)
            .duplicates()
            .collect_vec();
        for name in duplicates {
            error!("Scheduler {name} is defined more than once");
            contains_error = true;
        }

        for scheduler in self.schedulers.iter() {
            let name = scheduler.display_name();

            for (command, path) in scheduler.commands.iter() {
                if !scheduler.kind.commands().contains(&command.as_str()) {
                    warn!("schedulers.{name}.commands.{command} is not used by a {:?} scheduler", scheduler.kind);
                }

                match check_executable(path) {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            "schedulers.{name}.commands.{command} ({}) is not executable, {name} will not be available",
                            path.to_string_lossy()
                        );
                    }
                    Err(e) => {
                        warn!(
                            "Failed to inspect schedulers.{name}.commands.{command} ({}): {e}",
                            path.to_string_lossy()
                        );
                    }
                }
            }
        }

        if self.schema.get(self.scheduler_key.as_str()).is_none() {
            warn!(
                "schema has no '{}' entry, no scheduler can ever be selected",
                self.scheduler_key
            );
        }

        for (key, kind) in self.class_table.iter() {
            if kind.parse::<Kind>().is_err() {
                warn!("class_table.{key} ({kind}) is not a known node kind, the default is used instead");
            }
        }

        contains_error
    }
}

fn empty_document() -> Value {
    Value::Mapping(Default::default())
}

fn default_root_name() -> String {
    "TOP".to_string()
}

fn default_scheduler_key() -> String {
    "SCHEDULER".to_string()
}

fn default_jobfile_dir() -> PathBuf {
    env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn fills_in_defaults() {
        let config = ServerConfig::from_yaml("schedulers:\n  - kind: slurm\n").unwrap();

        assert_eq!(config.root_name, "TOP");
        assert_eq!(config.scheduler_key, "SCHEDULER");
        assert_eq!(config.jobfile_dir, env::temp_dir());
        assert!(config.schema.is_mapping());
        assert_eq!(config.schedulers[0].display_name(), "Slurm");
        assert!(config.logging.filter.is_none());
    }

    #[rstest]
    #[case("slurm", SchedulerKind::Slurm)]
    #[case("pbs", SchedulerKind::Pbs)]
    #[case("ssh", SchedulerKind::Ssh)]
    #[case("os", SchedulerKind::Ssh)]
    fn parses_scheduler_kinds(#[case] kind: &str, #[case] expected: SchedulerKind) {
        let config = ServerConfig::from_yaml(&format!("schedulers: [{{kind: {kind}}}]")).unwrap();

        assert_eq!(config.schedulers[0].kind, expected);
    }

    #[rstest]
    #[case("schedulers: [{kind: slurm}, {kind: lsf}]", 1, "lsf")]
    #[case("schedulers: [{kind: [pbs]}]", 0, "- pbs")]
    fn reports_unknown_scheduler_kinds(#[case] source: &str, #[case] position: usize, #[case] name: &str) {
        assert!(matches!(
            ServerConfig::from_yaml(source),
            Err(ConfigErrors::InvalidSchedulerKind { index, ref kind }) if index == position && kind == name
        ));
    }

    #[rstest]
    #[case("schedulers: [{}]")]
    #[case("unknown_field: 1")]
    #[case("schedulers: [{kind: slurm, queue: debug}]")]
    fn rejects_invalid_documents(#[case] source: &str) {
        assert!(matches!(
            ServerConfig::from_yaml(source),
            Err(ConfigErrors::InvalidYaml(_))
        ));
    }

    #[test]
    fn missing_files_are_reported() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("rcm.yaml");

        assert!(matches!(
            ServerConfig::load(&path),
            Err(ConfigErrors::FileNotFound { .. })
        ));

        fs::write(&path, "root_name: ROOT\n").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().root_name, "ROOT");
    }

    #[test]
    fn preflight_flags_fatal_problems() {
        let directory = tempfile::tempdir().unwrap();
        let valid = format!(
            "schema: {{SCHEDULER: {{list: {{}}}}}}\njobfile_dir: {}\nschedulers: [{{kind: slurm}}, {{kind: ssh}}]\n",
            directory.path().display()
        );
        assert!(!ServerConfig::from_yaml(&valid).unwrap().preflight_checks());

        let mut config = ServerConfig::from_yaml(&valid).unwrap();
        config.schedulers.push(config.schedulers[0].clone());
        assert!(config.preflight_checks());

        let mut config = ServerConfig::from_yaml(&valid).unwrap();
        config.jobfile_dir = directory.path().join("missing");
        assert!(config.preflight_checks());

        let mut config = ServerConfig::from_yaml(&valid).unwrap();
        config.schema = Value::Sequence(Vec::new());
        assert!(config.preflight_checks());
    }
}
