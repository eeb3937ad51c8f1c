use super::SchedulerError;
use std::{
    collections::BTreeMap,
    env,
    ffi::{OsStr, OsString},
    fs, io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, trace, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> io::Result<bool> {
    let metadata = fs::metadata(path)?;

    Ok(metadata.is_file() && (metadata.mode() & 0o111) != 0)
}

fn executable(path: &Path) -> Option<PathBuf> {
    matches!(check_executable(path), Ok(true)).then(|| path.to_path_buf())
}

/// look `name` up on `PATH`, names containing a separator are taken as paths
fn which(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);

    if candidate.components().count() > 1 {
        return executable(candidate);
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).find_map(|directory| executable(&directory.join(name)))
    })
}

/// Logical command name -> resolved executable, `None` when unbound.
///
/// Resolved once when a scheduler is loaded and never changed afterwards.
#[derive(Debug, Clone, Default)]
pub struct Commands {
    bindings: BTreeMap<String, Option<PathBuf>>,
}

impl Commands {
    /// bind each of `names`, preferring the configured `overrides` over `PATH`
    pub fn resolve(names: &[&str], overrides: &BTreeMap<String, PathBuf>) -> Self {
        let bindings = names
            .iter()
            .map(|name| {
                let binding = match overrides.get(*name) {
                    Some(path) => executable(path),
                    None => which(name),
                };

                match &binding {
                    Some(path) => debug!(command = %name, path = ?path, "Command found"),
                    None => warn!(command = %name, "Command not found"),
                }

                (name.to_string(), binding)
            })
            .collect();

        Self { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.bindings.get(name).and_then(|binding| binding.as_deref())
    }

    /// logical names without an executable
    pub fn missing(&self) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, binding)| binding.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.bindings.values().all(Option::is_some)
    }

    /// Run a bound command to completion and return its standard output.
    pub fn run<I, S>(&self, name: &str, args: I) -> Result<String, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let path = self
            .get(name)
            .ok_or_else(|| SchedulerError::CommandUnavailable(name.to_string()))?;
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();

        debug!(command = %name, args = ?args, "Running command");

        let output = Command::new(path)
            .args(&args)
            .output()
            .map_err(|source| SchedulerError::Spawn {
                command: name.to_string(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        trace!(command = %name, "Output: {stdout}");

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(SchedulerError::CommandFailed {
                command: name.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
