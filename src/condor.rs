//! Write HTCondor job scripts and job descriptions, and submit them
//!
//! Two ingredients make a condor job: an executable (here always a generated bash script) and a
//! job description (`.sub`) that points at it. See the
//! [HTCondor manual](https://htcondor.readthedocs.io/en/latest/users-manual/index.html).

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Unique file names within a script folder
pub mod naming;
/// Executable bash scripts with a CMSSW environment preamble
pub mod script;
/// Job description files
pub mod description;
/// Hand job descriptions to the scheduler
pub mod submit;
/// Commands in, submitted jobs and clusters out
pub mod cluster;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("already {limit} files named {name} exist; consider choosing more specific names, splitting in folders, etc.")]
    NamesExhausted { name: String, limit: usize },
    #[error("commands are not compatible to put in same cluster: `{first}` vs `{other}`")]
    IncompatibleCommands { first: String, other: String },
    #[error("no commands given for job {0}")]
    NoCommands(String),
}

/// Where generated files go, shared by every job in one invocation
#[derive(Debug, Clone)]
pub struct JobLayout {
    /// Folder for generated .sh and .sub files
    pub script_folder: PathBuf,
    /// Folder for stdout, stderr and condor log files, relative to `base_dir`
    pub log_folder: PathBuf,
    /// Absolute directory the log folder lives in (normally the submission directory)
    pub base_dir: PathBuf,
    pub outputs: OutputNames,
    pub resources: Resources,
}

impl JobLayout {
    pub fn new(script_folder: &Path, log_folder: &Path, base_dir: &Path) -> JobLayout {
        JobLayout {
            script_folder: script_folder.to_path_buf(),
            log_folder: log_folder.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            outputs: OutputNames::default(),
            resources: Resources::default(),
        }
    }

    pub fn script_path(&self, file_name: &str) -> PathBuf {
        self.script_folder.join(file_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join(&self.log_folder)
    }
}

/// Overrides for the stdout, stderr and log file names (defaults derive from the job name)
#[derive(Debug, Clone, Default)]
pub struct OutputNames {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub log: Option<String>,
}

/// Resource requests, only written to the description when set
#[derive(Debug, Clone, Copy, Default)]
pub struct Resources {
    pub cpus: Option<u32>,
    /// MB
    pub memory: Option<u32>,
    /// KB
    pub disk: Option<u32>,
}

/// Drop the extension from a job name (`skim.sh` -> `skim`)
pub fn stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_extension() {
        assert_eq!(stem("SkimNano"), "SkimNano");
        assert_eq!(stem("SkimNano.sh"), "SkimNano");
        assert_eq!(stem("merge.v2.sub"), "merge.v2");
    }

    #[test]
    fn log_dir_is_under_base() {
        let layout = JobLayout::new(Path::new("Scripts/condor"), Path::new("logs"), Path::new("/work"));
        assert_eq!(layout.log_dir(), PathBuf::from("/work/logs"));
        assert_eq!(layout.script_path("a0.sh"), PathBuf::from("Scripts/condor/a0.sh"));
    }
}
