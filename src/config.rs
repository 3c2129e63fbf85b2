use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;

/// Mount prefix that shows up in CMSSW_BASE on the T2 user interfaces but not in the working path
static STORAGE_MOUNT: &str = "/storage_mnt/storage";

/// Process environment read once at start up and passed down explicitly
#[derive(Debug, Clone)]
pub struct Environment {
    pub cmssw_base: String,
    pub user: String,
    pub home: PathBuf,
    pub cwd: PathBuf,
}

impl Environment {
    pub fn from_env() -> Result<Environment> {
        let cwd = env::current_dir().context("Can't read current directory")?;
        let cmssw_base = env::var("CMSSW_BASE").unwrap_or_else(|_| {
            warn!("CMSSW_BASE is not set, did you run cmsenv?");
            String::new()
        });
        let user = env::var("USER").unwrap_or_default();
        let home = env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| cwd.clone());
        Ok(Environment { cmssw_base, user, home, cwd })
    }

    /// Check if cmsenv was run in (a parent of) the current directory
    pub fn has_cmsenv(&self) -> bool {
        let target = self.cmssw_base.replace(STORAGE_MOUNT, "");
        !target.is_empty() && self.cwd.to_string_lossy().contains(&target)
    }

    /// Make a path absolute relative to the working directory
    pub fn absolute(&self, path: &Path) -> PathBuf {
        match path.is_absolute() {
            true => path.to_path_buf(),
            false => self.cwd.join(path),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_environment(cwd: &Path) -> Environment {
    Environment {
        cmssw_base: "/user/someone/CMSSW_13_0_0".to_string(),
        user: "someone".to_string(),
        home: cwd.join("home"),
        cwd: cwd.to_path_buf(),
    }
}
