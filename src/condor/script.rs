use std::fs;
use std::fs::{OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::condor::stem;
use crate::config::Environment;

/// An executable bash script that a job description points at
///
/// Every script starts with a preamble that sets up the CMSSW runtime environment and the grid
/// proxy, then moves to the submission directory. The user commands are appended after that.
#[derive(Debug, Clone)]
pub struct JobScript {
    pub path: PathBuf,
}

/// Rendering context for the environment preamble
#[derive(Serialize)]
struct PreambleContext {
    cmssw_base: String,
    cwd: String,
    script: String,
}

impl JobScript {
    /// Create `folder/<name>.sh` holding only the preamble, replacing any existing script
    ///
    /// `cwd` is where the job moves to before running commands, the current directory if unset.
    pub fn init(name: &str, folder: &Path, env: &Environment, cwd: Option<&Path>) -> Result<JobScript> {
        let path = folder.join(format!("{}.sh", stem(name)));
        if path.exists() {
            warn!("Job script {} already exists and will be overwritten", path.display());
            fs::remove_file(&path).with_context(|| format!("Can't remove {}", path.display()))?;
        }
        if !folder.as_os_str().is_empty() && !folder.exists() {
            info!("Creating script folder {}", folder.display());
            fs::create_dir_all(folder).with_context(|| format!("Can't create {}", folder.display()))?;
        }

        let cwd = cwd.map(|p| env.absolute(p)).unwrap_or_else(|| env.cwd.clone());
        let preamble = render_preamble(env, &cwd, &path)?;
        fs::write(&path, preamble).with_context(|| format!("Can't write job script {}", path.display()))?;
        fs::set_permissions(&path, Permissions::from_mode(0o755))
            .with_context(|| format!("Can't make {} executable", path.display()))?;

        info!("Created job script {}", path.display());
        Ok(JobScript { path })
    }

    /// File name of the script, as referenced from a job description in the same folder
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Append commands, one per line
    pub fn append_commands(&self, commands: &[String]) -> Result<()> {
        let mut content = String::new();
        for command in commands {
            content.push_str(command);
            content.push('\n');
        }
        self.append(&content)
    }

    /// Append a call to `exe` that forwards all job arguments
    pub fn append_forwarding(&self, exe: &str) -> Result<()> {
        self.append(&format!("{exe} $@\n"))
    }

    /// Append one block per command set, selected by the first job argument (the process id)
    pub fn append_command_sets(&self, sets: &[Vec<String>]) -> Result<()> {
        let mut content = String::new();
        for (i, set) in sets.iter().enumerate() {
            content.push_str(&format!("if [ $1 -eq {i} ]; then\n"));
            for command in set {
                content.push_str("  ");
                content.push_str(command);
                content.push('\n');
            }
            content.push_str("fi\n");
        }
        self.append(&content)
    }

    fn append(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Can't open job script {}", self.path.display()))?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

/// Render the environment preamble using TinyTemplate
fn render_preamble(env: &Environment, cwd: &Path, script: &Path) -> Result<String> {
    /// included preamble template
    static PREAMBLE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/preamble.txt"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("preamble", PREAMBLE)?;

    let context = PreambleContext {
        cmssw_base: env.cmssw_base.clone(),
        cwd: cwd.display().to_string(),
        script: script.display().to_string(),
    };

    Ok(tt.render("preamble", &context)?)
}
