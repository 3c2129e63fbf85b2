use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::condor::{stem, JobLayout};

/// A single job description, before it is written to disk
///
/// The executable is named relative to the script folder. Output, error and log file names
/// default to `<name>_{out,err,log}_$(ClusterId)_$(ProcId).txt` unless the layout overrides them.
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub name: String,
    pub executable: String,
    pub arguments: Option<String>,
    pub file_name: String,
}

/// A job description file that exists on disk and can receive queue statements
#[derive(Debug, Clone)]
pub struct DescriptionPath {
    pub path: PathBuf,
}

/// Rendering context for the description header
#[derive(Serialize)]
struct DescriptionContext {
    executable: String,
    arguments: Option<String>,
    output: String,
    error: String,
    log: String,
    cpus: Option<u32>,
    memory: Option<u32>,
    disk: Option<u32>,
}

impl JobDescription {
    pub fn new(name: &str, executable: &str) -> JobDescription {
        let name = stem(name);
        JobDescription {
            file_name: format!("{name}.sub"),
            name,
            executable: executable.to_string(),
            arguments: None,
        }
    }

    /// Space separated arguments passed to the executable
    pub fn with_arguments(mut self, arguments: &str) -> JobDescription {
        self.arguments = Some(arguments.to_string());
        self
    }

    pub fn with_file_name(mut self, file_name: &str) -> JobDescription {
        self.file_name = file_name.to_string();
        self
    }

    /// Write the description header into the script folder, replacing any file with the same name
    ///
    /// Fails if the executable doesn't exist, a description must always reference a real script.
    /// The log folder is created if needed. No queue statement is written yet.
    pub fn write(&self, layout: &JobLayout) -> Result<DescriptionPath> {
        let path = layout.script_path(&self.file_name);
        if path.exists() {
            warn!("Job description {} already exists and will be overwritten", path.display());
            fs::remove_file(&path).with_context(|| format!("Can't remove {}", path.display()))?;
        }

        let executable = layout.script_path(&self.executable);
        if !executable.exists() {
            bail!("Executable {} for job description {} not found", executable.display(), path.display());
        }

        let log_dir = layout.log_dir();
        if !log_dir.exists() {
            info!("Creating log folder {}", log_dir.display());
            fs::create_dir_all(&log_dir).with_context(|| format!("Can't create {}", log_dir.display()))?;
        }

        let outputs = &layout.outputs;
        let default_name = |kind: &str| format!("{}_{kind}_$(ClusterId)_$(ProcId).txt", self.name);
        let context = DescriptionContext {
            executable: executable.display().to_string(),
            arguments: self.arguments.clone(),
            output: log_dir.join(outputs.stdout.clone().unwrap_or_else(|| default_name("out"))).display().to_string(),
            error: log_dir.join(outputs.stderr.clone().unwrap_or_else(|| default_name("err"))).display().to_string(),
            log: log_dir.join(outputs.log.clone().unwrap_or_else(|| default_name("log"))).display().to_string(),
            cpus: layout.resources.cpus,
            memory: layout.resources.memory,
            disk: layout.resources.disk,
        };

        let content = render_description(&context)?;
        fs::write(&path, content).with_context(|| format!("Can't write job description {}", path.display()))?;
        info!("Created job description {}", path.display());

        Ok(DescriptionPath { path })
    }
}

impl DescriptionPath {
    /// Queue a single job, optionally with its own arguments
    pub fn append_queue(&self, arguments: Option<&str>) -> Result<()> {
        let content = match arguments {
            Some(arguments) => format!("arguments = \"{arguments}\"\nqueue\n\n"),
            None => "queue\n\n".to_string(),
        };
        self.append(&content)
    }

    /// Queue `n` jobs that each receive their process id as only argument
    pub fn append_proc_queue(&self, n: usize) -> Result<()> {
        self.append(&format!("arguments = $(ProcId)\nqueue {n}\n\n"))
    }

    fn append(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Can't open job description {}", self.path.display()))?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

/// Render the description header using TinyTemplate
fn render_description(context: &DescriptionContext) -> Result<String> {
    /// included job description template
    static DESCRIPTION: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/description.txt"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("description", DESCRIPTION)?;
    Ok(tt.render("description", context)?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::condor::Resources;

    fn layout_with_script(dir: &TempDir) -> JobLayout {
        let layout = JobLayout::new(&dir.path().join("scripts"), Path::new("logs"), dir.path());
        fs::create_dir_all(&layout.script_folder).unwrap();
        fs::write(layout.script_path("job0.sh"), "#!/bin/bash\n").unwrap();
        layout
    }

    #[test]
    fn default_output_names() {
        let dir = TempDir::new().unwrap();
        let layout = layout_with_script(&dir);
        let written = JobDescription::new("job.sh", "job0.sh").write(&layout).unwrap();

        assert_eq!(written.path, layout.script_path("job.sub"));
        let logs = dir.path().join("logs");
        assert!(logs.is_dir());
        let expected = format!(
            "executable = {}\noutput = {}/job_out_$(ClusterId)_$(ProcId).txt\n\
             error = {}/job_err_$(ClusterId)_$(ProcId).txt\nlog = {}/job_log_$(ClusterId)_$(ProcId).txt\n\n",
            layout.script_path("job0.sh").display(),
            logs.display(),
            logs.display(),
            logs.display(),
        );
        assert_eq!(fs::read_to_string(&written.path).unwrap(), expected);
    }

    #[test]
    fn arguments_resources_and_overrides() {
        let dir = TempDir::new().unwrap();
        let mut layout = layout_with_script(&dir);
        layout.outputs.stdout = Some("custom.out".to_string());
        layout.resources = Resources { cpus: Some(4), memory: Some(2048), disk: None };

        let written = JobDescription::new("job", "job0.sh")
            .with_arguments("-i a.root -n 10")
            .with_file_name("job3.sub")
            .write(&layout)
            .unwrap();
        assert_eq!(written.path, layout.script_path("job3.sub"));

        let content = fs::read_to_string(&written.path).unwrap();
        assert!(content.contains("arguments = \"-i a.root -n 10\"\n\n"));
        assert!(content.contains(&format!("output = {}\n", dir.path().join("logs/custom.out").display())));
        assert!(content.contains("error = "));
        assert!(content.ends_with("request_cpus = 4\nrequest_memory = 2048\n\n"));
        assert!(!content.contains("request_disk"));
    }

    #[test]
    fn missing_executable_is_rejected() {
        let dir = TempDir::new().unwrap();
        let layout = layout_with_script(&dir);
        let result = JobDescription::new("job", "other.sh").write(&layout);
        assert!(result.is_err());
        assert!(!layout.script_path("job.sub").exists());
    }

    #[test]
    fn queue_statements() {
        let dir = TempDir::new().unwrap();
        let layout = layout_with_script(&dir);
        let written = JobDescription::new("job", "job0.sh").write(&layout).unwrap();
        written.append_queue(Some("-i a.root")).unwrap();
        written.append_queue(None).unwrap();
        written.append_proc_queue(7).unwrap();

        let content = fs::read_to_string(&written.path).unwrap();
        assert!(content.ends_with("arguments = \"-i a.root\"\nqueue\n\nqueue\n\narguments = $(ProcId)\nqueue 7\n\n"));
    }
}
