use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use regex::Regex;

/// Outcome of handing one job description to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub description: PathBuf,
    pub batch_name: Option<String>,
    /// Number of jobs the scheduler accepted
    pub jobs: usize,
    /// Not known for dry runs
    pub cluster: Option<u64>,
}

/// The interface for handing job descriptions to a batch scheduler
pub trait Scheduler {
    /// Submit a job description, optionally grouping its jobs under a batch name
    fn submit(&self, description: &Path, batch_name: Option<&str>) -> Result<Submission>;
}

/// Submit through the `condor_submit` command line tool
#[derive(Debug)]
pub struct CondorCli {
    pub program: String,
}

impl Default for CondorCli {
    fn default() -> Self {
        CondorCli { program: "condor_submit".to_string() }
    }
}

impl Scheduler for CondorCli {
    fn submit(&self, description: &Path, batch_name: Option<&str>) -> Result<Submission> {
        if !description.exists() {
            bail!("Job description file {} not found", description.display());
        }

        let mut condor_submit = Command::new(&self.program);
        let cmd = condor_submit.arg(description);
        if let Some(name) = batch_name {
            cmd.arg("-batch-name").arg(name);
        }
        info!("Running condor_submit process");
        info!("{:?}", &cmd);

        let output = cmd
            .output()
            .with_context(|| format!("Failed to run {}, are you on a condor submit node?", self.program))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            bail!(
                "{} exited with {} for {}: {}",
                self.program,
                output.status,
                description.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let (jobs, cluster) = parse_submit_output(&stdout)
            .ok_or_else(|| anyhow!("Could not parse cluster id from condor_submit output: {}", stdout.trim()))?;
        info!("Submitted {jobs} job(s) to cluster {cluster}");

        Ok(Submission {
            description: description.to_path_buf(),
            batch_name: batch_name.map(str::to_string),
            jobs,
            cluster: Some(cluster),
        })
    }
}

/// Don't submit anything, just report what would have been submitted
#[derive(Debug, Default)]
pub struct DryRun;

impl Scheduler for DryRun {
    fn submit(&self, description: &Path, batch_name: Option<&str>) -> Result<Submission> {
        if !description.exists() {
            bail!("Job description file {} not found", description.display());
        }
        info!("--dry-run set, not submitting {}", description.display());
        Ok(Submission {
            description: description.to_path_buf(),
            batch_name: batch_name.map(str::to_string),
            jobs: count_queued(description)?,
            cluster: None,
        })
    }
}

/// Parse `N job(s) submitted to cluster M.` into (N, M)
pub fn parse_submit_output(stdout: &str) -> Option<(usize, u64)> {
    let re = Regex::new(r"(\d+) job\(s\) submitted to cluster (\d+)").ok()?;
    let caps = re.captures(stdout)?;
    let jobs = caps.get(1)?.as_str().parse().ok()?;
    let cluster = caps.get(2)?.as_str().parse().ok()?;
    Some((jobs, cluster))
}

/// Count the jobs a description would queue by reading its queue statements
fn count_queued(description: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(description)
        .with_context(|| format!("Can't read job description {}", description.display()))?;
    let jobs = content
        .lines()
        .map(str::trim)
        .filter_map(|line| match line.strip_prefix("queue") {
            Some(rest) if rest.trim().is_empty() => Some(1),
            Some(rest) => rest.trim().parse::<usize>().ok(),
            None => None,
        })
        .sum();
    Ok(jobs)
}
