//! Turn shell commands into condor jobs
//!
//! Every operation generates a uniquely numbered `.sh` script and `.sub` description in the
//! script folder, then hands the description to a [Scheduler]. Three groupings exist:
//! - one job per command set, each with its own script and description
//! - one cluster of jobs that share an executable, differing only in arguments
//! - one cluster of jobs that share a script, which selects a command set by process id

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use thiserror::Error;

use crate::condor::description::JobDescription;
use crate::condor::naming::make_unique;
use crate::condor::script::JobScript;
use crate::condor::submit::{Scheduler, Submission};
use crate::condor::{stem, ClusterError, JobLayout};
use crate::config::Environment;

/// A submitted job description and the script it runs
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub script: PathBuf,
    pub submission: Submission,
}

/// The scheduler accepted `submitted` before a later submission failed
#[derive(Debug, Error)]
#[error("submission stopped after {} accepted job description(s): {reason}", .submitted.len())]
pub struct PartialSubmission {
    pub submitted: Vec<SubmittedJob>,
    pub reason: String,
}

impl PartialSubmission {
    /// Attach what was already accepted to `err`, which is returned as is when nothing was
    pub fn wrap(mut submitted: Vec<SubmittedJob>, err: anyhow::Error) -> anyhow::Error {
        let reason = match err.downcast::<PartialSubmission>() {
            Ok(partial) => {
                submitted.extend(partial.submitted);
                partial.reason
            }
            Err(err) if submitted.is_empty() => return err,
            Err(err) => format!("{err:#}"),
        };
        PartialSubmission { submitted, reason }.into()
    }

    /// Jobs accepted before `err` happened
    pub fn accepted(err: &anyhow::Error) -> &[SubmittedJob] {
        err.downcast_ref::<PartialSubmission>()
            .map(|partial| partial.submitted.as_slice())
            .unwrap_or_default()
    }
}

pub struct Submitter<'a> {
    pub layout: &'a JobLayout,
    pub env: &'a Environment,
    pub scheduler: &'a dyn Scheduler,
}

/// Unique script and description file names for a job
struct JobNames {
    name: String,
    script: String,
    description: String,
}

impl<'a> Submitter<'a> {
    pub fn new(layout: &'a JobLayout, env: &'a Environment, scheduler: &'a dyn Scheduler) -> Submitter<'a> {
        Submitter { layout, env, scheduler }
    }

    /// Submit a single command (executable and arguments) as a single job
    pub fn submit_command_as_job(&self, name: &str, command: &str) -> Result<Vec<SubmittedJob>> {
        self.submit_commands_as_jobs(name, &[vec![command.to_string()]])
    }

    /// Submit several arbitrary commands that run one after the other in a single job
    pub fn submit_commands_as_job(&self, name: &str, commands: &[String]) -> Result<Vec<SubmittedJob>> {
        self.submit_commands_as_jobs(name, &[commands.to_vec()])
    }

    /// Submit one job per command set, each with its own script and description
    pub fn submit_commands_as_jobs(&self, name: &str, command_sets: &[Vec<String>]) -> Result<Vec<SubmittedJob>> {
        if command_sets.is_empty() || command_sets.iter().any(|set| set.is_empty()) {
            return Err(ClusterError::NoCommands(name.to_string()).into());
        }

        let mut submitted = Vec::new();
        for set in command_sets {
            match self.submit_set(name, set) {
                Ok(job) => submitted.push(job),
                Err(err) => return Err(PartialSubmission::wrap(submitted, err)),
            }
        }
        Ok(submitted)
    }

    fn submit_set(&self, name: &str, set: &[String]) -> Result<SubmittedJob> {
        let names = self.unique_names(name)?;
        let script = JobScript::init(&names.script, &self.layout.script_folder, self.env, None)?;
        script.append_commands(set)?;

        let description = JobDescription::new(&names.name, &script.file_name())
            .with_file_name(&names.description)
            .write(self.layout)?;
        description.append_queue(None)?;

        let submission = self.scheduler.submit(&description.path, Some(&names.name))?;
        Ok(SubmittedJob { script: script.path, submission })
    }

    /// Submit commands that share an executable and argument count as one cluster
    ///
    /// The script forwards its arguments to the executable and every command becomes an
    /// `arguments`/`queue` pair in the description. Incompatible commands fail before anything
    /// is written.
    pub fn submit_commands_as_cluster(&self, name: &str, commands: &[String]) -> Result<Vec<SubmittedJob>> {
        let parsed = split_compatible(commands).map_err(|err| match err {
            ClusterError::NoCommands(_) => ClusterError::NoCommands(name.to_string()),
            other => other,
        })?;
        let exe = parsed[0].0;

        let names = self.unique_names(name)?;
        let script = JobScript::init(&names.script, &self.layout.script_folder, self.env, None)?;
        script.append_forwarding(exe)?;

        let description = JobDescription::new(&names.name, &script.file_name())
            .with_file_name(&names.description)
            .write(self.layout)?;
        for (_, arguments) in &parsed {
            description.append_queue(Some(*arguments))?;
        }

        let submission = self.scheduler.submit(&description.path, Some(&names.name))?;
        Ok(vec![SubmittedJob { script: script.path, submission }])
    }

    /// Submit command sets as one cluster, with one job per set
    ///
    /// A single script holds every set and runs the one matching the job's process id.
    pub fn submit_command_sets_as_cluster(
        &self,
        name: &str,
        command_sets: &[Vec<String>],
        cwd: Option<&Path>,
    ) -> Result<Vec<SubmittedJob>> {
        if command_sets.is_empty() {
            return Err(ClusterError::NoCommands(name.to_string()).into());
        }

        let names = self.unique_names(name)?;
        let script = JobScript::init(&names.script, &self.layout.script_folder, self.env, cwd)?;
        script.append_command_sets(command_sets)?;

        let description = JobDescription::new(&names.name, &script.file_name())
            .with_file_name(&names.description)
            .write(self.layout)?;
        description.append_proc_queue(command_sets.len())?;

        info!("Submitting cluster {} with {} jobs", names.name, command_sets.len());
        let submission = self.scheduler.submit(&description.path, Some(&names.name))?;
        Ok(vec![SubmittedJob { script: script.path, submission }])
    }

    /// Write a description next to an existing executable script and submit it as one job
    pub fn submit_script_as_job(&self, script: &Path) -> Result<Vec<SubmittedJob>> {
        let script = self.env.absolute(script);
        let file_name = script
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .with_context(|| format!("{} is not a script", script.display()))?;
        let folder = script.parent().map(Path::to_path_buf).unwrap_or_default();
        let layout = JobLayout { script_folder: folder.clone(), ..self.layout.clone() };

        let name = stem(&file_name);
        let description_name = make_unique(&format!("{name}.sub"), &folder)?;
        let description = JobDescription::new(&name, &file_name)
            .with_file_name(&description_name)
            .write(&layout)?;
        description.append_queue(None)?;

        let submission = self.scheduler.submit(&description.path, Some(&name))?;
        Ok(vec![SubmittedJob { script, submission }])
    }

    fn unique_names(&self, name: &str) -> Result<JobNames, ClusterError> {
        let name = stem(name);
        let folder = &self.layout.script_folder;
        let script = make_unique(&format!("{name}.sh"), folder)?;
        let description = make_unique(&format!("{name}.sub"), folder)?;
        Ok(JobNames { name, script, description })
    }
}

/// Split commands into executable and argument string, checking they fit in one cluster
///
/// All commands need the same executable (first word) and the same number of arguments.
fn split_compatible(commands: &[String]) -> Result<Vec<(&str, &str)>, ClusterError> {
    let first = commands.first().ok_or_else(|| ClusterError::NoCommands(String::new()))?;
    let parsed: Vec<(&str, &str)> = commands
        .iter()
        .map(|command| command.trim().split_once(' ').unwrap_or((command.trim(), "")))
        .collect();

    let (exe, arguments) = parsed[0];
    let n_args = arguments.split_whitespace().count();
    for (command, (this_exe, this_arguments)) in commands.iter().zip(&parsed) {
        if *this_exe != exe || this_arguments.split_whitespace().count() != n_args {
            return Err(ClusterError::IncompatibleCommands { first: first.clone(), other: command.clone() });
        }
    }
    Ok(parsed)
}
