use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Number of `crab status` attempts before a task is marked as failed
pub static STATUS_ATTEMPTS: usize = 5;

/// The interface for querying and resubmitting grid tasks
pub trait Crab {
    /// Raw text output of a status query for one task folder
    async fn status(&self, task: &Path) -> Result<String>;

    /// Resubmit the failed jobs of a task
    async fn resubmit(&self, task: &Path) -> Result<()>;
}

/// Talk to grid tasks through the `crab` command line tool
///
/// crab sometimes asks for the grid pass phrase even with a valid proxy, an empty line is
/// always sent on stdin to get past that prompt.
#[derive(Debug)]
pub struct CrabCli {
    pub program: PathBuf,
    /// Exported as X509_USER_PROXY to every crab process
    pub proxy: Option<PathBuf>,
    pub verbose: bool,
    pub status_timeout: Duration,
    pub resubmit_timeout: Duration,
}

impl Default for CrabCli {
    fn default() -> Self {
        CrabCli {
            program: PathBuf::from("crab"),
            proxy: None,
            verbose: false,
            status_timeout: Duration::from_secs(180),
            resubmit_timeout: Duration::from_secs(10000),
        }
    }
}

impl CrabCli {
    fn command(&self, subcommand: &str, task: &Path) -> Command {
        let mut crab = Command::new(&self.program);
        crab.arg(subcommand).arg("-d").arg(task);
        if let Some(proxy) = &self.proxy {
            crab.env("X509_USER_PROXY", proxy);
        }
        crab.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        crab
    }

    /// Run a crab command to completion and return stdout followed by stderr
    ///
    /// A non-zero exit is an error carrying that output.
    async fn run(&self, mut cmd: Command, timeout: Duration) -> Result<String> {
        info!("{:?}", &cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to run {}, did you run cmsenv?", self.program.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            // the pass phrase prompt, crab may exit before reading it
            if let Err(err) = stdin.write_all(b"\n\n").await {
                debug!("crab closed stdin: {err}");
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("crab did not finish within {} seconds", timeout.as_secs()))??;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            bail!("{} exited with {}: {}", self.program.display(), output.status, text.trim());
        }
        Ok(text)
    }
}

impl Crab for CrabCli {
    async fn status(&self, task: &Path) -> Result<String> {
        let mut cmd = self.command("status", task);
        if self.verbose {
            cmd.arg("--verbose");
        }
        self.run(cmd, self.status_timeout).await
    }

    async fn resubmit(&self, task: &Path) -> Result<()> {
        let cmd = self.command("resubmit", task);
        let output = self.run(cmd, self.resubmit_timeout).await?;
        debug!("{output}");
        if output.contains("Error") {
            bail!("crab resubmit failed for {}", task.display());
        }
        Ok(())
    }
}

/// Query a task until crab produces output, giving up after `attempts` tries
pub async fn status_with_retries<C: Crab>(crab: &C, task: &Path, attempts: usize) -> Option<String> {
    for attempt in 1..=attempts {
        match crab.status(task).await {
            Ok(output) if !output.trim().is_empty() => return Some(output),
            Ok(_) => warn!("crab status returned nothing for {} (attempt {attempt}), retrying", task.display()),
            Err(err) => warn!("crab status failed for {} (attempt {attempt}): {err}", task.display()),
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    /// Replays canned status outputs, one per call, and records resubmissions
    #[derive(Default)]
    pub(crate) struct ScriptedCrab {
        pub outputs: RefCell<HashMap<PathBuf, Vec<String>>>,
        pub resubmitted: RefCell<Vec<PathBuf>>,
    }

    impl ScriptedCrab {
        pub(crate) fn with_outputs(task: &Path, outputs: &[&str]) -> ScriptedCrab {
            let crab = ScriptedCrab::default();
            crab.add(task, outputs);
            crab
        }

        pub(crate) fn add(&self, task: &Path, outputs: &[&str]) {
            let mut outputs: Vec<String> = outputs.iter().map(|o| o.to_string()).collect();
            outputs.reverse();
            self.outputs.borrow_mut().insert(task.to_path_buf(), outputs);
        }
    }

    impl Crab for ScriptedCrab {
        async fn status(&self, task: &Path) -> Result<String> {
            let mut outputs = self.outputs.borrow_mut();
            let remaining = outputs.get_mut(task).ok_or_else(|| anyhow!("unknown task"))?;
            Ok(remaining.pop().unwrap_or_default())
        }

        async fn resubmit(&self, task: &Path) -> Result<()> {
            self.resubmitted.borrow_mut().push(task.to_path_buf());
            Ok(())
        }
    }

    /// Write an executable shell script standing in for crab
    fn fake_crab(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("crab");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn status_runs_crab_with_proxy() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_crab(
            dir.path(),
            "echo \"proxy=$X509_USER_PROXY args=$*\"\nif read line; then echo answered; fi\necho warning >&2",
        );
        let crab = CrabCli {
            program,
            proxy: Some(PathBuf::from("/tmp/x509up_u1000")),
            verbose: true,
            ..CrabCli::default()
        };

        let output = crab.status(Path::new("prod/sample/version")).await.unwrap();
        assert_eq!(
            output,
            "proxy=/tmp/x509up_u1000 args=status -d prod/sample/version --verbose\nanswered\nwarning\n"
        );
    }

    #[tokio::test]
    async fn slow_crab_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let crab = CrabCli {
            program: fake_crab(dir.path(), "sleep 5"),
            status_timeout: Duration::from_millis(100),
            ..CrabCli::default()
        };
        let err = crab.status(Path::new("prod/sample/version")).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }

    #[tokio::test]
    async fn failing_resubmit() {
        let dir = tempfile::TempDir::new().unwrap();
        let crab = CrabCli { program: fake_crab(dir.path(), "echo resubmitting\nexit 3"), ..CrabCli::default() };
        let err = crab.resubmit(Path::new("prod/sample/version")).await.unwrap_err();
        assert!(err.to_string().contains("resubmitting"));

        let crab = CrabCli { program: fake_crab(dir.path(), "echo Error: task not found"), ..CrabCli::default() };
        assert!(crab.resubmit(Path::new("prod/sample/version")).await.is_err());

        let crab = CrabCli { program: fake_crab(dir.path(), "echo Resubmit request sent"), ..CrabCli::default() };
        assert!(crab.resubmit(Path::new("prod/sample/version")).await.is_ok());

        let crab = CrabCli { program: dir.path().join("missing"), ..CrabCli::default() };
        assert!(crab.resubmit(Path::new("prod/sample/version")).await.is_err());
    }

    #[tokio::test]
    async fn retries_until_output() {
        let task = Path::new("prod/sample/version");
        let crab = ScriptedCrab::with_outputs(task, &["", "  \n", "Jobs status: finished 100.0%"]);
        let output = status_with_retries(&crab, task, STATUS_ATTEMPTS).await;
        assert_eq!(output.as_deref(), Some("Jobs status: finished 100.0%"));
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let task = Path::new("prod/sample/version");
        let crab = ScriptedCrab::with_outputs(task, &["", "", "", "", "", "too late"]);
        assert_eq!(status_with_retries(&crab, task, STATUS_ATTEMPTS).await, None);
        assert_eq!(status_with_retries(&crab, Path::new("unknown"), 2).await, None);
    }
}
