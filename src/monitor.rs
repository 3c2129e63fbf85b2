//! Monitor grid tasks and publish their progress as a static web page
//!
//! A crab directory groups the task folders of a production as `production/sample/version`.
//! Every pass queries each task with `crab status`, optionally resubmits failed jobs, and renders
//! the result to `~/public_html/<webpage>/index.html`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Local;
use log::{debug, info, warn};

use crate::monitor::crab::{status_with_retries, Crab, STATUS_ATTEMPTS};
use crate::monitor::status::TaskStatus;
use crate::monitor::web::{write_page, MonitorData};
use crate::request::read::glob_paths;

/// Run crab and read its output
pub mod crab;
/// Scrape job states from crab output
pub mod status;
/// Render the status page
pub mod web;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub crab_dir: PathBuf,
    pub web_path: PathBuf,
    pub resubmit: bool,
    /// Only process the first task
    pub test: bool,
    pub force: bool,
    pub print_raw: bool,
    /// Shown in the meta-info table of the page
    pub meta: Vec<(String, String)>,
}

/// Task folders three levels below the crab directory, relative to it and sorted
pub fn discover_tasks(crab_dir: &Path) -> Result<Vec<PathBuf>> {
    if !crab_dir.is_dir() {
        bail!("crab directory {} does not exist", crab_dir.display());
    }
    let level: Vec<PathBuf> = glob_paths(crab_dir, "*/*/*")?.into_iter().filter(|p| p.is_dir()).collect();
    let mut tasks: Vec<PathBuf> = level
        .iter()
        .filter_map(|p| p.strip_prefix(crab_dir).ok().map(Path::to_path_buf))
        .collect();
    tasks.sort();
    Ok(tasks)
}

/// Query every task once and write the status page
pub async fn run_once<C: Crab>(crab: &C, options: &MonitorOptions) -> Result<MonitorData> {
    let mut tasks = discover_tasks(&options.crab_dir)?;
    if options.test && tasks.len() > 1 {
        warn!("Running in test mode, will only process 1 out of {} samples", tasks.len());
        tasks.truncate(1);
    }

    let mut data = MonitorData::default();
    data.meta.extend(options.meta.iter().cloned());

    let n_tasks = tasks.len();
    for (i, task) in tasks.iter().enumerate() {
        info!("Now processing sample {} of {n_tasks} ({})", i + 1, task.display());
        let key = task.to_string_lossy().to_string();
        let task_dir = options.crab_dir.join(task);

        let Some(output) = status_with_retries(crab, &task_dir, STATUS_ATTEMPTS).await else {
            warn!("crab status seems to have failed, skipping this sample");
            data.samples.insert(key, TaskStatus::crab_failed());
            continue;
        };
        match options.print_raw {
            true => info!("{output}"),
            false => debug!("{output}"),
        }

        let mut status = TaskStatus::parse(&output);
        status.check_report(&task_dir);
        for (state, fraction) in &status.status {
            info!("Percentage {state}: {fraction}");
        }

        if status.has_failed_jobs() && options.resubmit {
            info!("Found failed jobs, now resubmitting");
            if let Err(err) = crab.resubmit(&task_dir).await {
                warn!("Resubmission failed for {}: {err}", task.display());
            }
        }
        if status.completed {
            info!("This task is completed");
        }

        data.samples.insert(key, status);
    }

    info!("Loop over all samples completed");
    write_page(&data, &options.web_path, options.force, &Local::now())?;
    Ok(data)
}

/// Repeat [run_once] `iterations` times, sleeping in between
///
/// A failed pass is logged and doesn't stop the loop, the next pass may well succeed.
pub async fn run_loop<C: Crab>(crab: &C, options: &MonitorOptions, iterations: usize, sleep: Duration) -> Result<()> {
    let total = sleep.as_secs() * iterations as u64;
    info!(
        "Estimated runtime: {total} seconds ({:.2} hours, {:.2} days)",
        total as f64 / 3600.0,
        total as f64 / (3600.0 * 24.0)
    );

    for i in 0..iterations {
        info!("Monitoring iteration {} of {iterations}", i + 1);
        if let Err(err) = run_once(crab, options).await {
            match iterations {
                1 => return Err(err),
                _ => warn!("Monitoring iteration {} failed: {err:#}", i + 1),
            }
        }
        if i + 1 < iterations {
            tokio::time::sleep(sleep).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::monitor::crab::tests::ScriptedCrab;

    static FAILED: &str = "Jobs status:   finished   50.0% (1/2)\n               failed     50.0% (1/2)\n";
    static DONE: &str = "Status on the scheduler:\tCOMPLETED\nJobs status:   finished   100.0% (2/2)\n";

    fn crab_dir(dir: &TempDir) -> PathBuf {
        let crab_dir = dir.path().join("crablogs");
        for task in ["prod/WZ_Tune/crab_v1", "prod/TTTo2L2Nu_Tune/crab_v1", "prod/TTTo2L2Nu_Tune/crab_v2"] {
            fs::create_dir_all(crab_dir.join(task)).unwrap();
        }
        fs::write(crab_dir.join("prod/README"), "").unwrap();
        fs::write(crab_dir.join("prod/WZ_Tune/crab.log"), "").unwrap();
        fs::create_dir_all(crab_dir.join(".snapshot/hourly/prod")).unwrap();
        fs::create_dir_all(crab_dir.join("prod/.cache/crab_v1")).unwrap();
        crab_dir
    }

    fn options(dir: &TempDir) -> MonitorOptions {
        MonitorOptions {
            crab_dir: crab_dir(dir),
            web_path: dir.path().join("public_html/crab_status"),
            resubmit: true,
            test: false,
            force: false,
            print_raw: false,
            meta: vec![("generating program".to_string(), "condorskim".to_string())],
        }
    }

    #[test]
    fn tasks_are_three_levels_deep() {
        let dir = TempDir::new().unwrap();
        let tasks = discover_tasks(&crab_dir(&dir)).unwrap();
        assert_eq!(tasks, vec![
            PathBuf::from("prod/TTTo2L2Nu_Tune/crab_v1"),
            PathBuf::from("prod/TTTo2L2Nu_Tune/crab_v2"),
            PathBuf::from("prod/WZ_Tune/crab_v1"),
        ]);
        assert!(discover_tasks(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn one_pass() {
        let dir = TempDir::new().unwrap();
        let options = options(&dir);
        let crab = ScriptedCrab::default();
        crab.add(&options.crab_dir.join("prod/TTTo2L2Nu_Tune/crab_v1"), &[FAILED]);
        crab.add(&options.crab_dir.join("prod/TTTo2L2Nu_Tune/crab_v2"), &[DONE]);
        crab.add(&options.crab_dir.join("prod/WZ_Tune/crab_v1"), &["", "", "", "", ""]);
        let reported = options.crab_dir.join("prod/WZ_Tune/crab_v2");
        fs::create_dir_all(reported.join("results")).unwrap();
        fs::write(reported.join("results/processedLumis.json"), "{}").unwrap();
        crab.add(&reported, &[DONE]);

        let data = run_once(&crab, &options).await.unwrap();

        assert_eq!(data.samples["prod/TTTo2L2Nu_Tune/crab_v1"].fraction("failed"), 50.0);
        assert!(data.samples["prod/TTTo2L2Nu_Tune/crab_v2"].completed);
        assert!(!data.samples["prod/WZ_Tune/crab_v2"].completed);
        assert_eq!(data.samples["prod/WZ_Tune/crab_v1"], TaskStatus::crab_failed());
        assert_eq!(*crab.resubmitted.borrow(), vec![options.crab_dir.join("prod/TTTo2L2Nu_Tune/crab_v1")]);
        assert!(options.web_path.join("index.html").exists());
        assert_eq!(data.meta["generating program"], "condorskim");
    }

    #[tokio::test]
    async fn test_mode_processes_one_task() {
        let dir = TempDir::new().unwrap();
        let mut options = options(&dir);
        options.test = true;
        options.resubmit = false;
        let crab = ScriptedCrab::with_outputs(&options.crab_dir.join("prod/TTTo2L2Nu_Tune/crab_v1"), &[FAILED]);

        let data = run_once(&crab, &options).await.unwrap();
        assert_eq!(data.samples.len(), 1);
        assert!(crab.resubmitted.borrow().is_empty());
    }

    #[tokio::test]
    async fn loop_repeats() {
        let dir = TempDir::new().unwrap();
        let mut options = options(&dir);
        options.test = true;
        let task = options.crab_dir.join("prod/TTTo2L2Nu_Tune/crab_v1");
        let crab = ScriptedCrab::with_outputs(&task, &[FAILED, DONE]);

        run_loop(&crab, &options, 2, Duration::from_millis(1)).await.unwrap();

        let snapshot = fs::read_to_string(options.web_path.join("status.json")).unwrap();
        assert!(snapshot.contains("\"completed\": true"));
        assert_eq!(crab.resubmitted.borrow().len(), 1);
    }
}
