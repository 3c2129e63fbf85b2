use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Job states reported by `crab status`
pub static KNOWN_STATES: [&str; 8] = [
    "finished",
    "running",
    "transferring",
    "failed",
    "killed",
    "idle",
    "unsubmitted",
    "toRetry",
];

/// Lumi summary written by `crab report`, relative to the task folder
pub static REPORT_FILE: &str = "results/processedLumis.json";

/// Completion state of one grid task, scraped from `crab status` output
///
/// `status` maps job state to the percentage string crab prints, e.g. `finished -> 73.3%`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: BTreeMap<String, String>,
    pub grafana: String,
    #[serde(default)]
    pub completed: bool,
}

impl Default for TaskStatus {
    /// Nothing known yet: 0% finished
    fn default() -> Self {
        let mut status = BTreeMap::new();
        status.insert("finished".to_string(), "0%".to_string());
        TaskStatus { status, grafana: String::new(), completed: false }
    }
}

impl TaskStatus {
    /// `crab status` never produced output
    pub fn crab_failed() -> TaskStatus {
        let mut status = BTreeMap::new();
        status.insert("crab status".to_string(), "failed".to_string());
        TaskStatus { status, grafana: String::new(), completed: false }
    }

    pub fn parse(output: &str) -> TaskStatus {
        let mut task = TaskStatus::default();
        for line in output.lines() {
            let line = line.replace("Jobs status:", "");
            let words: Vec<&str> = line.split_whitespace().collect();
            let Some(first) = words.first() else { continue };

            for state in KNOWN_STATES {
                if first.contains(state) {
                    let fraction = words[1..]
                        .iter()
                        .find(|w| w.ends_with('%'))
                        .map(|w| w.to_string())
                        .unwrap_or_else(|| "<none>".to_string());
                    task.status.insert(state.to_string(), fraction);
                }
            }

            if line.trim_start().starts_with("Dashboard monitoring URL") {
                if let Some(url) = words.get(3) {
                    task.grafana = url.to_string();
                }
            }

            if line.contains("Status on the scheduler") && line.contains("COMPLETED") {
                task.completed = true;
            }
        }
        task
    }

    /// A completed task only counts as completed until its report has been made
    pub fn check_report(&mut self, task_dir: &Path) {
        if self.completed && task_dir.join(REPORT_FILE).is_file() {
            self.completed = false;
        }
    }

    pub fn has_failed_jobs(&self) -> bool {
        self.status.contains_key("failed")
    }

    /// Percentage of jobs in a state, 0 when unknown or unparsable
    pub fn fraction(&self, state: &str) -> f64 {
        self.status
            .get(state)
            .and_then(|f| f.trim_end_matches('%').parse().ok())
            .unwrap_or(0.0)
    }

    /// Only `finished: 0%` is known, which is what crab reports once a task is too old to query
    pub fn is_irretrievable(&self) -> bool {
        self.status.len() == 1 && self.status.contains_key("finished") && self.fraction("finished") == 0.0
    }

    /// Space separated `state: fraction` pairs
    pub fn summary(&self) -> String {
        self.status
            .iter()
            .map(|(state, fraction)| format!("{state}: {fraction}"))
            .collect::<Vec<String>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static CRAB_OUTPUT: &str = "\
CRAB project directory:\t\t/user/someone/crablogs/prod/TTTo2L2Nu/crab_RunIISummer20UL18-v1
Task name:\t\t\t230101_120000:someone_crab_TTTo2L2Nu_RunIISummer20UL18
Grid scheduler - Task Worker:\tcrab3@vocms0199.cern.ch - crab-prod-tw01
Status on the CRAB server:\tSUBMITTED
Task URL to use for HELP:\thttps://cmsweb.cern.ch/crabserver/ui/task/230101_120000
Dashboard monitoring URL:\thttps://monit-grafana.cern.ch/d/cmsTMDetail/cms-task-monitoring-task-view?var-task=230101
Status on the scheduler:\tSUBMITTED

Jobs status:                    finished     \t\t 73.3% (11/15)
                                running      \t\t 13.3% ( 2/15)
                                failed       \t\t 13.3% ( 2/15)

No publication information available yet
Log file is /user/someone/crablogs/prod/TTTo2L2Nu/crab_RunIISummer20UL18-v1/crab.log
";

    #[test]
    fn parse_crab_status() {
        let task = TaskStatus::parse(CRAB_OUTPUT);
        assert_eq!(task.status.get("finished").unwrap(), "73.3%");
        assert_eq!(task.status.get("running").unwrap(), "13.3%");
        assert_eq!(task.status.get("failed").unwrap(), "13.3%");
        assert_eq!(task.status.len(), 3);
        assert!(task.grafana.starts_with("https://monit-grafana.cern.ch/"));
        assert!(task.has_failed_jobs());
        assert!(!task.completed);
        assert_eq!(task.summary(), "failed: 13.3% finished: 73.3% running: 13.3%");
    }

    #[test]
    fn completed_task() {
        let output = "Status on the scheduler:\tCOMPLETED\nJobs status:    finished    100.0% (3/3)\n";
        let task = TaskStatus::parse(output);
        assert!(task.completed);
        assert_eq!(task.fraction("finished"), 100.0);
        assert!(!task.is_irretrievable());
    }

    #[test]
    fn reported_task_is_not_completed() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = "Status on the scheduler:\tCOMPLETED\n";

        let mut task = TaskStatus::parse(output);
        task.check_report(dir.path());
        assert!(task.completed);

        std::fs::create_dir_all(dir.path().join("results")).unwrap();
        std::fs::write(dir.path().join(REPORT_FILE), "{}").unwrap();
        task.check_report(dir.path());
        assert!(!task.completed);
    }

    #[test]
    fn missing_fraction() {
        let task = TaskStatus::parse("Jobs status: idle\n");
        assert_eq!(task.status.get("idle").unwrap(), "<none>");
        assert_eq!(task.fraction("idle"), 0.0);
    }

    #[test]
    fn empty_output_is_irretrievable() {
        assert!(TaskStatus::parse("").is_irretrievable());
        assert!(!TaskStatus::crab_failed().is_irretrievable());
    }
}
