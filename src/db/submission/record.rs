use chrono::Local;
use log::info;
use rusqlite::Connection;

use crate::condor::cluster::SubmittedJob;

impl SubmittedJob {
    /// Add this submission to the ledger
    pub fn record(&self, conn: &Connection) -> rusqlite::Result<()> {
        let submission = &self.submission;
        let batch_name = submission.batch_name.clone().unwrap_or_default();
        let description = submission.description.display().to_string();
        let script = self.script.display().to_string();
        let cluster_id = submission.cluster.map(|id| id as i64);
        info!("Recording {description} (cluster {cluster_id:?}) in db");

        conn.execute(
            "INSERT INTO submission (batch_name, description, script, cluster_id, n_jobs, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                &batch_name,
                &description,
                &script,
                cluster_id,
                submission.jobs as i64,
                Local::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }
}
