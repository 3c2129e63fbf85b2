use rusqlite::Connection;

/// A row of the submission ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub id: i64,
    pub batch_name: String,
    pub description: String,
    pub script: String,
    pub cluster_id: Option<i64>,
    pub n_jobs: i64,
    pub submitted_at: String,
}

/// Load the most recent submissions, newest first
pub fn get_submissions(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<SubmissionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, batch_name, description, script, cluster_id, n_jobs, submitted_at
         FROM submission ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(SubmissionRecord {
            id: row.get(0)?,
            batch_name: row.get(1)?,
            description: row.get(2)?,
            script: row.get(3)?,
            cluster_id: row.get(4)?,
            n_jobs: row.get(5)?,
            submitted_at: row.get(6)?,
        })
    })?;
    rows.collect()
}
