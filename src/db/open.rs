use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use rusqlite::Connection;

/// Database file name inside the script folder
pub static DB_NAME: &str = "submissions.db";

/// Open (or create) the submission database in `folder` and start a dry run save point
pub fn open_db(folder: &Path) -> Result<Connection> {
    if !folder.as_os_str().is_empty() && !folder.exists() {
        fs::create_dir_all(folder).with_context(|| format!("Can't create {}", folder.display()))?;
    }
    let path = folder.join(DB_NAME);
    if !path.exists() { info!("Creating new database {}", path.display()) }
    let conn = Connection::open(&path).with_context(|| format!("Can't open database {}", path.display()))?;

    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
    conn.execute(SCHEMA, [])?;

    info!("Creating dry run save point");
    conn.execute("SAVEPOINT dry_run", [])?;

    Ok(conn)
}

/// Undo everything since [open_db] for dry runs, keep it otherwise
pub fn release_or_rollback(conn: &Connection, dry_run: bool) -> rusqlite::Result<()> {
    match dry_run {
        true => {
            info!("--dry-run set, rolling back database state");
            conn.execute("ROLLBACK TO dry_run", [])?;
        }
        false => {
            info!("--dry-run not set, releasing dry run save point");
            conn.execute("RELEASE dry_run", [])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM submission", [], |row| row.get(0)).unwrap()
    }

    fn insert(conn: &Connection) {
        conn.execute(
            "INSERT INTO submission (batch_name, description, script, n_jobs) VALUES ('a', 'a0.sub', 'a0.sh', 1)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn creates_database_in_new_folder() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("Scripts/condor");
        let conn = open_db(&folder).unwrap();
        assert!(folder.join(DB_NAME).exists());
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn dry_run_is_rolled_back() {
        let dir = TempDir::new().unwrap();

        let conn = open_db(dir.path()).unwrap();
        insert(&conn);
        release_or_rollback(&conn, true).unwrap();
        drop(conn);
        assert_eq!(count(&open_db(dir.path()).unwrap()), 0);

        let conn = open_db(dir.path()).unwrap();
        insert(&conn);
        release_or_rollback(&conn, false).unwrap();
        drop(conn);
        assert_eq!(count(&open_db(dir.path()).unwrap()), 1);
    }
}
