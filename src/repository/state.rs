//! Background ingest loop state: heartbeat, run markers, last error.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime_opt, Repository, Result};

/// Row describing one named background loop.
#[derive(Debug, Clone)]
pub struct IngestState {
    pub name: String,
    pub enabled: bool,
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub last_run_completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Fetch loop state, creating a default row on first access.
    pub fn get_or_create_ingest_state(&self, name: &str) -> Result<IngestState> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO ingest_state (name, enabled) VALUES (?, 1)",
            params![name],
        )?;
        let state = conn
            .query_row(
                "SELECT * FROM ingest_state WHERE name = ?",
                params![name],
                |row| {
                    Ok(IngestState {
                        name: row.get("name")?,
                        enabled: row.get::<_, i64>("enabled")? != 0,
                        last_run_started_at: parse_datetime_opt(row.get("last_run_started_at")?),
                        last_run_completed_at: parse_datetime_opt(
                            row.get("last_run_completed_at")?,
                        ),
                        last_error: row.get("last_error")?,
                        heartbeat_at: parse_datetime_opt(row.get("heartbeat_at")?),
                    })
                },
            )
            .optional()?;
        state.ok_or_else(|| {
            super::RepositoryError::CorruptRow(format!("ingest_state row missing for {name}"))
        })
    }

    /// Touch the heartbeat for a loop.
    pub fn touch_ingest_heartbeat(&self, name: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE ingest_state SET heartbeat_at = ? WHERE name = ?",
            params![Utc::now().to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Mark a run started, clearing the previous error.
    pub fn mark_ingest_run_started(&self, name: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE ingest_state
             SET last_run_started_at = ?, last_error = NULL WHERE name = ?",
            params![Utc::now().to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Mark a run completed, optionally recording an error.
    pub fn mark_ingest_run_completed(&self, name: &str, error: Option<&str>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE ingest_state
             SET last_run_completed_at = ?, last_error = ? WHERE name = ?",
            params![Utc::now().to_rfc3339(), error, name],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_repo;

    #[test]
    fn test_state_created_on_first_access() {
        let (_dir, repo) = temp_repo();
        let state = repo.get_or_create_ingest_state("site").unwrap();
        assert_eq!(state.name, "site");
        assert!(state.enabled);
        assert!(state.last_run_started_at.is_none());
    }

    #[test]
    fn test_run_markers() {
        let (_dir, repo) = temp_repo();
        repo.get_or_create_ingest_state("site").unwrap();
        repo.mark_ingest_run_started("site").unwrap();
        repo.mark_ingest_run_completed("site", Some("boom")).unwrap();

        let state = repo.get_or_create_ingest_state("site").unwrap();
        assert!(state.last_run_started_at.is_some());
        assert!(state.last_run_completed_at.is_some());
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }
}
