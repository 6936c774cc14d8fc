//! Point-in-time copies of the database written with `VACUUM INTO`.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{error, info, warn};
use uuid::Uuid;

use propdesk_core::{Backup, BackupStatus, PropdeskError, Result};

use crate::sqlite::{db_err, parse_col};
use crate::SqliteStore;

#[derive(FromRow)]
struct BackupRow {
    id: Uuid,
    file_name: String,
    size_bytes: i64,
    status: String,
    error: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BackupRow> for Backup {
    type Error = PropdeskError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Backup {
            id: row.id,
            file_name: row.file_name,
            size_bytes: row.size_bytes,
            status: parse_col(&row.status)?,
            error: row.error,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

const BACKUP_COLUMNS: &str = "id, file_name, size_bytes, status, error, created_by, created_at";

async fn remove_file(dir: &Path, file_name: &str) -> Result<()> {
    match tokio::fs::remove_file(dir.join(file_name)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(file = %file_name, "backup file already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl SqliteStore {
    /// Snapshots the database into `dir` and records the attempt. A failed
    /// snapshot is recorded with its error and then returned as an error.
    pub async fn create_backup(&self, dir: &Path, created_by: Option<Uuid>) -> Result<Backup> {
        let now = Utc::now();
        let file_name = Backup::file_name_for(now);
        let path = dir.join(&file_name);

        let outcome: Result<i64> = async {
            tokio::fs::create_dir_all(dir).await?;
            sqlx::query("VACUUM INTO ?")
                .bind(path.to_string_lossy().into_owned())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            let meta = tokio::fs::metadata(&path).await?;
            Ok(meta.len() as i64)
        }
        .await;

        let (status, size_bytes, message) = match &outcome {
            Ok(size) => (BackupStatus::Completed, *size, None),
            Err(e) => (BackupStatus::Failed, 0, Some(e.to_string())),
        };

        let backup = Backup {
            id: Uuid::new_v4(),
            file_name,
            size_bytes,
            status,
            error: message,
            created_by,
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO backups (id, file_name, size_bytes, status, error, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(backup.id)
        .bind(&backup.file_name)
        .bind(backup.size_bytes)
        .bind(backup.status.as_str())
        .bind(&backup.error)
        .bind(backup.created_by)
        .bind(backup.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        match outcome {
            Ok(size) => {
                info!(file = %backup.file_name, size_bytes = size, "database backup written");
                Ok(backup)
            }
            Err(e) => {
                error!(file = %backup.file_name, error = %e, "database backup failed");
                Err(e)
            }
        }
    }

    pub async fn list_backups(&self) -> Result<Vec<Backup>> {
        let rows: Vec<BackupRow> = sqlx::query_as(&format!(
            "SELECT {} FROM backups ORDER BY created_at DESC, rowid DESC",
            BACKUP_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Backup::try_from).collect()
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<Backup> {
        let row: Option<BackupRow> =
            sqlx::query_as(&format!("SELECT {} FROM backups WHERE id = ?", BACKUP_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("backup", id))?
            .try_into()
    }

    /// Deletes the record and its file, tolerating a file that is already gone.
    pub async fn delete_backup(&self, dir: &Path, id: Uuid) -> Result<Backup> {
        let backup = self.get_backup(id).await?;
        if backup.status == BackupStatus::Completed {
            remove_file(dir, &backup.file_name).await?;
        }

        sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(backup)
    }

    /// Keeps the newest `keep` completed backups. Every record older than the
    /// last one kept is deleted, failed attempts included.
    pub async fn prune_backups(&self, dir: &Path, keep: usize) -> Result<Vec<Backup>> {
        let all = self.list_backups().await?;

        let mut kept = 0;
        let mut doomed = Vec::new();
        for backup in all {
            match backup.status {
                BackupStatus::Completed if kept < keep => kept += 1,
                _ if kept >= keep => doomed.push(backup),
                _ => {}
            }
        }

        for backup in &doomed {
            self.delete_backup(dir, backup.id).await?;
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), kept, "pruned old backups");
        }
        Ok(doomed)
    }
}
