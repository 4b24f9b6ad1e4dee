//! SQLite-backed `Repository`.
//!
//! Same contract as the in-memory store, made durable. Atomic access
//! counting relies on a single conditional `UPDATE ... RETURNING`, which
//! SQLite executes under its write lock.
//!
//! The same pool also backs the `DelegationLedger`, so capability records
//! outlive the process alongside the links that reference them.

use crate::{
    models::{
        delegation::DelegationRecord,
        file::FileRecord,
        share_link::{DenyReason, ShareLink},
    },
    services::repository::{AccessOutcome, DelegationLedger, Repository, RepositoryResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const FILE_COLUMNS: &str =
    "id, name, size, content_type, content_address, retrieval_url, uploaded_at";

const LINK_COLUMNS: &str = "token, file_id, content_address, created_at, expires_at, \
     is_revoked, revoked_at, access_count, max_accesses, delegation_id";

#[derive(Clone)]
pub struct SqliteRepository {
    db: Arc<SqlitePool>,
}

impl SqliteRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> RepositoryResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_file(&self, file: FileRecord) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, name, size, content_type, content_address, retrieval_url, uploaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                size = excluded.size,
                content_type = excluded.content_type,
                content_address = excluded.content_address,
                retrieval_url = excluded.retrieval_url,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(&file.id)
        .bind(&file.name)
        .bind(file.size)
        .bind(&file.content_type)
        .bind(&file.content_address)
        .bind(&file.retrieval_url)
        .bind(file.uploaded_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_file(&self, id: &str) -> RepositoryResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn list_files(&self) -> RepositoryResult<Vec<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY uploaded_at ASC");
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    async fn delete_file(&self, id: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_share_link(&self, link: ShareLink) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO share_links (
                token, file_id, content_address, created_at, expires_at,
                is_revoked, revoked_at, access_count, max_accesses, delegation_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(token) DO UPDATE SET
                file_id = excluded.file_id,
                content_address = excluded.content_address,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                is_revoked = excluded.is_revoked,
                revoked_at = excluded.revoked_at,
                access_count = excluded.access_count,
                max_accesses = excluded.max_accesses,
                delegation_id = excluded.delegation_id
            "#,
        )
        .bind(&link.token)
        .bind(&link.file_id)
        .bind(&link.content_address)
        .bind(link.created_at)
        .bind(link.expires_at)
        .bind(link.is_revoked)
        .bind(link.revoked_at)
        .bind(link.access_count)
        .bind(link.max_accesses)
        .bind(&link.delegation_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_share_link(&self, token: &str) -> RepositoryResult<Option<ShareLink>> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM share_links WHERE token = ?");
        Ok(sqlx::query_as::<_, ShareLink>(&sql)
            .bind(token)
            .fetch_optional(&*self.db)
            .await?)
    }

    async fn increment_access_count(&self, token: &str) -> RepositoryResult<()> {
        sqlx::query("UPDATE share_links SET access_count = access_count + 1 WHERE token = ?")
            .bind(token)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn revoke_share_link(&self, token: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE share_links
             SET is_revoked = 1, revoked_at = COALESCE(revoked_at, ?)
             WHERE token = ?",
        )
        .bind(now)
        .bind(token)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn share_links_for_file(&self, file_id: &str) -> RepositoryResult<Vec<ShareLink>> {
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE file_id = ? ORDER BY created_at ASC"
        );
        Ok(sqlx::query_as::<_, ShareLink>(&sql)
            .bind(file_id)
            .fetch_all(&*self.db)
            .await?)
    }

    async fn consume_share_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<AccessOutcome> {
        let Some(link) = self.get_share_link(token).await? else {
            return Ok(AccessOutcome::LinkMissing);
        };
        if let Some(reason) = link.deny_reason(now) {
            return Ok(AccessOutcome::Denied(reason));
        }
        let Some(file) = self.get_file(&link.file_id).await? else {
            return Ok(AccessOutcome::FileMissing {
                file_id: link.file_id,
            });
        };

        // Expiry is immutable and was checked above; the guard only has to
        // cover the fields concurrent writers can change.
        let sql = format!(
            "UPDATE share_links SET access_count = access_count + 1
             WHERE token = ? AND is_revoked = 0
               AND (max_accesses = 0 OR access_count < max_accesses)
             RETURNING {LINK_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, ShareLink>(&sql)
            .bind(token)
            .fetch_optional(&*self.db)
            .await?;

        match updated {
            Some(link) => Ok(AccessOutcome::Granted { file, link }),
            None => {
                debug!("lost access race on share link {}", link.log_id());
                match self.get_share_link(token).await? {
                    Some(current) => Ok(AccessOutcome::Denied(
                        current
                            .deny_reason(now)
                            .unwrap_or(DenyReason::Exhausted),
                    )),
                    None => Ok(AccessOutcome::LinkMissing),
                }
            }
        }
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DelegationLedger for SqliteRepository {
    async fn record_delegation(&self, record: DelegationRecord) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO delegations (id, audience, expires_at, revoked)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                audience = excluded.audience,
                expires_at = excluded.expires_at,
                revoked = excluded.revoked
            "#,
        )
        .bind(&record.id)
        .bind(&record.audience)
        .bind(record.expires_at.timestamp())
        .bind(record.revoked)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_delegation(&self, id: &str) -> RepositoryResult<Option<DelegationRecord>> {
        let row = sqlx::query_as::<_, (String, String, i64, bool)>(
            "SELECT id, audience, expires_at, revoked FROM delegations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(|(id, audience, expires_at, revoked)| DelegationRecord {
            id,
            audience,
            expires_at: DateTime::from_timestamp(expires_at, 0)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            revoked,
        }))
    }

    async fn revoke_delegation(&self, id: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("UPDATE delegations SET revoked = 1 WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune_delegations(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        // Seconds are truncated on insert, so only strictly older rows are
        // certain to have lapsed.
        let result = sqlx::query("DELETE FROM delegations WHERE expires_at < ?")
            .bind(now.timestamp())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::fixtures::{delegation, file, link};
    use chrono::Duration;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::path::Path;

    async fn repo() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteRepository::new(Arc::new(pool));
        repo.migrate().await.unwrap();
        repo
    }

    /// File-backed repository, for tests that need a restart or more than
    /// one connection.
    async fn file_repo(path: &Path, max_connections: u32) -> SqliteRepository {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .unwrap();
        let repo = SqliteRepository::new(Arc::new(pool));
        repo.migrate().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let repo = repo().await;
        repo.migrate().await.unwrap();
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn file_upsert_and_delete() {
        let repo = repo().await;
        let mut f1 = file("f1");
        repo.save_file(f1.clone()).await.unwrap();
        f1.name = "renamed.txt".into();
        repo.save_file(f1.clone()).await.unwrap();

        let stored = repo.get_file("f1").await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed.txt");
        assert_eq!(repo.list_files().await.unwrap().len(), 1);

        assert!(repo.delete_file("f1").await.unwrap());
        assert!(!repo.delete_file("f1").await.unwrap());
        assert!(repo.get_file("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn link_round_trips_through_rows() {
        let repo = repo().await;
        let l = link("t1", "f1", 3);
        repo.save_share_link(l.clone()).await.unwrap();

        let stored = repo.get_share_link("t1").await.unwrap().unwrap();
        assert_eq!(stored.token, l.token);
        assert_eq!(stored.max_accesses, 3);
        assert_eq!(stored.expires_at, l.expires_at);
        assert!(!stored.is_revoked);
        assert_eq!(repo.share_links_for_file("f1").await.unwrap().len(), 1);
        assert!(repo.share_links_for_file("f2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_keeps_first_timestamp() {
        let repo = repo().await;
        assert!(!repo.revoke_share_link("nope", Utc::now()).await.unwrap());

        repo.save_share_link(link("t1", "f1", 0)).await.unwrap();
        let first = Utc::now();
        assert!(repo.revoke_share_link("t1", first).await.unwrap());
        assert!(repo
            .revoke_share_link("t1", first + Duration::minutes(1))
            .await
            .unwrap());

        let stored = repo.get_share_link("t1").await.unwrap().unwrap();
        assert!(stored.is_revoked);
        assert_eq!(stored.revoked_at, Some(first));
    }

    #[tokio::test]
    async fn consume_counts_and_denies() {
        let repo = repo().await;
        repo.save_file(file("f1")).await.unwrap();
        repo.save_share_link(link("t1", "f1", 1)).await.unwrap();
        let now = Utc::now();

        assert!(matches!(
            repo.consume_share_link("t1", now).await.unwrap(),
            AccessOutcome::Granted { ref link, .. } if link.access_count == 1
        ));
        assert_eq!(
            repo.consume_share_link("t1", now).await.unwrap(),
            AccessOutcome::Denied(DenyReason::Exhausted)
        );
        assert_eq!(
            repo.consume_share_link("nope", now).await.unwrap(),
            AccessOutcome::LinkMissing
        );

        repo.save_share_link(link("t2", "gone", 0)).await.unwrap();
        assert_eq!(
            repo.consume_share_link("t2", now).await.unwrap(),
            AccessOutcome::FileMissing {
                file_id: "gone".into()
            }
        );

        repo.increment_access_count("t2").await.unwrap();
        assert_eq!(repo.get_share_link("t2").await.unwrap().unwrap().access_count, 1);
    }

    #[tokio::test]
    async fn delegations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capshare.db");
        let expires_at = Utc::now() + Duration::hours(1);

        let first = file_repo(&path, 1).await;
        first
            .record_delegation(delegation("d1", expires_at))
            .await
            .unwrap();
        first.db.close().await;

        let second = file_repo(&path, 1).await;
        assert!(second.revoke_delegation("d1").await.unwrap());
        let stored = second.get_delegation("d1").await.unwrap().unwrap();
        assert!(stored.revoked);
        assert_eq!(stored.expires_at.timestamp(), expires_at.timestamp());
        assert!(!second.revoke_delegation("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn prune_drops_only_lapsed_delegations() {
        let repo = repo().await;
        let now = Utc::now();
        repo.record_delegation(delegation("old", now - Duration::minutes(5)))
            .await
            .unwrap();
        repo.record_delegation(delegation("live", now + Duration::minutes(5)))
            .await
            .unwrap();

        assert_eq!(repo.prune_delegations(now).await.unwrap(), 1);
        assert!(repo.get_delegation("old").await.unwrap().is_none());
        assert!(repo.get_delegation("live").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_use_link_under_contention() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(file_repo(&dir.path().join("capshare.db"), 4).await);
        repo.save_file(file("f1")).await.unwrap();
        repo.save_share_link(link("t1", "f1", 1)).await.unwrap();
        let now = Utc::now();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.consume_share_link("t1", now).await })
            })
            .collect();

        let mut granted = 0;
        let mut exhausted = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                AccessOutcome::Granted { .. } => granted += 1,
                AccessOutcome::Denied(DenyReason::Exhausted) => exhausted += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(exhausted, 15);
        assert_eq!(repo.get_share_link("t1").await.unwrap().unwrap().access_count, 1);
    }
}
