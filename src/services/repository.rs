//! Entity store for file records and share links.
//!
//! `Repository` is the contract the share engine depends on. Two backends
//! implement it: `MemoryRepository` (this file) and `SqliteRepository`.
//! Every backend must make `consume_share_link` atomic: the validity check
//! and the access-count increment happen as one step, so concurrent
//! resolutions of a link with `max_accesses = n` succeed at most `n` times.
//!
//! `DelegationLedger` keeps the capabilities the content store has issued.
//! Both backends implement it next to `Repository`, so delegation records
//! share the durability of the links that point at them.

use crate::models::{
    delegation::DelegationRecord,
    file::FileRecord,
    share_link::{DenyReason, ShareLink},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Outcome of an atomic access attempt on a share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The link was valid; its access count has been incremented.
    Granted { file: FileRecord, link: ShareLink },
    /// The link exists but refused access. Nothing was mutated.
    Denied(DenyReason),
    /// The link is valid but the file it references was deleted.
    FileMissing { file_id: String },
    /// No link with this token.
    LinkMissing,
}

pub type RepositoryRef = Arc<dyn Repository>;

#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert or replace a file record by id.
    async fn save_file(&self, file: FileRecord) -> RepositoryResult<()>;

    async fn get_file(&self, id: &str) -> RepositoryResult<Option<FileRecord>>;

    /// Snapshot of every file. Order is unspecified.
    async fn list_files(&self) -> RepositoryResult<Vec<FileRecord>>;

    /// Remove a file record. Share links that reference it are left alone.
    async fn delete_file(&self, id: &str) -> RepositoryResult<bool>;

    /// Insert or replace a share link by token.
    async fn save_share_link(&self, link: ShareLink) -> RepositoryResult<()>;

    async fn get_share_link(&self, token: &str) -> RepositoryResult<Option<ShareLink>>;

    /// Unconditionally bump the access count. No-op for unknown tokens.
    async fn increment_access_count(&self, token: &str) -> RepositoryResult<()>;

    /// Mark a link revoked. `revoked_at` is only written on the first call.
    /// Returns `false` only if the token is unknown.
    async fn revoke_share_link(&self, token: &str, now: DateTime<Utc>) -> RepositoryResult<bool>;

    async fn share_links_for_file(&self, file_id: &str) -> RepositoryResult<Vec<ShareLink>>;

    /// Check validity, look up the file and increment the count as one
    /// atomic step with respect to other calls on the same token.
    async fn consume_share_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<AccessOutcome>;

    /// Cheap liveness check for readiness reporting.
    async fn ping(&self) -> RepositoryResult<()>;
}

pub type DelegationLedgerRef = Arc<dyn DelegationLedger>;

#[async_trait]
pub trait DelegationLedger: Send + Sync {
    /// Insert or replace a delegation record by id.
    async fn record_delegation(&self, record: DelegationRecord) -> RepositoryResult<()>;

    async fn get_delegation(&self, id: &str) -> RepositoryResult<Option<DelegationRecord>>;

    /// Mark a delegation revoked. Returns `false` only if the id is unknown.
    async fn revoke_delegation(&self, id: &str) -> RepositoryResult<bool>;

    /// Drop records that lapsed before `now`. Returns how many were removed.
    async fn prune_delegations(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;
}

/// In-memory repository.
///
/// One reader/writer lock per collection. When both are held, the share
/// link lock is always taken first.
#[derive(Default)]
pub struct MemoryRepository {
    files: RwLock<HashMap<String, FileRecord>>,
    share_links: RwLock<HashMap<String, ShareLink>>,
    delegations: RwLock<HashMap<String, DelegationRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_file(&self, file: FileRecord) -> RepositoryResult<()> {
        self.files.write().insert(file.id.clone(), file);
        Ok(())
    }

    async fn get_file(&self, id: &str) -> RepositoryResult<Option<FileRecord>> {
        Ok(self.files.read().get(id).cloned())
    }

    async fn list_files(&self) -> RepositoryResult<Vec<FileRecord>> {
        Ok(self.files.read().values().cloned().collect())
    }

    async fn delete_file(&self, id: &str) -> RepositoryResult<bool> {
        Ok(self.files.write().remove(id).is_some())
    }

    async fn save_share_link(&self, link: ShareLink) -> RepositoryResult<()> {
        self.share_links.write().insert(link.token.clone(), link);
        Ok(())
    }

    async fn get_share_link(&self, token: &str) -> RepositoryResult<Option<ShareLink>> {
        Ok(self.share_links.read().get(token).cloned())
    }

    async fn increment_access_count(&self, token: &str) -> RepositoryResult<()> {
        if let Some(link) = self.share_links.write().get_mut(token) {
            link.access_count = link.access_count.saturating_add(1);
        }
        Ok(())
    }

    async fn revoke_share_link(&self, token: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut links = self.share_links.write();
        let Some(link) = links.get_mut(token) else {
            return Ok(false);
        };
        if !link.is_revoked {
            link.is_revoked = true;
            link.revoked_at = Some(now);
        }
        Ok(true)
    }

    async fn share_links_for_file(&self, file_id: &str) -> RepositoryResult<Vec<ShareLink>> {
        Ok(self
            .share_links
            .read()
            .values()
            .filter(|link| link.file_id == file_id)
            .cloned()
            .collect())
    }

    async fn consume_share_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<AccessOutcome> {
        let mut links = self.share_links.write();
        let Some(link) = links.get_mut(token) else {
            return Ok(AccessOutcome::LinkMissing);
        };
        if let Some(reason) = link.deny_reason(now) {
            return Ok(AccessOutcome::Denied(reason));
        }
        let Some(file) = self.files.read().get(&link.file_id).cloned() else {
            return Ok(AccessOutcome::FileMissing {
                file_id: link.file_id.clone(),
            });
        };
        link.access_count = link.access_count.saturating_add(1);
        Ok(AccessOutcome::Granted {
            file,
            link: link.clone(),
        })
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

#[async_trait]
impl DelegationLedger for MemoryRepository {
    async fn record_delegation(&self, record: DelegationRecord) -> RepositoryResult<()> {
        self.delegations.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_delegation(&self, id: &str) -> RepositoryResult<Option<DelegationRecord>> {
        Ok(self.delegations.read().get(id).cloned())
    }

    async fn revoke_delegation(&self, id: &str) -> RepositoryResult<bool> {
        let mut delegations = self.delegations.write();
        let Some(record) = delegations.get_mut(id) else {
            return Ok(false);
        };
        record.revoked = true;
        Ok(true)
    }

    async fn prune_delegations(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let mut delegations = self.delegations.write();
        let before = delegations.len();
        delegations.retain(|_, record| !record.is_lapsed(now));
        Ok((before - delegations.len()) as u64)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{delegation, file, link};
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn file_crud() {
        let repo = MemoryRepository::new();
        assert!(repo.get_file("f1").await.unwrap().is_none());

        let f1 = file("f1");
        repo.save_file(f1.clone()).await.unwrap();
        repo.save_file(file("f2")).await.unwrap();
        assert_eq!(repo.get_file("f1").await.unwrap(), Some(f1));
        assert_eq!(repo.list_files().await.unwrap().len(), 2);

        assert!(repo.delete_file("f1").await.unwrap());
        assert!(!repo.delete_file("f1").await.unwrap());
        assert_eq!(repo.list_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_file_keeps_links() {
        let repo = MemoryRepository::new();
        repo.save_file(file("f1")).await.unwrap();
        repo.save_share_link(link("t1", "f1", 0)).await.unwrap();
        repo.delete_file("f1").await.unwrap();

        assert_eq!(repo.share_links_for_file("f1").await.unwrap().len(), 1);
        assert_eq!(
            repo.consume_share_link("t1", Utc::now()).await.unwrap(),
            AccessOutcome::FileMissing {
                file_id: "f1".into()
            }
        );
        assert_eq!(repo.get_share_link("t1").await.unwrap().unwrap().access_count, 0);
    }

    #[tokio::test]
    async fn revoke_sets_timestamp_once() {
        let repo = MemoryRepository::new();
        assert!(!repo.revoke_share_link("nope", Utc::now()).await.unwrap());

        repo.save_share_link(link("t1", "f1", 0)).await.unwrap();
        let first = Utc::now();
        assert!(repo.revoke_share_link("t1", first).await.unwrap());
        assert!(repo
            .revoke_share_link("t1", first + Duration::minutes(5))
            .await
            .unwrap());

        let stored = repo.get_share_link("t1").await.unwrap().unwrap();
        assert!(stored.is_revoked);
        assert_eq!(stored.revoked_at, Some(first));
    }

    #[tokio::test]
    async fn consume_stops_at_limit() {
        let repo = MemoryRepository::new();
        repo.save_file(file("f1")).await.unwrap();
        repo.save_share_link(link("t1", "f1", 2)).await.unwrap();
        let now = Utc::now();

        for expected in 1..=2 {
            match repo.consume_share_link("t1", now).await.unwrap() {
                AccessOutcome::Granted { link, .. } => assert_eq!(link.access_count, expected),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(
            repo.consume_share_link("t1", now).await.unwrap(),
            AccessOutcome::Denied(DenyReason::Exhausted)
        );
        assert_eq!(repo.get_share_link("t1").await.unwrap().unwrap().access_count, 2);
        assert_eq!(
            repo.consume_share_link("missing", now).await.unwrap(),
            AccessOutcome::LinkMissing
        );
    }

    #[tokio::test]
    async fn increment_ignores_unknown_tokens() {
        let repo = MemoryRepository::new();
        repo.increment_access_count("nope").await.unwrap();
        repo.save_share_link(link("t1", "f1", 0)).await.unwrap();
        repo.increment_access_count("t1").await.unwrap();
        assert_eq!(repo.get_share_link("t1").await.unwrap().unwrap().access_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_share_link(link("t1", "f1", 0)).await.unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.increment_access_count("t1").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(repo.get_share_link("t1").await.unwrap().unwrap().access_count, 64);
    }

    #[tokio::test]
    async fn delegations_revoke_and_prune() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        assert!(!repo.revoke_delegation("nope").await.unwrap());

        repo.record_delegation(delegation("live", now + Duration::hours(1)))
            .await
            .unwrap();
        repo.record_delegation(delegation("old", now - Duration::seconds(1)))
            .await
            .unwrap();

        assert!(repo.revoke_delegation("live").await.unwrap());
        assert!(repo.revoke_delegation("live").await.unwrap());
        assert!(repo.get_delegation("live").await.unwrap().unwrap().revoked);

        assert_eq!(repo.prune_delegations(now).await.unwrap(), 1);
        assert!(repo.get_delegation("old").await.unwrap().is_none());
        assert!(repo.get_delegation("live").await.unwrap().is_some());
    }
}
