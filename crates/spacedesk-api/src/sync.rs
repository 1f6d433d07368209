//! Local-first reconciliation with the remote store.
//!
//! Mutations are already applied to the local cache when they reach the
//! reconciler. The outbox propagates them in issuance order on a background
//! task; a failure is logged and flips [`SyncHealth::degraded`] without rolling
//! anything back. The next successful round-trip clears it.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use spacedesk_core::{Account, DayRecord, Space};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};

use crate::config::DayRecordSync;
use crate::remote::{RemoteError, RemoteMutation, RemoteStore};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SyncHealth {
    pub degraded: bool,
    pub last_error: Option<String>,
    pub consecutive_failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
}

impl SyncHealth {
    fn record_success(&mut self) {
        if self.degraded {
            tracing::info!(failures = self.consecutive_failures, "remote reachable again; leaving degraded mode");
        }
        self.degraded = false;
        self.last_error = None;
        self.consecutive_failures = 0;
        self.last_success_at = Some(OffsetDateTime::now_utc());
    }

    fn record_failure(&mut self, operation: &str, error: &str) {
        tracing::warn!(operation, error, "remote round-trip failed; continuing from local cache");
        self.degraded = true;
        self.last_error = Some(format!("{operation}: {error}"));
        self.consecutive_failures += 1;
    }
}

/// Authoritative collections fetched at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub accounts: Vec<Account>,
    pub spaces: Vec<Space>,
    /// `None` under the `cache_only` day-record policy.
    pub day_records: Option<Vec<DayRecord>>,
}

enum OutboxCommand {
    Apply(RemoteMutation),
    Barrier(oneshot::Sender<()>),
}

pub struct SyncReconciler {
    remote: Option<Arc<dyn RemoteStore>>,
    outbox: Option<mpsc::UnboundedSender<OutboxCommand>>,
    health: Arc<RwLock<SyncHealth>>,
    policy: DayRecordSync,
}

impl SyncReconciler {
    /// A reconciler with no remote: every mutation stays local.
    #[must_use]
    pub fn offline(policy: DayRecordSync) -> Self {
        Self { remote: None, outbox: None, health: Arc::default(), policy }
    }

    /// Start the outbox worker on the current tokio runtime.
    ///
    /// # Errors
    /// Returns an error when called outside a tokio runtime.
    pub fn start(remote: Arc<dyn RemoteStore>, policy: DayRecordSync) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("sync reconciler requires a running tokio runtime")?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let health = Arc::new(RwLock::new(SyncHealth::default()));
        runtime.spawn(run_outbox(Arc::clone(&remote), receiver, Arc::clone(&health)));
        Ok(Self { remote: Some(remote), outbox: Some(sender), health, policy })
    }

    #[must_use]
    pub fn health(&self) -> SyncHealth {
        self.health.read().clone()
    }

    /// Queue a mutation behind everything enqueued before it. Day-record
    /// mutations are dropped under the `cache_only` policy.
    pub fn enqueue(&self, mutation: RemoteMutation) {
        if mutation.is_day_record() && self.policy == DayRecordSync::CacheOnly {
            return;
        }
        let Some(outbox) = &self.outbox else {
            return;
        };
        let label = mutation.label();
        if outbox.send(OutboxCommand::Apply(mutation)).is_err() {
            self.health.write().record_failure(label, "outbox worker stopped");
        }
    }

    /// Resolve once every mutation enqueued before this call has been attempted.
    pub async fn settle(&self) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if outbox.send(OutboxCommand::Barrier(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Fetch accounts, spaces and (under the `remote` policy) day records.
    /// Returns `None` without a remote or when the pull fails; failures mark
    /// the reconciler degraded.
    pub async fn pull(&self) -> Option<RemoteSnapshot> {
        let remote = Arc::clone(self.remote.as_ref()?);
        let include_day_records = self.policy == DayRecordSync::Remote;
        let fetched =
            tokio::task::spawn_blocking(move || fetch_snapshot(remote.as_ref(), include_day_records))
                .await;
        match fetched {
            Ok(Ok(snapshot)) => {
                self.health.write().record_success();
                tracing::info!(
                    accounts = snapshot.accounts.len(),
                    spaces = snapshot.spaces.len(),
                    day_records = snapshot.day_records.as_ref().map(Vec::len),
                    "pulled remote snapshot"
                );
                Some(snapshot)
            }
            Ok(Err(err)) => {
                self.health.write().record_failure("pull", &err.to_string());
                None
            }
            Err(join) => {
                self.health.write().record_failure("pull", &join.to_string());
                None
            }
        }
    }
}

fn fetch_snapshot(
    remote: &dyn RemoteStore,
    include_day_records: bool,
) -> Result<RemoteSnapshot, RemoteError> {
    let accounts = remote
        .fetch_profiles()?
        .into_iter()
        .filter_map(|row| {
            row.into_account()
                .map_err(|err| tracing::warn!(error = %err, "skipping remote profile"))
                .ok()
        })
        .collect();
    let spaces = remote
        .fetch_spaces()?
        .into_iter()
        .filter_map(|row| {
            row.into_space().map_err(|err| tracing::warn!(error = %err, "skipping remote space")).ok()
        })
        .collect();
    let day_records = if include_day_records {
        Some(
            remote
                .fetch_day_records()?
                .into_iter()
                .filter_map(|row| {
                    row.into_record()
                        .map_err(|err| tracing::warn!(error = %err, "skipping remote day record"))
                        .ok()
                })
                .collect(),
        )
    } else {
        None
    };
    Ok(RemoteSnapshot { accounts, spaces, day_records })
}

async fn run_outbox(
    remote: Arc<dyn RemoteStore>,
    mut receiver: mpsc::UnboundedReceiver<OutboxCommand>,
    health: Arc<RwLock<SyncHealth>>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            OutboxCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
            OutboxCommand::Apply(mutation) => {
                let label = mutation.label();
                let remote = Arc::clone(&remote);
                let outcome = tokio::task::spawn_blocking(move || remote.apply(&mutation)).await;
                match outcome {
                    Ok(Ok(())) => {
                        tracing::debug!(operation = label, "remote mutation acknowledged");
                        health.write().record_success();
                    }
                    Ok(Err(err)) => health.write().record_failure(label, &err.to_string()),
                    Err(join) => health.write().record_failure(label, &join.to_string()),
                }
            }
        }
    }
    tracing::debug!("sync outbox closed");
}

#[cfg(test)]
mod tests {
    use spacedesk_core::{DateKey, SpaceId};

    use super::*;
    use crate::remote::{DayRecordRow, InMemoryRemoteStore, SpaceRow};

    fn day_row(notes: &str) -> DayRecordRow {
        DayRecordRow {
            space_id: "spc_riyadh".to_string(),
            date_key: "2024-05-01".to_string(),
            notes: notes.to_string(),
            tasks: Vec::new(),
            media: Vec::new(),
        }
    }

    fn space_row() -> SpaceRow {
        SpaceRow {
            id: "spc_riyadh".to_string(),
            name: "Riyadh".to_string(),
            primary_color: None,
            user_limit: 3,
            created_at: "2024-05-01T08:00:00Z".to_string(),
            manager_id: None,
        }
    }

    #[tokio::test]
    async fn outbox_applies_mutations_in_order() -> Result<()> {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let reconciler = SyncReconciler::start(remote.clone(), DayRecordSync::Remote)?;
        reconciler.enqueue(RemoteMutation::UpsertDayRecord(day_row("first")));
        reconciler.enqueue(RemoteMutation::UpsertDayRecord(day_row("second")));
        reconciler.settle().await;

        assert_eq!(remote.applied_count(), 2);
        assert_eq!(remote.day_record("spc_riyadh", "2024-05-01").map(|r| r.notes).as_deref(), Some("second"));
        assert!(!reconciler.health().degraded);
        Ok(())
    }

    #[tokio::test]
    async fn failures_degrade_until_the_next_success() -> Result<()> {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let reconciler = SyncReconciler::start(remote.clone(), DayRecordSync::Remote)?;

        remote.set_offline(true);
        reconciler.enqueue(RemoteMutation::UpsertSpace(space_row()));
        reconciler.settle().await;
        let health = reconciler.health();
        assert!(health.degraded);
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.last_error.as_deref().is_some_and(|e| e.starts_with("upsert_space")));
        assert!(remote.spaces().is_empty());

        remote.set_offline(false);
        reconciler.enqueue(RemoteMutation::UpsertSpace(space_row()));
        reconciler.settle().await;
        assert!(!reconciler.health().degraded);
        assert_eq!(remote.spaces().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cache_only_policy_keeps_day_records_local() -> Result<()> {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.apply(&RemoteMutation::UpsertDayRecord(day_row("remote copy")))?;
        let reconciler = SyncReconciler::start(remote.clone(), DayRecordSync::CacheOnly)?;

        reconciler.enqueue(RemoteMutation::UpsertDayRecord(day_row("local only")));
        reconciler.settle().await;
        assert_eq!(remote.applied_count(), 1);

        let snapshot = reconciler.pull().await.unwrap_or_else(|| panic!("pull should succeed"));
        assert_eq!(snapshot.day_records, None);
        Ok(())
    }

    #[tokio::test]
    async fn pull_decodes_rows_and_skips_malformed_ones() -> Result<()> {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.seed_space(space_row());
        let mut broken = space_row();
        broken.id = "spc_broken".to_string();
        broken.created_at = "yesterday".to_string();
        remote.seed_space(broken);
        remote.apply(&RemoteMutation::UpsertDayRecord(day_row("synced")))?;

        let reconciler = SyncReconciler::start(remote, DayRecordSync::Remote)?;
        let snapshot = reconciler.pull().await.unwrap_or_else(|| panic!("pull should succeed"));
        assert_eq!(snapshot.spaces.len(), 1);
        let days = snapshot.day_records.unwrap_or_default();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].space_id, SpaceId::from_raw("spc_riyadh"));
        assert_eq!(days[0].date_key, DateKey::parse("2024-05-01")?);
        Ok(())
    }

    #[tokio::test]
    async fn failed_pull_marks_degraded() -> Result<()> {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set_offline(true);
        let reconciler = SyncReconciler::start(remote, DayRecordSync::Remote)?;
        assert!(reconciler.pull().await.is_none());
        assert!(reconciler.health().degraded);
        Ok(())
    }

    #[tokio::test]
    async fn offline_reconciler_is_inert() {
        let reconciler = SyncReconciler::offline(DayRecordSync::Remote);
        reconciler.enqueue(RemoteMutation::DeleteSpace("spc_riyadh".to_string()));
        reconciler.settle().await;
        assert!(reconciler.pull().await.is_none());
        assert!(!reconciler.health().degraded);
    }
}
