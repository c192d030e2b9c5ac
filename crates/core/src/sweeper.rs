use crate::schema::record_key;
use crate::traits::SearchStore;
use crate::SearchError;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pattern: String,
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// A running sweep. Dropping the handle leaves the sweep running; call
/// [`SweepHandle::cancel`] to stop it between keys.
pub struct SweepHandle {
    cancellation_token: CancellationToken,
    task: JoinHandle<Result<SweepReport, SearchError>>,
}

impl SweepHandle {
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<SweepReport, SearchError> {
        self.task
            .await
            .map_err(|error| SearchError::Background(format!("sweep task failed: {error}")))?
    }
}

/// Scans every key matching `pattern` and deletes it on a background task,
/// detached from the caller.
pub fn spawn_sweep<S>(store: Arc<S>, pattern: String) -> SweepHandle
where
    S: SearchStore + ?Sized + 'static,
{
    let cancellation_token = CancellationToken::new();
    let token = cancellation_token.clone();
    let task = tokio::spawn(async move { sweep(store.as_ref(), &pattern, &token).await });

    SweepHandle {
        cancellation_token,
        task,
    }
}

pub async fn sweep<S>(
    store: &S,
    pattern: &str,
    cancellation_token: &CancellationToken,
) -> Result<SweepReport, SearchError>
where
    S: SearchStore + ?Sized,
{
    let mut report = SweepReport {
        pattern: pattern.to_string(),
        ..SweepReport::default()
    };
    let mut cursor = 0u64;

    'scan: loop {
        if cancellation_token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let page = store.scan(pattern, cursor).await?;
        for key in page.keys {
            if cancellation_token.is_cancelled() {
                report.cancelled = true;
                break 'scan;
            }
            report.scanned += 1;
            match store.delete(&key).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => debug!(%key, "key already gone"),
                Err(error) => {
                    warn!(%key, %error, "sweep delete failed");
                    report.failed += 1;
                }
            }
        }

        cursor = page.cursor;
        if cursor == 0 {
            break;
        }
    }

    info!(
        pattern,
        scanned = report.scanned,
        deleted = report.deleted,
        failed = report.failed,
        cancelled = report.cancelled,
        "sweep finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelete {
    pub uid: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkDeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedDelete>,
}

/// Deletes records by id. Absent records count as deleted.
pub async fn delete_documents<S>(store: &S, index: &str, uids: &[String]) -> BulkDeleteReport
where
    S: SearchStore + ?Sized,
{
    let outcomes = join_all(uids.iter().map(|uid| {
        let key = record_key(index, uid);
        async move { store.delete(&key).await }
    }))
    .await;

    let mut report = BulkDeleteReport::default();
    for (uid, outcome) in uids.iter().zip(outcomes) {
        match outcome {
            Ok(_) => report.deleted.push(uid.clone()),
            Err(error) => report.failed.push(FailedDelete {
                uid: uid.clone(),
                reason: error.to_string(),
            }),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::record_pattern;
    use crate::stores::MemoryStore;
    use crate::FieldValue;

    async fn seeded() -> Result<Arc<MemoryStore>, SearchError> {
        let store = Arc::new(MemoryStore::new());
        for key in ["vs:books:1", "vs:books:2", "vs:books:parent:p", "vs:films:1"] {
            store
                .hash_set(key, &[("title".to_string(), FieldValue::Text(key.to_string()))])
                .await?;
        }
        Ok(store)
    }

    #[tokio::test]
    async fn sweep_removes_only_matching_keys() -> Result<(), SearchError> {
        let store = seeded().await?;

        let handle = spawn_sweep(Arc::clone(&store), record_pattern("books"));
        let report = handle.wait().await?;

        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, 3);
        assert!(!report.cancelled);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_sweep_stops_early() -> Result<(), SearchError> {
        let store = seeded().await?;

        let handle = spawn_sweep(Arc::clone(&store), record_pattern("books"));
        handle.cancel();
        let report = handle.wait().await?;

        assert!(report.cancelled);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.len().await, 4);
        Ok(())
    }

    #[tokio::test]
    async fn bulk_delete_treats_absent_keys_as_success() -> Result<(), SearchError> {
        let store = seeded().await?;
        store
            .hash_set("vs:books:a", &[("title".to_string(), FieldValue::Text("a".to_string()))])
            .await?;

        let report = delete_documents(
            store.as_ref(),
            "books",
            &["a".to_string(), "b".to_string()],
        )
        .await;

        assert_eq!(report.deleted, vec!["a".to_string(), "b".to_string()]);
        assert!(report.failed.is_empty());
        assert!(store.hash_get_all("vs:books:a").await?.is_empty());
        Ok(())
    }
}
