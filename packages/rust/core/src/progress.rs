//! Live job progress as a polled event feed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch as signal};
use tokio::task::JoinHandle;
use tracing::debug;

use conceptgraph_shared::{JobId, JobStatus, JobStep};

use crate::lifecycle::JobStore;

/// One feed entry. Serializes as `{"status":..,"step":..}` or `{"error":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Snapshot { status: JobStatus, step: JobStep },
    Error { error: String },
}

impl ProgressEvent {
    /// Whether no further events follow this one.
    pub fn is_final(&self) -> bool {
        match self {
            Self::Snapshot { status, .. } => status.is_terminal(),
            Self::Error { .. } => true,
        }
    }
}

/// Receiving end of [`watch`]. Dropping it stops the poller.
pub struct ProgressFeed {
    rx: mpsc::Receiver<ProgressEvent>,
    stop: signal::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProgressFeed {
    /// Next event, or `None` once the poller has stopped.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Stop polling. The job itself is not touched.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProgressFeed {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

/// Poll `id` every `interval` and publish each snapshot.
///
/// The poller ends after a terminal snapshot, after a single error event
/// (unknown job or unreadable store), or when the feed is stopped.
pub fn watch(store: Arc<dyn JobStore>, id: JobId, interval: Duration) -> ProgressFeed {
    let (tx, rx) = mpsc::channel(16);
    let (stop, mut stopped) = signal::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stopped.changed() => break,
                _ = ticker.tick() => {}
            }

            let event = match store.get_job(&id).await {
                Ok(Some(job)) => ProgressEvent::Snapshot {
                    status: job.status,
                    step: job.step,
                },
                Ok(None) => ProgressEvent::Error {
                    error: format!("job not found: {id}"),
                },
                Err(e) => ProgressEvent::Error {
                    error: e.to_string(),
                },
            };

            let last = event.is_final();
            if tx.send(event).await.is_err() {
                break;
            }
            if last {
                break;
            }
        }
        debug!(job_id = %id, "progress feed closed");
    });

    ProgressFeed { rx, stop, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conceptgraph_shared::IngestionJob;
    use conceptgraph_storage::Storage;

    async fn store_with_job() -> (tempfile::TempDir, Arc<Storage>, JobId) {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(&tmp.path().join("p.db")).await.unwrap());
        let job = IngestionJob {
            id: JobId::new(),
            file_name: "deck.pptx".into(),
            source_path: "deck.pptx".into(),
            status: JobStatus::Pending,
            step: JobStep::Queued,
            worker_token: "w".into(),
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        storage.insert_job(&job).await.unwrap();
        (tmp, storage, job.id)
    }

    #[test]
    fn events_serialize_flat() {
        let snap = ProgressEvent::Snapshot {
            status: JobStatus::Processing,
            step: JobStep::Uploading,
        };
        assert_eq!(
            serde_json::to_string(&snap).unwrap(),
            r#"{"status":"processing","step":"uploading"}"#
        );
        let err = ProgressEvent::Error {
            error: "gone".into(),
        };
        assert_eq!(serde_json::to_string(&err).unwrap(), r#"{"error":"gone"}"#);
    }

    #[tokio::test]
    async fn feed_ends_after_terminal_snapshot() {
        let (_tmp, storage, id) = store_with_job().await;
        let mut feed = watch(storage.clone(), id, Duration::from_millis(5));

        assert_eq!(
            feed.next().await,
            Some(ProgressEvent::Snapshot {
                status: JobStatus::Pending,
                step: JobStep::Queued
            })
        );

        storage
            .transition_job(&id, JobStatus::Completed, JobStep::Done, None)
            .await
            .unwrap();

        let mut last = None;
        while let Some(event) = feed.next().await {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(ProgressEvent::Snapshot {
                status: JobStatus::Completed,
                step: JobStep::Done
            })
        );
    }

    #[tokio::test]
    async fn unknown_job_yields_one_error() {
        let (_tmp, storage, _) = store_with_job().await;
        let mut feed = watch(storage, JobId::new(), Duration::from_millis(5));

        let event = feed.next().await.unwrap();
        assert!(matches!(event, ProgressEvent::Error { .. }));
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test]
    async fn stop_leaves_job_untouched() {
        let (_tmp, storage, id) = store_with_job().await;
        let mut feed = watch(storage.clone(), id, Duration::from_millis(5));

        assert!(feed.next().await.is_some());
        feed.stop();
        while feed.next().await.is_some() {}

        let job = storage.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
