//! Queue deduplication and drain behaviour.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use clusterpost_core::error::{ClusterpostError, Result};
use clusterpost_core::queue::{JobQueue, LifecycleHandler, QueueKind, QueueManager};

#[derive(Debug, Default)]
struct Recorder {
    seen: Mutex<Vec<(QueueKind, String, bool)>>,
    failing: HashSet<String>,
}

impl Recorder {
    fn record(&self, kind: QueueKind, job_id: &str, force: bool) -> Result<()> {
        self.seen.lock().push((kind, job_id.to_string(), force));
        if self.failing.contains(job_id) {
            return Err(ClusterpostError::engine("slurm", "squeue: command not found"));
        }
        Ok(())
    }
}

#[async_trait]
impl LifecycleHandler for Recorder {
    async fn submit(&self, job_id: &str, force: bool) -> Result<()> {
        self.record(QueueKind::Submit, job_id, force)
    }

    async fn status(&self, job_id: &str) -> Result<()> {
        self.record(QueueKind::Status, job_id, false)
    }

    async fn kill(&self, job_id: &str) -> Result<()> {
        self.record(QueueKind::Kill, job_id, false)
    }

    async fn delete(&self, job_id: &str) -> Result<()> {
        self.record(QueueKind::Delete, job_id, false)
    }
}

#[tokio::test]
async fn test_each_queue_routes_to_its_handler() {
    let queues = QueueManager::new();
    let handler = Recorder::default();
    queues.enqueue_submit("a", true);
    queues.enqueue_status("b");
    queues.enqueue_kill("c");
    queues.enqueue_delete("d");

    for kind in QueueKind::ALL {
        queues.drain(kind, &handler).await;
    }

    assert_eq!(
        *handler.seen.lock(),
        vec![
            (QueueKind::Submit, "a".to_string(), true),
            (QueueKind::Status, "b".to_string(), false),
            (QueueKind::Kill, "c".to_string(), false),
            (QueueKind::Delete, "d".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_failing_entry_does_not_block_the_rest() {
    let queues = QueueManager::new();
    let handler = Recorder {
        failing: HashSet::from(["bad".to_string()]),
        ..Recorder::default()
    };
    for id in ["first", "bad", "last"] {
        queues.enqueue_status(id);
    }

    let report = queues.drain_status_queue(&handler).await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(handler.seen.lock().len(), 3);
    // the failed job can be enqueued again right away
    assert!(queues.enqueue_status("bad"));
}

#[tokio::test]
async fn test_drains_run_concurrently_across_queues() {
    let queues = Arc::new(QueueManager::new());
    let handler = Arc::new(Recorder::default());
    queues.enqueue_submit("s", false);
    queues.enqueue_kill("k");

    let submit = {
        let (queues, handler) = (queues.clone(), handler.clone());
        tokio::spawn(async move { queues.drain(QueueKind::Submit, handler.as_ref()).await })
    };
    let kill = {
        let (queues, handler) = (queues.clone(), handler.clone());
        tokio::spawn(async move { queues.drain(QueueKind::Kill, handler.as_ref()).await })
    };

    assert_eq!(submit.await.unwrap().processed, 1);
    assert_eq!(kill.await.unwrap().processed, 1);
    assert!(queues.queue(QueueKind::Submit).pending_ids().is_empty());
}

proptest! {
    #[test]
    fn test_pending_ids_are_unique_and_keep_first_arrival_order(
        ids in prop::collection::vec("[a-e]", 0..40)
    ) {
        let queue = JobQueue::new(QueueKind::Submit);
        for id in &ids {
            queue.enqueue(id, false);
        }

        let mut expected: Vec<String> = Vec::new();
        for id in &ids {
            if !expected.contains(id) {
                expected.push(id.clone());
            }
        }
        prop_assert_eq!(queue.pending_ids(), expected.clone());
        prop_assert_eq!(queue.pending_len(), expected.len());
    }

    #[test]
    fn test_forced_flag_survives_duplicate_requests(
        requests in prop::collection::vec(any::<bool>(), 1..20)
    ) {
        let queue = JobQueue::new(QueueKind::Submit);
        for force in &requests {
            queue.enqueue("job", *force);
        }

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let report = runtime.block_on(queue.drain(|entry| {
            let seen = seen.clone();
            async move {
                seen.lock().push(entry.force);
                Ok(())
            }
        }));

        prop_assert_eq!(report.processed, 1);
        prop_assert_eq!(seen.lock().clone(), vec![requests.iter().any(|f| *f)]);
    }
}
