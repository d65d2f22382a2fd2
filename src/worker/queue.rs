//! In-memory job queue shared between callers and the worker thread.

use crate::store::SourceRecord;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

/// A request to (re)build the tree of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Source whose tree is built.
    pub source_id: String,
    /// Notebook the source belongs to.
    pub notebook_id: String,
    /// Original file name, for logs.
    pub file_name: String,
}

impl Job {
    /// Create a job.
    pub fn new(
        source_id: impl Into<String>,
        notebook_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            notebook_id: notebook_id.into(),
            file_name: file_name.into(),
        }
    }
}

impl From<SourceRecord> for Job {
    fn from(record: SourceRecord) -> Self {
        Self {
            source_id: record.source_id,
            notebook_id: record.notebook_id,
            file_name: record.file_name,
        }
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    /// Sources queued or being processed.
    tracked: HashSet<String>,
}

/// FIFO of jobs, deduplicated by source id until the job finishes.
#[derive(Default)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    /// Enqueue `job`; returns `false` when the source is already queued or building.
    pub(crate) fn push(&self, job: Job) -> bool {
        let Ok(mut state) = self.state.lock() else {
            tracing::error!(source_id = %job.source_id, "Job queue lock poisoned; dropping job");
            return false;
        };
        if !state.tracked.insert(job.source_id.clone()) {
            return false;
        }
        state.jobs.push_back(job);
        drop(state);
        self.notify.notify_one();
        true
    }

    pub(crate) fn pop(&self) -> Option<Job> {
        self.state.lock().ok()?.jobs.pop_front()
    }

    /// Wait until a job is available and take it.
    pub(crate) async fn next(&self) -> Job {
        loop {
            if let Some(job) = self.pop() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    /// Release the source so it can be enqueued again.
    pub(crate) fn finish(&self, source_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.tracked.remove(source_id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().map(|state| state.jobs.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duplicates_are_rejected_until_finished() {
        let queue = JobQueue::default();
        assert!(queue.push(Job::new("s1", "nb", "a.pdf")));
        assert!(!queue.push(Job::new("s1", "nb", "a.pdf")));
        assert!(queue.push(Job::new("s2", "nb", "b.pdf")));
        assert_eq!(queue.len(), 2);

        let first = queue.pop().unwrap();
        assert_eq!(first.source_id, "s1");
        assert!(!queue.push(Job::new("s1", "nb", "a.pdf")));

        queue.finish("s1");
        assert!(queue.push(Job::new("s1", "nb", "a.pdf")));
    }

    #[tokio::test]
    async fn next_waits_for_a_push() {
        let queue = std::sync::Arc::new(JobQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(Job::new("s", "nb", "f"));

        let job = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woken")
            .expect("joined");
        assert_eq!(job.source_id, "s");
    }

    #[test]
    fn record_converts_to_job() {
        let job = Job::from(SourceRecord::pending("s", "nb", "f.pdf"));
        assert_eq!(job, Job::new("s", "nb", "f.pdf"));
    }
}
