//! A priority queue of extraction jobs.
//!
//! The queue's state lives in a [`JobQueueState`], which is owned by a single
//! background task. Everything else talks to that task through a cloneable
//! [`JobQueueHandle`], so mutations never race.
//!
//! Jobs are ordered by priority, highest first, and in submission order within
//! a priority.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::{
    SinkExt as _, StreamExt as _,
    channel::{mpsc, oneshot},
};
use schemars::JsonSchema;
use thiserror::Error;
use uuid::Uuid;

use crate::{async_utils::JoinWorker, prelude::*};

/// How many commands may wait for the queue task before senders block.
const COMMAND_BUFFER: usize = 32;

/// The unique ID of a job.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs are finished, although a failed job may be
    /// explicitly retried.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Is `self -> next` a legal transition?
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job priority. Declaration order is sort order.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// A job, as seen by clients of the queue.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingQueueItem {
    pub id: JobId,
    pub user_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Percent complete, 0 to 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub retry_count: u32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobQueueError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id} is already {status}")]
    Terminal { id: JobId, status: JobStatus },

    #[error("job {id} has already been retried {retries} times")]
    RetryLimit { id: JobId, retries: u32 },

    #[error("job queue has shut down")]
    Closed,
}

/// The queue itself. This is a plain synchronous data structure; see
/// [`JobQueue`] for the shared version.
#[derive(Debug)]
pub struct JobQueueState {
    /// Kept sorted by descending priority, FIFO within a priority.
    items: Vec<ProcessingQueueItem>,
    max_retries: u32,
}

impl JobQueueState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            items: vec![],
            max_retries,
        }
    }

    /// Add a pending job and return its ID.
    pub fn enqueue(&mut self, user_id: &str, filename: &str, priority: JobPriority) -> JobId {
        let item = ProcessingQueueItem {
            id: JobId::new(),
            user_id: user_id.to_owned(),
            filename: filename.to_owned(),
            status: JobStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: None,
            error_message: None,
            retry_count: 0,
        };
        let id = item.id;
        self.insert(item);
        id
    }

    /// Insert behind every item of the same or higher priority.
    fn insert(&mut self, item: ProcessingQueueItem) {
        let pos = self
            .items
            .iter()
            .position(|existing| existing.priority < item.priority)
            .unwrap_or(self.items.len());
        self.items.insert(pos, item);
    }

    fn position(&self, id: JobId) -> Result<usize, JobQueueError> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or(JobQueueError::NotFound(id))
    }

    fn item_mut(&mut self, id: JobId) -> Result<&mut ProcessingQueueItem, JobQueueError> {
        let pos = self.position(id)?;
        Ok(&mut self.items[pos])
    }

    /// Move a job to `next`, or explain why we can't.
    fn transition(
        &mut self,
        id: JobId,
        next: JobStatus,
    ) -> Result<&mut ProcessingQueueItem, JobQueueError> {
        let item = self.item_mut(id)?;
        if !item.status.can_transition_to(next) {
            return Err(JobQueueError::IllegalTransition {
                id,
                from: item.status,
                to: next,
            });
        }
        item.status = next;
        Ok(item)
    }

    pub fn status(&self, id: JobId) -> Result<ProcessingQueueItem, JobQueueError> {
        Ok(self.items[self.position(id)?].clone())
    }

    /// Claim the highest-priority pending job, if any.
    pub fn start_next(&mut self) -> Option<ProcessingQueueItem> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.status == JobStatus::Pending)?;
        item.status = JobStatus::Processing;
        item.started_at = Some(Utc::now());
        Some(item.clone())
    }

    /// Record progress. Values above 100 are clamped.
    pub fn update_progress(&mut self, id: JobId, progress: u8) -> Result<(), JobQueueError> {
        let item = self.item_mut(id)?;
        if item.status.is_terminal() {
            return Err(JobQueueError::Terminal {
                id,
                status: item.status,
            });
        }
        item.progress = Some(progress.min(100));
        Ok(())
    }

    pub fn mark_completed(&mut self, id: JobId) -> Result<(), JobQueueError> {
        let item = self.transition(id, JobStatus::Completed)?;
        item.completed_at = Some(Utc::now());
        item.progress = Some(100);
        item.error_message = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, id: JobId, message: &str) -> Result<(), JobQueueError> {
        let item = self.transition(id, JobStatus::Failed)?;
        item.completed_at = Some(Utc::now());
        item.error_message = Some(message.to_owned());
        Ok(())
    }

    /// Put a failed job back in line behind other jobs of its priority. The
    /// last error message is kept until the job completes or fails again.
    pub fn retry(&mut self, id: JobId) -> Result<ProcessingQueueItem, JobQueueError> {
        let pos = self.position(id)?;
        let item = &self.items[pos];
        if !item.status.can_transition_to(JobStatus::Pending) {
            return Err(JobQueueError::IllegalTransition {
                id,
                from: item.status,
                to: JobStatus::Pending,
            });
        }
        if item.retry_count >= self.max_retries {
            return Err(JobQueueError::RetryLimit {
                id,
                retries: item.retry_count,
            });
        }

        let mut item = self.items.remove(pos);
        item.status = JobStatus::Pending;
        item.retry_count += 1;
        item.started_at = None;
        item.completed_at = None;
        item.progress = None;
        self.insert(item.clone());
        Ok(item)
    }

    /// Forget finished jobs that completed before `before`. Returns how many
    /// jobs were removed.
    pub fn purge_terminal(&mut self, before: DateTime<Utc>) -> usize {
        let original_len = self.items.len();
        self.items.retain(|item| {
            !(item.status.is_terminal() && item.completed_at.is_some_and(|at| at < before))
        });
        original_len - self.items.len()
    }

    /// All jobs, in queue order.
    pub fn snapshot(&self) -> Vec<ProcessingQueueItem> {
        self.items.clone()
    }

    fn apply(&mut self, command: JobCommand) {
        match command {
            JobCommand::Enqueue {
                user_id,
                filename,
                priority,
                reply,
            } => send_reply(reply, self.enqueue(&user_id, &filename, priority)),
            JobCommand::Status { id, reply } => send_reply(reply, self.status(id)),
            JobCommand::StartNext { reply } => send_reply(reply, self.start_next()),
            JobCommand::UpdateProgress {
                id,
                progress,
                reply,
            } => send_reply(reply, self.update_progress(id, progress)),
            JobCommand::MarkCompleted { id, reply } => {
                send_reply(reply, self.mark_completed(id))
            }
            JobCommand::MarkFailed { id, message, reply } => {
                send_reply(reply, self.mark_failed(id, &message))
            }
            JobCommand::Retry { id, reply } => send_reply(reply, self.retry(id)),
            JobCommand::PurgeTerminal { before, reply } => {
                send_reply(reply, self.purge_terminal(before))
            }
            JobCommand::Snapshot { reply } => send_reply(reply, self.snapshot()),
        }
    }
}

fn send_reply<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        debug!("failed to send job queue reply because receiver was dropped");
    }
}

/// Messages understood by the queue task.
enum JobCommand {
    Enqueue {
        user_id: String,
        filename: String,
        priority: JobPriority,
        reply: oneshot::Sender<JobId>,
    },
    Status {
        id: JobId,
        reply: oneshot::Sender<Result<ProcessingQueueItem, JobQueueError>>,
    },
    StartNext {
        reply: oneshot::Sender<Option<ProcessingQueueItem>>,
    },
    UpdateProgress {
        id: JobId,
        progress: u8,
        reply: oneshot::Sender<Result<(), JobQueueError>>,
    },
    MarkCompleted {
        id: JobId,
        reply: oneshot::Sender<Result<(), JobQueueError>>,
    },
    MarkFailed {
        id: JobId,
        message: String,
        reply: oneshot::Sender<Result<(), JobQueueError>>,
    },
    Retry {
        id: JobId,
        reply: oneshot::Sender<Result<ProcessingQueueItem, JobQueueError>>,
    },
    PurgeTerminal {
        before: DateTime<Utc>,
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ProcessingQueueItem>>,
    },
}

/// A job queue running in a background task.
///
/// The task exits once this value and every [`JobQueueHandle`] have been
/// dropped.
pub struct JobQueue {
    tx: mpsc::Sender<JobCommand>,
}

impl JobQueue {
    /// Start the queue task.
    pub fn start(max_retries: u32) -> (Self, JoinWorker) {
        let (tx, mut rx) = mpsc::channel::<JobCommand>(COMMAND_BUFFER);
        let worker = tokio::spawn(async move {
            let mut state = JobQueueState::new(max_retries);
            while let Some(command) = rx.next().await {
                state.apply(command);
            }
            trace!("job queue closed");
            Ok(())
        });
        (Self { tx }, JoinWorker::from_handle(worker))
    }

    /// Get a handle for talking to the queue.
    pub fn handle(&self) -> JobQueueHandle {
        JobQueueHandle {
            tx: self.tx.clone(),
        }
    }
}

/// A cheap, cloneable handle to a [`JobQueue`].
#[derive(Clone)]
pub struct JobQueueHandle {
    tx: mpsc::Sender<JobCommand>,
}

impl JobQueueHandle {
    /// Send a command and wait for its reply.
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> JobCommand,
    ) -> Result<T, JobQueueError> {
        let (reply, rx) = oneshot::channel();
        // We need a mutable copy of `tx` to send the command.
        let mut tx = self.tx.clone();
        tx.send(command(reply))
            .await
            .map_err(|_| JobQueueError::Closed)?;
        rx.await.map_err(|_| JobQueueError::Closed)
    }

    pub async fn enqueue(
        &self,
        user_id: &str,
        filename: &str,
        priority: JobPriority,
    ) -> Result<JobId, JobQueueError> {
        self.request(|reply| JobCommand::Enqueue {
            user_id: user_id.to_owned(),
            filename: filename.to_owned(),
            priority,
            reply,
        })
        .await
    }

    pub async fn status(&self, id: JobId) -> Result<ProcessingQueueItem, JobQueueError> {
        self.request(|reply| JobCommand::Status { id, reply })
            .await?
    }

    pub async fn start_next(&self) -> Result<Option<ProcessingQueueItem>, JobQueueError> {
        self.request(|reply| JobCommand::StartNext { reply }).await
    }

    pub async fn update_progress(&self, id: JobId, progress: u8) -> Result<(), JobQueueError> {
        self.request(|reply| JobCommand::UpdateProgress {
            id,
            progress,
            reply,
        })
        .await?
    }

    pub async fn mark_completed(&self, id: JobId) -> Result<(), JobQueueError> {
        self.request(|reply| JobCommand::MarkCompleted { id, reply })
            .await?
    }

    pub async fn mark_failed(&self, id: JobId, message: &str) -> Result<(), JobQueueError> {
        self.request(|reply| JobCommand::MarkFailed {
            id,
            message: message.to_owned(),
            reply,
        })
        .await?
    }

    pub async fn retry(&self, id: JobId) -> Result<ProcessingQueueItem, JobQueueError> {
        self.request(|reply| JobCommand::Retry { id, reply }).await?
    }

    pub async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<usize, JobQueueError> {
        self.request(|reply| JobCommand::PurgeTerminal { before, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<ProcessingQueueItem>, JobQueueError> {
        self.request(|reply| JobCommand::Snapshot { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn priorities(state: &JobQueueState) -> Vec<JobPriority> {
        state.snapshot().iter().map(|item| item.priority).collect()
    }

    #[test]
    fn test_priority_order() {
        use JobPriority::*;
        let mut state = JobQueueState::new(0);
        let ids = [Low, High, Normal, High].map(|p| state.enqueue("u", "f.pdf", p));
        assert_eq!(priorities(&state), vec![High, High, Normal, Low]);

        // FIFO within a priority.
        let order = state.snapshot().iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(order, vec![ids[1], ids[3], ids[2], ids[0]]);
        assert_eq!(state.start_next().unwrap().id, ids[1]);
        assert_eq!(state.start_next().unwrap().id, ids[3]);
    }

    #[test]
    fn test_new_job_fields() {
        let mut state = JobQueueState::new(0);
        let id = state.enqueue("alice", "scan.pdf", JobPriority::default());
        let item = state.status(id).unwrap();
        assert_eq!(item.user_id, "alice");
        assert_eq!(item.filename, "scan.pdf");
        assert_eq!(item.status, JobStatus::Pending);
        assert_eq!(item.priority, JobPriority::Normal);
        assert_eq!(item.retry_count, 0);
        assert!(item.started_at.is_none());
    }

    #[test]
    fn test_lifecycle() {
        let mut state = JobQueueState::new(0);
        let id = state.enqueue("u", "f.pdf", JobPriority::Normal);
        let started = state.start_next().unwrap();
        assert_eq!(started.status, JobStatus::Processing);
        assert!(started.started_at.is_some());
        assert!(state.start_next().is_none());

        state.update_progress(id, 250).unwrap();
        assert_eq!(state.status(id).unwrap().progress, Some(100));
        state.update_progress(id, 40).unwrap();
        assert_eq!(state.status(id).unwrap().progress, Some(40));

        state.mark_completed(id).unwrap();
        let done = state.status(id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, Some(100));
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut state = JobQueueState::new(3);
        let id = state.enqueue("u", "f.pdf", JobPriority::Normal);
        state.mark_completed(id).unwrap();

        assert_eq!(
            state.mark_failed(id, "late failure"),
            Err(JobQueueError::IllegalTransition {
                id,
                from: JobStatus::Completed,
                to: JobStatus::Failed,
            })
        );
        assert_eq!(
            state.update_progress(id, 10),
            Err(JobQueueError::Terminal {
                id,
                status: JobStatus::Completed,
            })
        );
        assert!(matches!(
            state.retry(id),
            Err(JobQueueError::IllegalTransition { .. })
        ));
        assert_eq!(state.status(id).unwrap().status, JobStatus::Completed);

        let missing = JobId::new();
        assert_eq!(
            state.mark_completed(missing),
            Err(JobQueueError::NotFound(missing))
        );
    }

    #[test]
    fn test_completion_clears_earlier_error() {
        let mut state = JobQueueState::new(1);
        let id = state.enqueue("u", "f.pdf", JobPriority::Normal);
        state.start_next().unwrap();
        state.mark_failed(id, "network down").unwrap();
        state.retry(id).unwrap();
        state.start_next().unwrap();
        state.mark_completed(id).unwrap();

        let item = state.status(id).unwrap();
        assert_eq!(item.status, JobStatus::Completed);
        assert_eq!(item.retry_count, 1);
        assert!(item.error_message.is_none());
    }

    #[test]
    fn test_retry_limit() {
        let mut state = JobQueueState::new(1);
        let id = state.enqueue("u", "f.pdf", JobPriority::Low);
        let other = state.enqueue("u", "g.pdf", JobPriority::Low);
        state.start_next().unwrap();
        state.mark_failed(id, "network down").unwrap();

        let retried = state.retry(id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.error_message.as_deref(), Some("network down"));
        assert!(retried.completed_at.is_none());

        // Retried jobs go to the back of their priority.
        assert_eq!(state.start_next().unwrap().id, other);
        assert_eq!(state.start_next().unwrap().id, id);

        state.mark_failed(id, "still down").unwrap();
        assert_eq!(
            state.retry(id),
            Err(JobQueueError::RetryLimit { id, retries: 1 })
        );
    }

    #[test]
    fn test_purge_terminal() {
        let mut state = JobQueueState::new(0);
        let done = state.enqueue("u", "a.pdf", JobPriority::Normal);
        let failed = state.enqueue("u", "b.pdf", JobPriority::Normal);
        let pending = state.enqueue("u", "c.pdf", JobPriority::Normal);
        state.mark_completed(done).unwrap();
        state.mark_failed(failed, "bad").unwrap();

        assert_eq!(state.purge_terminal(Utc::now() - TimeDelta::hours(1)), 0);
        assert_eq!(state.purge_terminal(Utc::now() + TimeDelta::seconds(1)), 2);
        let remaining = state.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, pending);
    }

    #[test]
    fn test_serialization() {
        let mut state = JobQueueState::new(0);
        let id = state.enqueue("u", "f.pdf", JobPriority::High);
        let json = serde_json::to_value(state.status(id).unwrap()).unwrap();
        assert_eq!(json["userId"], "u");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["id"], id.to_string());
        assert!(json.get("startedAt").is_none());
    }

    #[tokio::test]
    async fn test_queue_task() {
        let (queue, worker) = JobQueue::start(1);
        let handle = queue.handle();
        let low = handle.enqueue("u", "low.pdf", JobPriority::Low).await.unwrap();
        let high = handle.enqueue("u", "high.pdf", JobPriority::High).await.unwrap();

        let next = handle.start_next().await.unwrap().unwrap();
        assert_eq!(next.id, high);
        handle.update_progress(high, 50).await.unwrap();
        handle.mark_failed(high, "timeout").await.unwrap();
        assert_eq!(handle.retry(high).await.unwrap().retry_count, 1);
        assert_eq!(handle.start_next().await.unwrap().unwrap().id, high);
        handle.mark_completed(high).await.unwrap();
        assert_eq!(handle.status(low).await.unwrap().status, JobStatus::Pending);
        assert_eq!(
            handle.mark_failed(high, "again").await,
            Err(JobQueueError::IllegalTransition {
                id: high,
                from: JobStatus::Completed,
                to: JobStatus::Failed,
            })
        );
        assert_eq!(handle.snapshot().await.unwrap().len(), 2);
        assert_eq!(
            handle
                .purge_terminal(Utc::now() + TimeDelta::seconds(1))
                .await
                .unwrap(),
            1
        );

        drop(handle);
        drop(queue);
        worker.join().await.unwrap();
    }
}
