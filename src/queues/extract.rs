//! Batch extraction.
//!
//! All input records are enqueued up front, so that priorities apply across
//! the whole batch. A fixed pool of workers then claims jobs from the
//! [`JobQueue`] until it runs dry. Outputs are emitted in completion order.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::{SinkExt as _, StreamExt as _, channel::mpsc};
use schemars::JsonSchema;

use super::{
    jobs::{JobId, JobPriority, JobQueue, JobQueueError, JobQueueHandle, ProcessingQueueItem},
    work::{WorkInput, WorkOutput},
};
use crate::{
    async_utils::{BoxedStream, JoinWorker},
    extract::ProcessedDocument,
    prelude::*,
    processors::{ProcessorOrchestrator, ProcessorRequest},
};

/// A document to extract.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct ExtractInput {
    /// Path to the document.
    pub path: PathBuf,

    /// Higher priority documents are processed first.
    #[serde(default)]
    pub priority: JobPriority,

    /// Also run the form parser, if one is configured.
    #[serde(default)]
    pub parse_forms: bool,

    /// MIME type. Guessed from `path` if absent.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// The result of extracting a document.
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct ExtractOutput {
    /// The queue job which processed this document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// How many times the job was retried after a transient failure.
    pub retry_count: u32,

    pub path: PathBuf,

    /// Present unless extraction failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<ProcessedDocument>,
}

pub type ExtractInputRecord = WorkInput<ExtractInput>;
pub type ExtractOutputRecord = WorkOutput<ExtractOutput>;

/// Return value of [`extract_files`].
pub struct ExtractStreamInfo {
    pub stream: BoxedStream<Result<ExtractOutputRecord>>,

    /// Wait on this after draining `stream`.
    pub worker: JoinWorker,
}

/// Shared by all workers in a batch.
struct Batch {
    queue: JobQueueHandle,
    orchestrator: Arc<ProcessorOrchestrator>,
    inputs: HashMap<JobId, ExtractInputRecord>,

    /// Errors from earlier attempts at each job.
    errors: Mutex<HashMap<JobId, Vec<String>>>,
}

impl Batch {
    fn take_errors(&self, id: JobId) -> Vec<String> {
        self.errors
            .lock()
            .expect("lock poisoned")
            .remove(&id)
            .unwrap_or_default()
    }

    fn record_error(&self, id: JobId, error: String) {
        self.errors
            .lock()
            .expect("lock poisoned")
            .entry(id)
            .or_default()
            .push(error);
    }
}

/// Extract a stream of documents using `job_count` concurrent workers.
#[instrument(level = "debug", skip_all, fields(user_id = %user_id, job_count = job_count))]
pub async fn extract_files(
    mut input: BoxedStream<Result<ExtractInputRecord>>,
    orchestrator: Arc<ProcessorOrchestrator>,
    max_retries: u32,
    user_id: &str,
    job_count: usize,
) -> Result<ExtractStreamInfo> {
    let (queue, queue_worker) = JobQueue::start(max_retries);
    let handle = queue.handle();

    let mut inputs = HashMap::new();
    while let Some(record) = input.next().await {
        let record = record?;
        let filename = record.data.path.display().to_string();
        let id = handle
            .enqueue(user_id, &filename, record.data.priority)
            .await?;
        trace!(%id, %filename, "Enqueued job");
        inputs.insert(id, record);
    }
    debug!(count = inputs.len(), "Enqueued all inputs");
    // Workers hold the remaining handles, so the queue closes when they exit.
    drop(queue);

    let batch = Arc::new(Batch {
        queue: handle,
        orchestrator,
        inputs,
        errors: Mutex::new(HashMap::new()),
    });
    let (tx, rx) = mpsc::channel(job_count.max(1));
    let mut workers = (0..job_count.max(1))
        .map(|_| {
            let batch = batch.clone();
            let tx = tx.clone();
            JoinWorker::from_handle(tokio::spawn(run_worker(batch, tx)))
        })
        .collect::<Vec<_>>();
    drop(batch);
    drop(tx);
    workers.push(queue_worker);

    Ok(ExtractStreamInfo {
        stream: rx.boxed(),
        worker: JoinWorker::join_all(workers),
    })
}

/// Claim and process jobs until none are pending.
async fn run_worker(
    batch: Arc<Batch>,
    mut tx: mpsc::Sender<Result<ExtractOutputRecord>>,
) -> Result<()> {
    while let Some(job) = batch.queue.start_next().await? {
        if let Some(output) = process_job(&batch, &job).await? {
            tx.send(Ok(output))
                .await
                .context("could not send extraction output")?;
        }
    }
    Ok(())
}

/// Process a claimed job. Returns `None` if the job was put back in the
/// queue for another attempt.
#[instrument(level = "debug", skip_all, fields(job_id = %job.id, path = %job.filename))]
async fn process_job(
    batch: &Batch,
    job: &ProcessingQueueItem,
) -> Result<Option<ExtractOutputRecord>> {
    let record = batch
        .inputs
        .get(&job.id)
        .ok_or_else(|| anyhow!("no input for job {}", job.id))?;
    let request = ProcessorRequest {
        path: record.data.path.clone(),
        mime_type: record.data.mime_type.clone(),
    };

    let result = batch
        .orchestrator
        .process(&request, record.data.parse_forms)
        .await;
    let mut output = ExtractOutput {
        job_id: Some(job.id),
        retry_count: job.retry_count,
        path: record.data.path.clone(),
        document: None,
    };
    match result {
        Ok(document) => {
            batch.queue.mark_completed(job.id).await?;
            output.document = Some(document);
            Ok(Some(WorkOutput::new_ok(
                record.id.clone(),
                batch.take_errors(job.id),
                output,
            )))
        }
        Err(err) => {
            let message = err.to_string();
            batch.queue.mark_failed(job.id, &message).await?;
            batch.record_error(job.id, message);
            if err.is_retryable() {
                match batch.queue.retry(job.id).await {
                    Ok(_) => {
                        warn!("Retrying after error: {err}");
                        return Ok(None);
                    }
                    Err(JobQueueError::RetryLimit { .. }) => {
                        debug!("Out of retries");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            error!("Extraction failed: {err}");
            Ok(Some(WorkOutput::new_failed(
                record.id.clone(),
                batch.take_errors(job.id),
                output,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::TryStreamExt as _;

    use super::*;
    use crate::{
        layout::LayoutDocument,
        processors::{
            DocumentProcessor, ProcessorError, ProcessorErrorKind, replay::ReplayProcessor,
        },
        queues::work::WorkStatus,
    };

    /// Fails with a network error a fixed number of times, then replays.
    struct FlakyProcessor {
        failures_left: AtomicUsize,
        replay: ReplayProcessor,
    }

    #[async_trait]
    impl DocumentProcessor for FlakyProcessor {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn process(
            &self,
            request: &ProcessorRequest,
        ) -> Result<LayoutDocument, ProcessorError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ProcessorError::new(
                    ProcessorErrorKind::NetworkError,
                    "connection reset",
                ));
            }
            self.replay.process(request).await
        }
    }

    fn flaky(failures: usize) -> Arc<ProcessorOrchestrator> {
        Arc::new(ProcessorOrchestrator::new(Arc::new(FlakyProcessor {
            failures_left: AtomicUsize::new(failures),
            replay: ReplayProcessor::new("replay", "json"),
        })))
    }

    fn inputs(records: Vec<Value>) -> BoxedStream<Result<ExtractInputRecord>> {
        futures::stream::iter(records.into_iter().map(WorkInput::from_json)).boxed()
    }

    async fn run(
        records: Vec<Value>,
        orchestrator: Arc<ProcessorOrchestrator>,
        max_retries: u32,
    ) -> Vec<ExtractOutputRecord> {
        let ExtractStreamInfo { stream, worker } =
            extract_files(inputs(records), orchestrator, max_retries, "tester", 1)
                .await
                .unwrap();
        let outputs = stream.try_collect::<Vec<_>>().await.unwrap();
        worker.join().await.unwrap();
        outputs
    }

    #[tokio::test]
    async fn test_priority_and_failures() {
        let outputs = run(
            vec![
                json!({ "id": "letter", "path": "tests/fixtures/docs/letter.pdf", "priority": "low" }),
                json!({ "id": "missing", "path": "tests/fixtures/docs/missing.pdf", "priority": "high" }),
            ],
            flaky(0),
            2,
        )
        .await;

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].id, json!("missing"));
        assert_eq!(outputs[0].status, WorkStatus::Failed);
        assert_eq!(outputs[0].errors.len(), 1);
        assert_eq!(outputs[0].data.retry_count, 0);
        assert!(outputs[0].data.document.is_none());

        assert_eq!(outputs[1].id, json!("letter"));
        assert_eq!(outputs[1].status, WorkStatus::Ok);
        assert!(outputs[1].data.job_id.is_some());
        let document = outputs[1].data.document.as_ref().unwrap();
        assert!(document.text.contains("Dear"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let record = json!({ "id": 1, "path": "tests/fixtures/docs/letter.pdf" });

        let outputs = run(vec![record.clone()], flaky(2), 2).await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].status, WorkStatus::Ok);
        assert_eq!(outputs[0].data.retry_count, 2);
        assert_eq!(outputs[0].errors.len(), 2);

        let outputs = run(vec![record], flaky(2), 1).await;
        assert_eq!(outputs[0].status, WorkStatus::Failed);
        assert_eq!(outputs[0].data.retry_count, 1);
        assert_eq!(outputs[0].errors.len(), 2);
    }

    #[tokio::test]
    async fn test_many_workers() {
        let records = (0..10)
            .map(|i| json!({ "id": i, "path": "tests/fixtures/docs/letter.pdf" }))
            .collect::<Vec<_>>();
        let ExtractStreamInfo { stream, worker } =
            extract_files(inputs(records), flaky(0), 0, "tester", 4)
                .await
                .unwrap();
        let outputs = stream.try_collect::<Vec<_>>().await.unwrap();
        worker.join().await.unwrap();
        assert_eq!(outputs.len(), 10);
        assert!(outputs.iter().all(|o| o.status == WorkStatus::Ok));
    }
}
