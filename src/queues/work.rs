//! Input and output records for batch processing.
//!
//! Every input line carries an `id`, which is copied to the matching output
//! line so that callers can join results back to their inputs. Output records
//! also carry a status and a list of errors, which we use to decide whether a
//! batch run as a whole succeeded.

use std::sync::{Arc, Mutex};

use futures::StreamExt as _;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_jsonl, write_output},
    },
    prelude::*,
    ui::Ui,
};

/// An input record.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct WorkInput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// The input data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkInput<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Convert from a JSON value to the input type.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value).context("failed to deserialize input")
    }

    /// Read a stream from a [`Path`] or from standard input.
    pub async fn read_stream(ui: Ui, path: Option<&Path>) -> Result<BoxedStream<Result<Self>>> {
        Ok(read_jsonl(ui, path)
            .await?
            .map(|value| Self::from_json(value?))
            .boxed())
    }
}

/// Output status of a work item.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// The work item was successful.
    Ok,

    /// The work item failed.
    Failed,
}

/// An output record.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct WorkOutput<T>
where
    T: 'static,
{
    /// The unique ID of the work item.
    pub id: Value,

    /// What is the status of this work item?
    pub status: WorkStatus,

    /// Any errors that occurred during processing. Because of retries, even
    /// successful items may have errors.
    pub errors: Vec<String>,

    /// The output data for the work item.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkOutput<T>
where
    T: Serialize + Send + 'static,
{
    pub fn new_ok(id: Value, errors: Vec<String>, data: T) -> Self {
        Self {
            id,
            status: WorkStatus::Ok,
            errors,
            data,
        }
    }

    pub fn new_failed(id: Value, errors: Vec<String>, data: T) -> Self {
        Self {
            id,
            status: WorkStatus::Failed,
            errors,
            data,
        }
    }

    /// Convert from the output type to a JSON value.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).context("failed to serialize output")
    }

    /// Write a stream of outputs to a [`Path`] or to standard output, and
    /// fail if too many of them were failures.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        stream: BoxedStream<Result<Self>>,
        allowed_failure_rate: f32,
    ) -> Result<()> {
        let (stream, counters) = WorkOutputCounters::wrap_stream(stream);
        let output = stream.map(|value| value?.to_json()).boxed();
        write_output(path, output).await?;
        counters.finish(ui, allowed_failure_rate)
    }
}

/// Counters for a batch run.
#[derive(Clone, Debug, Default)]
pub struct WorkOutputCounters {
    /// How many records did we process?
    pub total_record_count: usize,

    /// How many records did we fail to process?
    pub failure_count: usize,

    /// How many non-fatal errors did we encounter?
    pub non_fatal_error_count: usize,
}

impl WorkOutputCounters {
    /// Wrap a stream with counters.
    pub fn wrap_stream<T>(
        stream: BoxedStream<Result<WorkOutput<T>>>,
    ) -> (
        BoxedStream<Result<WorkOutput<T>>>,
        Arc<Mutex<WorkOutputCounters>>,
    )
    where
        T: Send + 'static,
    {
        let counters = Arc::new(Mutex::new(Self::default()));
        let counters_clone = counters.clone();
        let stream = stream
            .map(move |value| {
                let value = value?;
                counters_clone.update(&value);
                Ok(value)
            })
            .boxed();
        (stream, counters)
    }

    /// What fraction of records failed?
    pub fn failure_rate(&self) -> f32 {
        if self.total_record_count == 0 {
            0.0
        } else {
            self.failure_count as f32 / self.total_record_count as f32
        }
    }
}

/// We actually want to put methods in `Mutex<WorkOutputCounters>`, because
/// that's the type we actually work with. To do that, we need to define an
/// extension trait with the methods we want.
pub trait WorkItemCounterExt {
    /// Update counters for a work item.
    fn update<T>(&self, item: &WorkOutput<T>);

    /// Display counter values to the user.
    fn finish(self: Arc<Self>, ui: &Ui, allowed_failure_rate: f32) -> Result<()>;
}

impl WorkItemCounterExt for Mutex<WorkOutputCounters> {
    fn update<T>(&self, item: &WorkOutput<T>) {
        // Hold a sync lock, but just for an instant to update counters.
        let mut counters = self.lock().expect("lock poisoned");
        counters.total_record_count += 1;
        if item.status != WorkStatus::Ok {
            counters.failure_count += 1;
        } else if !item.errors.is_empty() {
            counters.non_fatal_error_count += item.errors.len();
        }
    }

    fn finish(self: Arc<Self>, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let counters = self.lock().expect("lock poisoned").to_owned();
        let failure_rate = counters.failure_rate();
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of outputs were failures, but only {:.2}% were allowed",
                counters.failure_count,
                counters.total_record_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            if counters.non_fatal_error_count > 0 {
                ui.display_message(
                    "⚠️",
                    &format!(
                        "{} non-fatal errors encountered",
                        counters.non_fatal_error_count
                    ),
                );
            }
            if counters.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!("{} records could not be processed", counters.failure_count),
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Deserialize, Serialize)]
    struct Data {
        path: String,
    }

    fn counted(outputs: Vec<WorkOutput<Data>>) -> Arc<Mutex<WorkOutputCounters>> {
        let counters = Arc::new(Mutex::new(WorkOutputCounters::default()));
        for output in &outputs {
            counters.update(output);
        }
        counters
    }

    fn data() -> Data {
        Data {
            path: "a.pdf".to_owned(),
        }
    }

    #[test]
    fn test_flattened_records() {
        let input =
            WorkInput::<Data>::from_json(json!({ "id": 7, "path": "a.pdf" })).unwrap();
        assert_eq!(input.id, json!(7));
        assert_eq!(input.data.path, "a.pdf");

        let output = WorkOutput::new_failed(json!("x"), vec!["boom".to_owned()], data());
        assert_eq!(
            output.to_json().unwrap(),
            json!({ "id": "x", "status": "failed", "errors": ["boom"], "path": "a.pdf" })
        );
    }

    #[test]
    fn test_failure_rate() {
        let ui = Ui::init_for_tests();
        assert!(counted(vec![]).finish(&ui, 0.0).is_ok());

        let outputs = vec![
            WorkOutput::new_ok(json!(1), vec!["retried".to_owned()], data()),
            WorkOutput::new_failed(json!(2), vec!["boom".to_owned()], data()),
        ];
        let counters = counted(outputs.clone());
        {
            let snapshot = counters.lock().unwrap();
            assert_eq!(snapshot.total_record_count, 2);
            assert_eq!(snapshot.failure_count, 1);
            assert_eq!(snapshot.non_fatal_error_count, 1);
        }
        assert!(counters.finish(&ui, 0.25).is_err());
        assert!(counted(outputs).finish(&ui, 0.5).is_ok());
    }
}
