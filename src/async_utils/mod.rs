//! Asynchronous utilities for use with Tokio.

use std::pin::Pin;

use futures::Stream;
use tokio::task::JoinHandle;

use crate::prelude::*;

pub mod io;
pub mod size_hint;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// A handle for one or more background workers. This can be awaited
/// to wait for all workers to complete normally.
pub struct JoinWorker {
    /// The task handle.
    future: BoxedFuture<Result<()>>,
}

impl JoinWorker {
    /// Create a new worker handle from a [`JoinHandle`].
    pub fn from_handle(handle: JoinHandle<Result<()>>) -> Self {
        Self {
            future: Box::pin(async move { handle.await.context("could not join task")? }),
        }
    }

    /// Combine several workers into one, which fails if any of them fail.
    pub fn join_all(workers: Vec<JoinWorker>) -> Self {
        Self {
            future: Box::pin(async move {
                for result in futures::future::join_all(workers.into_iter().map(|w| w.join())).await
                {
                    result?;
                }
                Ok(())
            }),
        }
    }

    /// Wait for the worker to complete.
    pub async fn join(self) -> Result<()> {
        self.future.await
    }
}
