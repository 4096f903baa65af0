//! A processor that calls a Document-AI-style `:process` REST endpoint.

use std::{env, time::Duration};

use base64::{Engine as _, prelude::BASE64_STANDARD};
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use leaky_bucket::RateLimiter;
use tokio::{fs, time};

use super::{DocumentProcessor, ProcessorError, ProcessorErrorKind, ProcessorRequest};
use crate::{
    config::DocumentAiConfig,
    layout::LayoutDocument,
    prelude::*,
    retry::{IsKnownTransient, retry_result_ok, try_potentially_transient},
};

type ProcessorRetryResult<T> = RetryResult<(), (), T, ProcessorError>;

/// The body of a `:process` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    raw_document: RawDocument,
    skip_human_review: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    /// Base64-encoded file contents.
    content: String,
    mime_type: String,
}

pub struct DocumentAiProcessor {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
    timeout: Option<Duration>,
    rate_limiter: Option<RateLimiter>,
}

impl DocumentAiProcessor {
    pub fn new(name: &str, config: &DocumentAiConfig) -> Result<Self> {
        let access_token = env::var(&config.access_token_env).ok();
        if access_token.is_none() {
            warn!(
                processor = name,
                "{} is not set, sending requests without credentials",
                config.access_token_env
            );
        }
        let client = reqwest::Client::builder()
            .build()
            .context("could not create HTTP client")?;
        Ok(Self {
            name: name.to_owned(),
            client,
            endpoint: config.endpoint.clone(),
            access_token,
            timeout: config.timeout_secs.map(Duration::from_secs),
            rate_limiter: config.rate_limit.as_ref().map(|r| r.to_rate_limiter()),
        })
    }

    /// Make a single attempt at calling the service.
    async fn send_once(&self, request: &ProcessRequest) -> ProcessorRetryResult<LayoutDocument> {
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.acquire_one().await;
        }

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        let send = builder.send();
        let response = match self.timeout {
            Some(limit) => match time::timeout(limit, send).await {
                Ok(response) => response.map_err(ProcessorError::from),
                Err(_) => Err(ProcessorError::new(
                    ProcessorErrorKind::Timeout,
                    format!("no response after {limit:?}"),
                )),
            },
            None => send.await.map_err(ProcessorError::from),
        };
        let response = try_potentially_transient!(response);

        let status = response.status();
        let body = try_potentially_transient!(response.text().await.map_err(ProcessorError::from));
        let document = if status.is_success() {
            LayoutDocument::from_json_str(&body).map_err(|err| {
                ProcessorError::new(ProcessorErrorKind::InvalidDocument, format!("{err:#}"))
            })
        } else {
            Err(ProcessorError::from_response(status, &body))
        };
        retry_result_ok(try_potentially_transient!(document))
    }
}

#[async_trait]
impl DocumentProcessor for DocumentAiProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip_all, fields(processor = %self.name, path = %request.path.display()))]
    async fn process(
        &self,
        request: &ProcessorRequest,
    ) -> Result<LayoutDocument, ProcessorError> {
        let data = fs::read(&request.path).await.map_err(|err| {
            ProcessorError::new(
                ProcessorErrorKind::InvalidDocument,
                format!("could not read {}: {err}", request.path.display()),
            )
        })?;
        let body = ProcessRequest {
            raw_document: RawDocument {
                content: BASE64_STANDARD.encode(&data),
                mime_type: request.mime_type(),
            },
            skip_human_review: true,
        };
        drop(data);

        // If we have a transient failure, back off exponentially.
        let jitter = ExponentialJitter::FromBackoffRange {
            backoff_range_millis: 1..=30_000,
            re_attempts: 5,
            jitter_ratio: 0.2,
        };
        let result = self
            .send_once(&body)
            .await
            .retry_with_async(|_| async { self.send_once(&body).await })
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                warn!(
                    "succeeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                error!(
                    "FAILED after exhausting all {} retrying attempts with error {fatal_error:?}",
                    retry_errors_list.len(),
                )
            });
        match result {
            ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
                Ok(output)
            }
            ResolvedResult::Fatal { error, .. } => Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
        }
    }
}
