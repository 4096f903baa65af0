//! Configuration files.
//!
//! ```toml
//! [processors.main]
//! kind = "document_ai"
//! endpoint = "https://us-documentai.googleapis.com/v1/projects/p/locations/us/processors/abc:process"
//! timeout_secs = 120
//! rate_limit = "10/s"
//!
//! [processors.ocr]
//! kind = "replay"
//! extension = "ocr.json"
//!
//! [queue]
//! max_retries = 2
//! ```

use schemars::JsonSchema;

use crate::{async_utils::io::read_json_or_toml, prelude::*, rate_limit::RateLimit};

/// Environment variable holding the bearer token, unless configured otherwise.
pub const DEFAULT_ACCESS_TOKEN_ENV: &str = "DOCUMENTAI_ACCESS_TOKEN";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub processors: ProcessorsConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Load a TOML or JSON config file, or use the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => read_json_or_toml(path).await,
            None => Ok(Self::default()),
        }
    }
}

/// Which processors to run.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProcessorsConfig {
    /// Always run.
    #[serde(default)]
    pub main: ProcessorConfig,

    /// Re-run documents with poor OCR quality through this processor.
    #[serde(default)]
    pub ocr: Option<ProcessorConfig>,

    /// Run this processor when an input asks for form parsing.
    #[serde(default)]
    pub forms: Option<ProcessorConfig>,
}

/// A single processor.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorConfig {
    /// Read previously captured output from disk.
    Replay(ReplayConfig),
    /// Call a `:process` REST endpoint.
    DocumentAi(DocumentAiConfig),
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig::Replay(ReplayConfig::default())
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct ReplayConfig {
    /// Replace the input's extension with this one to find the captured
    /// output.
    #[serde(default = "default_replay_extension")]
    pub extension: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            extension: default_replay_extension(),
        }
    }
}

fn default_replay_extension() -> String {
    "json".to_owned()
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct DocumentAiConfig {
    /// Full URL of the `:process` endpoint.
    pub endpoint: String,

    /// Environment variable holding a bearer token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Per-request timeout, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Request rate limit, e.g. `"10/s"` or `"600/m"`.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub rate_limit: Option<RateLimit>,
}

fn default_access_token_env() -> String {
    DEFAULT_ACCESS_TOKEN_ENV.to_owned()
}

/// Job queue settings.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// How many times a job that failed with a retryable error may be
    /// re-queued.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}
