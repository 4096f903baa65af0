//! The `extract` subcommand.

use std::sync::Arc;

use clap::Args;
use futures::{Stream as _, StreamExt as _};

use super::StreamOpts;
use crate::{
    config::Config,
    prelude::*,
    processors::ProcessorOrchestrator,
    queues::extract::{ExtractInputRecord, ExtractOutputRecord, ExtractStreamInfo, extract_files},
    ui::{ProgressConfig, Ui},
};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// Input JSONL file, with `id` and `path` fields. Defaults to standard
    /// input.
    pub input_path: Option<PathBuf>,

    /// Output JSONL file. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// A TOML or JSON configuration file.
    #[clap(long = "config")]
    pub config_path: Option<PathBuf>,

    /// The user to record as the owner of each job.
    #[clap(long = "user", default_value = "cli")]
    pub user_id: String,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let config = Config::load(opts.config_path.as_deref()).await?;
    let orchestrator = Arc::new(ProcessorOrchestrator::from_config(&config.processors)?);

    // Open up our input stream and parse into records.
    let input = ExtractInputRecord::read_stream(ui.clone(), opts.input_path.as_deref()).await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_from_size_hint(
        &ProgressConfig {
            emoji: "🔎",
            msg: "Extracting documents",
            done_msg: "Extracted documents",
        },
        input.size_hint(),
    );

    let ExtractStreamInfo { stream, worker } = extract_files(
        input,
        orchestrator,
        config.queue.max_retries,
        &opts.user_id,
        opts.stream_opts.job_count,
    )
    .await?;
    let output = pb.wrap_stream(stream).boxed();

    ExtractOutputRecord::write_stream(
        &ui,
        opts.output_path.as_deref(),
        output,
        opts.stream_opts.allowed_failure_rate,
    )
    .await?;

    worker.join().await
}
