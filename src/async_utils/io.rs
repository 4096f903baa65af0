//! I/O utilities.
//!
//! This module is responsible for reading JSON, TOML and JSONL files, and
//! writing JSONL files. Inputs may come from a file or standard input, and
//! outputs may go to a file or standard output.

use std::sync::Arc;

use futures::{TryStreamExt, pin_mut, stream::StreamExt as _};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt as _, BufReader},
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

use super::{BoxedStream, size_hint::WithSizeHintExt};

/// Does this text look like JSON rather than TOML?
fn looks_like_json(path: &Path, data: &str) -> bool {
    let ext = path.extension().unwrap_or_default();
    ext == "json" || (ext != "toml" && data.trim_start().starts_with('{'))
}

/// Read TOML or JSON from a file.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    // Read all at once because our parsing libraries don't do async I/O.
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if looks_like_json(path, &data) {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Open a file, or standard input.
async fn open_reader(
    path: Option<&Path>,
) -> Result<(String, BufReader<Box<dyn AsyncRead + Unpin + Send + Sync + 'static>>)> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("Failed to open file at path: {:?}", path))?;
            Ok((
                path.to_string_lossy().into_owned(),
                BufReader::new(Box::new(file) as Box<dyn AsyncRead + Unpin + Send + Sync>),
            ))
        }
        None => Ok((
            "stdin".to_owned(),
            BufReader::new(Box::new(tokio::io::stdin()) as Box<dyn AsyncRead + Unpin + Send + Sync>),
        )),
    }
}

/// Count the non-blank lines in a JSONL file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn count_jsonl_records(ui: &Ui, path: &Path) -> Result<(usize, Option<usize>)> {
    // If this isn't a file, we can't count records. This may happen if our
    // input is a named pipe.
    if !path.is_file() {
        return Ok((0, None));
    }

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🧮",
        msg: "Counting input records",
        done_msg: "Counted input records",
    });

    let (_, reader) = open_reader(Some(path)).await?;
    let count = LinesStream::new(reader.lines())
        .try_fold(0, |acc, line| async move {
            Ok(if line.trim().is_empty() { acc } else { acc + 1 })
        })
        .await?;
    spinner.finish_with_message(format!("Found {count} records"));
    Ok((count, Some(count)))
}

/// A stream of [`serde_json::Value`] values.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read JSONL from a file or stdin. Blank lines are skipped.
pub async fn read_jsonl(ui: Ui, path: Option<&Path>) -> Result<JsonStream> {
    let size_hint = match path {
        Some(path) => count_jsonl_records(&ui, path).await?,
        None => (0, None),
    };

    let (description, reader) = open_reader(path).await?;
    let description = Arc::new(description);
    let lines = LinesStream::new(reader.lines())
        .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
        .with_size_hint(size_hint);
    Ok(Box::pin(lines.then(move |line| {
        let description = description.clone();
        async move {
            let line = line?;
            let value: Value = serde_json::from_str(&line).with_context(|| {
                format!(
                    "Failed to parse JSON from line in {:?}: {:?}",
                    description, line
                )
            })?;
            Ok(value)
        }
    })))
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of JSON values to either standard output or a file, one
/// per line.
pub async fn write_output(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = tokio::io::BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(value) = stream.next().await {
        let value = value?;
        let json = serde_json::to_string(&value)
            .with_context(|| format!("Failed to serialize JSON: {:?}", value))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::Stream as _;

    use super::*;

    #[test]
    fn test_format_detection() {
        assert!(looks_like_json(Path::new("a.json"), ""));
        assert!(!looks_like_json(Path::new("a.toml"), "{"));
        assert!(looks_like_json(Path::new("a.conf"), "  {\"queue\": {}}"));
        assert!(!looks_like_json(Path::new("a.conf"), "[queue]"));
    }

    #[tokio::test]
    async fn test_read_jsonl_fixture() {
        let ui = Ui::init_for_tests();
        let path = Path::new("tests/fixtures/docs/input.jsonl");
        let stream = read_jsonl(ui, Some(path)).await.unwrap();
        assert!(stream.size_hint().1.is_some_and(|n| n > 0));
        let values = stream.try_collect::<Vec<_>>().await.unwrap();
        assert!(values.iter().all(|v| v.get("id").is_some()));
    }
}
