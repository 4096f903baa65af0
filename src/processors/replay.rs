//! A processor that replays previously captured service output from disk.
//!
//! For `scan.pdf` with extension `json`, we read `scan.json`. This is useful
//! for re-running extraction without paying for another service call, and for
//! tests.

use std::io;

use tokio::fs;

use super::{DocumentProcessor, ProcessorError, ProcessorErrorKind, ProcessorRequest};
use crate::{layout::LayoutDocument, prelude::*};

pub struct ReplayProcessor {
    name: String,
    extension: String,
}

impl ReplayProcessor {
    pub fn new(name: &str, extension: &str) -> Self {
        Self {
            name: name.to_owned(),
            extension: extension.trim_start_matches('.').to_owned(),
        }
    }

    /// Where we expect to find the captured output for `path`.
    pub fn replay_path(&self, path: &Path) -> PathBuf {
        path.with_extension(&self.extension)
    }
}

#[async_trait]
impl DocumentProcessor for ReplayProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip_all, fields(processor = %self.name, path = %request.path.display()))]
    async fn process(
        &self,
        request: &ProcessorRequest,
    ) -> Result<LayoutDocument, ProcessorError> {
        let path = self.replay_path(&request.path);
        let json = fs::read_to_string(&path).await.map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::InvalidData => ProcessorErrorKind::InvalidDocument,
                _ => ProcessorErrorKind::ProcessingError,
            };
            ProcessorError::new(kind, format!("could not read {}: {err}", path.display()))
        })?;
        LayoutDocument::from_json_str(&json).map_err(|err| {
            ProcessorError::new(
                ProcessorErrorKind::InvalidDocument,
                format!("{}: {err:#}", path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_path() {
        let processor = ReplayProcessor::new("main", ".ocr.json");
        assert_eq!(
            processor.replay_path(Path::new("docs/scan.pdf")),
            Path::new("docs/scan.ocr.json")
        );
    }

    #[tokio::test]
    async fn test_replay_fixture() {
        let processor = ReplayProcessor::new("main", "json");
        let request = ProcessorRequest::new("tests/fixtures/docs/letter.pdf");
        let document = processor.process(&request).await.unwrap();
        assert!(!document.pages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files() {
        let processor = ReplayProcessor::new("main", "json");
        let err = processor
            .process(&ProcessorRequest::new("tests/fixtures/docs/missing.pdf"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::ProcessingError);

        let processor = ReplayProcessor::new("main", "jsonl");
        let err = processor
            .process(&ProcessorRequest::new("tests/fixtures/docs/input"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProcessorErrorKind::InvalidDocument);
    }
}
