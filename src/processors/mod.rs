//! External document processors.
//!
//! A processor takes a document on disk and returns the service's layout
//! output for it. Everything after that is done locally by
//! [`crate::extract`].

use std::sync::Arc;

use crate::{config::ProcessorConfig, layout::LayoutDocument, prelude::*};

pub mod document_ai;
pub mod error;
pub mod orchestrator;
pub mod replay;

pub use self::{
    error::{ProcessorError, ProcessorErrorKind},
    orchestrator::ProcessorOrchestrator,
};

/// A document to process.
#[derive(Clone, Debug)]
pub struct ProcessorRequest {
    pub path: PathBuf,

    /// The MIME type, if known. Otherwise processors guess from the path.
    pub mime_type: Option<String>,
}

impl ProcessorRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: None,
        }
    }

    /// The MIME type, guessing from the file extension if we weren't told.
    pub fn mime_type(&self) -> String {
        self.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.path)
                .first_or_octet_stream()
                .essence_str()
                .to_owned()
        })
    }
}

/// Interface to an external document-understanding service.
#[async_trait]
pub trait DocumentProcessor: Send + Sync + 'static {
    /// A short name, for logs.
    fn name(&self) -> &str;

    /// Process a document and return its layout.
    async fn process(
        &self,
        request: &ProcessorRequest,
    ) -> Result<LayoutDocument, ProcessorError>;
}

/// Build a processor from its configuration.
pub fn processor_from_config(
    name: &str,
    config: &ProcessorConfig,
) -> Result<Arc<dyn DocumentProcessor>> {
    Ok(match config {
        ProcessorConfig::Replay(replay) => {
            Arc::new(replay::ReplayProcessor::new(name, &replay.extension))
        }
        ProcessorConfig::DocumentAi(document_ai) => Arc::new(
            document_ai::DocumentAiProcessor::new(name, document_ai)
                .with_context(|| format!("could not configure processor {name:?}"))?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_guessing() {
        assert_eq!(ProcessorRequest::new("scan.pdf").mime_type(), "application/pdf");
        assert_eq!(ProcessorRequest::new("page.png").mime_type(), "image/png");
        let mut request = ProcessorRequest::new("blob");
        assert_eq!(request.mime_type(), "application/octet-stream");
        request.mime_type = Some("image/tiff".to_owned());
        assert_eq!(request.mime_type(), "image/tiff");
    }
}
