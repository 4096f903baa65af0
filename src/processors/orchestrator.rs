//! Choosing which processors to run, and merging their results.
//!
//! The main processor always runs, and its failure is the document's failure.
//! The OCR and form processors are strictly corrective: if they fail, we log
//! it and keep what we had.

use std::{sync::Arc, time::Instant};

use super::{DocumentProcessor, ProcessorError, ProcessorRequest, processor_from_config};
use crate::{
    config::ProcessorsConfig,
    extract::{OverallQuality, ProcessedDocument, extract_document, pipeline::elapsed_ms},
    prelude::*,
};

pub struct ProcessorOrchestrator {
    main: Arc<dyn DocumentProcessor>,
    ocr: Option<Arc<dyn DocumentProcessor>>,
    forms: Option<Arc<dyn DocumentProcessor>>,
}

impl ProcessorOrchestrator {
    pub fn new(main: Arc<dyn DocumentProcessor>) -> Self {
        Self {
            main,
            ocr: None,
            forms: None,
        }
    }

    /// Use `ocr` to re-process documents with poor OCR quality.
    pub fn with_ocr(mut self, ocr: Arc<dyn DocumentProcessor>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Use `forms` when form parsing is requested.
    pub fn with_forms(mut self, forms: Arc<dyn DocumentProcessor>) -> Self {
        self.forms = Some(forms);
        self
    }

    pub fn from_config(config: &ProcessorsConfig) -> Result<Self> {
        let mut orchestrator = Self::new(processor_from_config("main", &config.main)?);
        if let Some(ocr) = &config.ocr {
            orchestrator = orchestrator.with_ocr(processor_from_config("ocr", ocr)?);
        }
        if let Some(forms) = &config.forms {
            orchestrator = orchestrator.with_forms(processor_from_config("forms", forms)?);
        }
        Ok(orchestrator)
    }

    /// Process a document with every processor that applies.
    #[instrument(level = "debug", skip_all, fields(path = %request.path.display()))]
    pub async fn process(
        &self,
        request: &ProcessorRequest,
        parse_forms: bool,
    ) -> Result<ProcessedDocument, ProcessorError> {
        let started = Instant::now();
        let mut result = run_processor(self.main.as_ref(), request).await?;

        let needs_ocr = result
            .ocr_quality
            .as_ref()
            .is_some_and(|q| q.overall_quality == OverallQuality::Poor);
        let ocr = async {
            match &self.ocr {
                Some(ocr) if needs_ocr => run_secondary(ocr.as_ref(), request).await,
                _ => None,
            }
        };
        let forms = async {
            match &self.forms {
                Some(forms) if parse_forms => run_secondary(forms.as_ref(), request).await,
                _ => None,
            }
        };
        let (ocr, forms) = futures::join!(ocr, forms);

        // Always merge OCR before forms, whichever finished first.
        if let Some(ocr) = ocr {
            adopt_ocr(&mut result, ocr);
        }
        if let Some(forms) = forms {
            adopt_forms(&mut result, forms);
        }
        result.processing_time_ms = elapsed_ms(started);
        Ok(result)
    }
}

async fn run_processor(
    processor: &dyn DocumentProcessor,
    request: &ProcessorRequest,
) -> Result<ProcessedDocument, ProcessorError> {
    debug!(processor = processor.name(), "Running processor");
    let layout = processor.process(request).await?;
    Ok(extract_document(&layout))
}

/// Run a corrective processor, logging and discarding any failure.
async fn run_secondary(
    processor: &dyn DocumentProcessor,
    request: &ProcessorRequest,
) -> Option<ProcessedDocument> {
    match run_processor(processor, request).await {
        Ok(document) => Some(document),
        Err(err) => {
            warn!(processor = processor.name(), "Ignoring processor failure: {err}");
            None
        }
    }
}

fn average_confidence(document: &ProcessedDocument) -> f64 {
    document
        .ocr_quality
        .as_ref()
        .map(|q| q.average_confidence)
        .unwrap_or(0.0)
}

/// Take the OCR processor's text if it's more confident than ours.
fn adopt_ocr(result: &mut ProcessedDocument, ocr: ProcessedDocument) {
    let (ours, theirs) = (average_confidence(result), average_confidence(&ocr));
    if theirs > ours {
        debug!(ours, theirs, "Adopting OCR processor text");
        result.text = ocr.text;
        result.confidence = ocr.confidence;
        result.ocr_quality = ocr.ocr_quality;
    } else {
        debug!(ours, theirs, "Keeping main processor text");
    }
}

fn adopt_forms(result: &mut ProcessedDocument, forms: ProcessedDocument) {
    if let Some(found) = forms.forms.filter(|f| !f.is_empty()) {
        result.forms = Some(found);
    }
}
