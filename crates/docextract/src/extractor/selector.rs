//! Dual-strategy extraction.
//!
//! The primary extractor runs first. When its output is too thin the secondary
//! extractor runs as well and the longer text wins, with ties going to the
//! primary result.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use super::{
    DocumentExtractor, ExtractedText, FsSourceResolver, LayoutExtractor, LopdfExtractor, RawText,
    SourceResolver, TextExtractor,
};
use crate::error::ExtractError;
use crate::model::ExtractionMethod;

/// Trimmed primary output longer than this many characters is accepted as is.
pub const DEFAULT_QUALITY_THRESHOLD: usize = 100;

pub struct StrategySelector {
    resolver: Box<dyn SourceResolver>,
    primary: Box<dyn TextExtractor>,
    secondary: Box<dyn TextExtractor>,
    quality_threshold: usize,
}

impl StrategySelector {
    pub fn new(
        resolver: Box<dyn SourceResolver>,
        primary: Box<dyn TextExtractor>,
        secondary: Box<dyn TextExtractor>,
        quality_threshold: usize,
    ) -> Self {
        Self {
            resolver,
            primary,
            secondary,
            quality_threshold,
        }
    }

    /// Filesystem source with `lopdf` as primary and `pdf-extract` as secondary.
    pub fn for_pdfs(quality_threshold: usize) -> Self {
        Self::new(
            Box::new(FsSourceResolver::new()),
            Box::new(LopdfExtractor::new()),
            Box::new(LayoutExtractor::new()),
            quality_threshold,
        )
    }

    /// Chooses between the two extractors for already-resolved bytes.
    pub fn select(&self, bytes: &[u8]) -> ExtractedText {
        let primary = run_guarded(self.primary.as_ref(), bytes);
        let primary_quality = primary.text.trim().chars().count();

        if primary_quality > self.quality_threshold {
            log::debug!(
                "{} produced {} chars, above threshold {}",
                self.primary.name(),
                primary_quality,
                self.quality_threshold
            );
            return ExtractedText::new(primary.text, primary.page_count, ExtractionMethod::Primary);
        }

        log::debug!(
            "{} produced only {} chars, trying {}",
            self.primary.name(),
            primary_quality,
            self.secondary.name()
        );
        let secondary = run_guarded(self.secondary.as_ref(), bytes);

        if secondary.text.chars().count() > primary.text.chars().count() {
            ExtractedText::new(
                secondary.text,
                secondary.page_count,
                ExtractionMethod::Secondary,
            )
        } else {
            ExtractedText::new(primary.text, primary.page_count, ExtractionMethod::Primary)
        }
    }
}

impl DocumentExtractor for StrategySelector {
    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractError> {
        let _span = tracing::info_span!("extractor.select", path = %path.display()).entered();

        let bytes = self.resolver.resolve(path)?;
        let extracted = self.select(&bytes);

        log::info!(
            "Extracted {} chars from {} page(s) of {} using {} method",
            extracted.text_length,
            extracted.page_count,
            path.display(),
            extracted.method
        );
        Ok(extracted)
    }
}

/// Runs one extractor, turning errors and panics into an empty result.
fn run_guarded(extractor: &dyn TextExtractor, bytes: &[u8]) -> RawText {
    match catch_unwind(AssertUnwindSafe(|| extractor.extract(bytes))) {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            log::warn!("{} extraction failed: {}", extractor.name(), e);
            RawText::default()
        }
        Err(_) => {
            log::error!("{} extraction panicked", extractor.name());
            RawText::default()
        }
    }
}
