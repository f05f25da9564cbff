use super::{RawText, TextExtractor};

/// Slower, layout-aware extractor built on `pdf-extract`.
///
/// Reconstructs reading order from glyph positions, which recovers text from
/// PDFs whose content streams `lopdf` decodes poorly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutExtractor;

impl LayoutExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for LayoutExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract(&self, bytes: &[u8]) -> Result<RawText, String> {
        let _span = tracing::info_span!("extractor.layout").entered();

        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())?;
        Ok(RawText::from_pages(&pages))
    }
}
