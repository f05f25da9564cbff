use super::{RawText, TextExtractor};

/// Fast extractor for PDFs with a digital text layer.
///
/// Walks the page tree with `lopdf` and decodes each page's content stream.
/// Pages that fail to decode contribute no text but still count as pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<RawText, String> {
        let _span = tracing::info_span!("extractor.lopdf").entered();

        let doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;

        let mut pages = Vec::new();
        for (page_num, _) in doc.get_pages() {
            match doc.extract_text(&[page_num]) {
                Ok(page_text) => pages.push(page_text),
                Err(e) => {
                    log::debug!("lopdf could not decode page {}: {}", page_num, e);
                    pages.push(String::new());
                }
            }
        }

        Ok(RawText::from_pages(&pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_pdf;

    #[test]
    fn test_counts_pages() {
        let bytes = test_pdf::build(&["Invoice 2024-001", "Total due", "Thank you"]);
        let raw = LopdfExtractor::new().extract(&bytes).unwrap();
        assert_eq!(raw.page_count, 3);
    }

    #[test]
    fn test_text_carries_page_markers() {
        let bytes = test_pdf::build(&["Quarterly report"]);
        let raw = LopdfExtractor::new().extract(&bytes).unwrap();
        assert!(raw.text.starts_with("--- Page 1 ---\n"), "got {:?}", raw.text);
        assert!(raw.text.contains("Quarterly report"));
    }

    #[test]
    fn test_each_page_gets_its_own_marker() {
        let bytes = test_pdf::build(&["Invoice 2024-001", "Total due"]);
        let raw = LopdfExtractor::new().extract(&bytes).unwrap();
        let second = raw.text.find("--- Page 2 ---").unwrap();
        assert!(raw.text[..second].contains("Invoice 2024-001"));
        assert!(raw.text[second..].contains("Total due"));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(LopdfExtractor::new().extract(b"hello world").is_err());
        assert!(LopdfExtractor::new().extract(&[]).is_err());
    }
}
