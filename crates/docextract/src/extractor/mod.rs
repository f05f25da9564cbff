//! Text extraction: byte sources, the two PDF extractors and the selector
//! that chooses between them.

pub mod layout;
pub mod lopdf_extractor;
pub mod selector;
pub mod source;

use std::fmt::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::ExtractError;
use crate::model::ExtractionMethod;

pub use layout::LayoutExtractor;
pub use lopdf_extractor::LopdfExtractor;
pub use selector::StrategySelector;
pub use source::{FsSourceResolver, SourceResolver};

/// Text produced for one document, ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Character count of `text`.
    pub text_length: u64,
    pub page_count: u32,
    pub method: ExtractionMethod,
}

impl ExtractedText {
    pub fn new(text: String, page_count: u32, method: ExtractionMethod) -> Self {
        let text_length = text.chars().count() as u64;
        Self {
            text,
            text_length,
            page_count,
            method,
        }
    }
}

/// Output of a single extraction engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawText {
    pub text: String,
    pub page_count: u32,
}

impl RawText {
    pub fn from_pages(pages: &[String]) -> Self {
        Self {
            text: join_pages(pages),
            page_count: pages.len() as u32,
        }
    }
}

/// A single extraction engine working on raw document bytes.
///
/// Errors are reported as plain messages; the selector treats them as an
/// empty result.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, bytes: &[u8]) -> Result<RawText, String>;
}

/// Turns a stored document path into extracted text.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractError>;
}

/// Joins page texts, prefixing each non-blank page with a `--- Page N ---` line.
///
/// Blank pages contribute nothing, so a document without any extractable
/// text yields an empty string.
pub fn join_pages(pages: &[String]) -> String {
    let mut output = String::new();
    for (index, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        if !output.is_empty() {
            output.push('\n');
        }
        // Writing to a String cannot fail.
        let _ = writeln!(output, "--- Page {} ---", index + 1);
        output.push_str(page.trim_end());
    }
    output
}

/// Basic facts about a PDF file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfInfo {
    pub page_count: u32,
    pub is_encrypted: bool,
}

/// Reads page count and encryption flag without extracting any text.
pub fn pdf_info(bytes: &[u8]) -> Result<PdfInfo, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractError::Transient(format!("Failed to parse PDF: {}", e)))?;
    Ok(PdfInfo {
        page_count: doc.get_pages().len() as u32,
        is_encrypted: doc.is_encrypted(),
    })
}

/// Minimal PDF writer used by unit tests across the crate.
#[cfg(test)]
pub(crate) mod test_pdf {
    use lopdf::{dictionary, Document, Object, Stream};

    /// Builds a PDF with one page per entry, each page showing its lines in Courier.
    pub fn build(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids = Vec::new();
        for text in pages {
            let mut content = String::from("BT\n/F1 10 Tf\n50 742 Td\n12 TL\n");
            for line in text.lines() {
                content.push_str(&format!("({}) Tj T*\n", line.replace(['(', ')', '\\'], " ")));
            }
            content.push_str("ET\n");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("failed to write test PDF");
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_length_counts_chars() {
        let extracted = ExtractedText::new("héllo wörld".to_string(), 1, ExtractionMethod::Primary);
        assert_eq!(extracted.text_length, 11);
    }

    #[test]
    fn test_join_pages_adds_markers() {
        let joined = join_pages(&["first\n".to_string(), "second".to_string()]);
        assert_eq!(joined, "--- Page 1 ---\nfirst\n--- Page 2 ---\nsecond");
    }

    #[test]
    fn test_join_pages_skips_blank_pages() {
        let joined = join_pages(&["".to_string(), "  \n".to_string(), "third".to_string()]);
        assert_eq!(joined, "--- Page 3 ---\nthird");
        assert_eq!(join_pages(&["".to_string(), " ".to_string()]), "");
        assert_eq!(join_pages(&[]), "");
    }

    #[test]
    fn test_pdf_info() {
        let bytes = test_pdf::build(&["one", "two", "three"]);
        let info = pdf_info(&bytes).unwrap();
        assert_eq!(info.page_count, 3);
        assert!(!info.is_encrypted);
    }

    #[test]
    fn test_pdf_info_rejects_garbage() {
        assert!(pdf_info(b"definitely not a pdf").is_err());
    }
}
