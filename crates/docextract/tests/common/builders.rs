//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use lopdf::{dictionary, Document, Object, Stream};

use docextract::config::Config;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with a single worker and fast polling.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.worker_count = 1;
        config.poll_interval_ms = 10;
        Self { config }
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn quality_threshold(mut self, threshold: usize) -> Self {
        self.config.extraction.quality_threshold = threshold;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn backoff_base_secs(mut self, secs: u64) -> Self {
        self.config.retry.backoff_base_secs = secs;
        self
    }

    pub fn visibility_timeout_secs(mut self, secs: u64) -> Self {
        self.config.visibility_timeout_secs = secs;
        self
    }

    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.config.submission.deduplicate = enabled;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.submission.max_batch_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for small single-font PDFs.
pub struct PdfBuilder {
    pages: Vec<String>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Add a page; each line of `text` is drawn on its own row.
    pub fn page(mut self, text: &str) -> Self {
        self.pages.push(text.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids = Vec::new();
        for text in &self.pages {
            let mut content = String::from("BT\n/F1 11 Tf\n72 720 Td\n14 TL\n");
            for line in text.lines() {
                let escaped = line.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
                content.push_str(&format!("({}) Tj T*\n", escaped));
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
        doc.save_to(&mut buffer).expect("Failed to write test PDF");
        buffer
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}
