//! Document record: the long-lived target of extraction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extraction status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExtractionStatus::Completed | ExtractionStatus::Failed)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExtractionStatus::Pending),
            "processing" => Ok(ExtractionStatus::Processing),
            "completed" => Ok(ExtractionStatus::Completed),
            "failed" => Ok(ExtractionStatus::Failed),
            other => Err(format!("unknown extraction status '{}'", other)),
        }
    }
}

/// Coarse upload category, derived from the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentCategory {
    Pdf,
    Image,
    Other,
}

impl DocumentCategory {
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime {
            Some("application/pdf") => DocumentCategory::Pdf,
            Some(m) if m.starts_with("image/") => DocumentCategory::Image,
            _ => DocumentCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::Pdf => "pdf",
            DocumentCategory::Image => "image",
            DocumentCategory::Other => "other",
        }
    }
}

impl FromStr for DocumentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(DocumentCategory::Pdf),
            "image" => Ok(DocumentCategory::Image),
            "other" => Ok(DocumentCategory::Other),
            other => Err(format!("unknown document category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// Where the bytes live; resolved by a `SourceResolver`.
    pub storage_path: PathBuf,
    /// Declared size in bytes.
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub category: DocumentCategory,
    /// Set only while `extraction_status` is `Completed`.
    #[serde(skip_serializing)]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    pub extraction_status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
    /// Whether a client has consumed this document. Independent of extraction.
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the last extraction reached `Completed` or `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Creates a pending document for a file on disk.
    pub fn new(storage_path: &Path, file_size: u64, now: DateTime<Utc>) -> Self {
        let filename = storage_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let mime_type = mime_guess::from_path(storage_path)
            .first()
            .map(|m| m.to_string());
        let category = DocumentCategory::from_mime(mime_type.as_deref());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename,
            storage_path: storage_path.to_path_buf(),
            file_size,
            mime_type,
            category,
            extracted_text: None,
            text_length: None,
            page_count: None,
            extraction_status: ExtractionStatus::Pending,
            extraction_error: None,
            is_used: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Checks the status/field coupling: text fields iff completed, error iff failed.
    pub fn is_consistent(&self) -> bool {
        let completed = self.extraction_status == ExtractionStatus::Completed;
        let failed = self.extraction_status == ExtractionStatus::Failed;

        completed == self.text_length.is_some()
            && completed == self.extracted_text.is_some()
            && failed == self.extraction_error.is_some()
            && self
                .extracted_text
                .as_ref()
                .zip(self.text_length)
                .map(|(text, len)| text.chars().count() as u64 == len)
                .unwrap_or(true)
    }
}
