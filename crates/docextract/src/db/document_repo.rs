//! Document repository: reads and writes for the `documents` table.
//!
//! Extraction-state writers are crate-private: only the state synchronizer
//! calls them, so document status can never drift from its job records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, DatabaseError};
use crate::model::{Document, ExtractionStatus};

const COLUMNS: &str = "id, filename, storage_path, file_size, mime_type, category, extracted_text,
     text_length, page_count, extraction_status, extraction_error, is_used, created_at, updated_at, completed_at";

/// A raw document row from the database.
struct DocumentRow {
    id: String,
    filename: String,
    storage_path: String,
    file_size: i64,
    mime_type: Option<String>,
    category: String,
    extracted_text: Option<String>,
    text_length: Option<i64>,
    page_count: Option<i64>,
    extraction_status: String,
    extraction_error: Option<String>,
    is_used: bool,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            storage_path: row.get("storage_path")?,
            file_size: row.get("file_size")?,
            mime_type: row.get("mime_type")?,
            category: row.get("category")?,
            extracted_text: row.get("extracted_text")?,
            text_length: row.get("text_length")?,
            page_count: row.get("page_count")?,
            extraction_status: row.get("extraction_status")?,
            extraction_error: row.get("extraction_error")?,
            is_used: row.get("is_used")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_document(self) -> Result<Document, DatabaseError> {
        let extraction_status = self.extraction_status.parse::<ExtractionStatus>().map_err(
            |reason| DatabaseError::InvalidValue {
                column: "extraction_status",
                value: self.extraction_status.clone(),
                reason,
            },
        )?;
        let category = self
            .category
            .parse()
            .map_err(|reason| DatabaseError::InvalidValue {
                column: "category",
                value: self.category.clone(),
                reason,
            })?;

        Ok(Document {
            id: self.id,
            filename: self.filename,
            storage_path: PathBuf::from(self.storage_path),
            file_size: self.file_size.max(0) as u64,
            mime_type: self.mime_type,
            category,
            extracted_text: self.extracted_text,
            text_length: self.text_length.map(|n| n.max(0) as u64),
            page_count: self.page_count.map(|n| n.max(0) as u32),
            extraction_status,
            extraction_error: self.extraction_error,
            is_used: self.is_used,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at)?,
        })
    }
}

/// Inserts a freshly registered document.
pub(crate) fn insert(conn: &Connection, doc: &Document) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, filename, storage_path, file_size, mime_type, category,
         extraction_status, is_used, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            doc.id,
            doc.filename,
            doc.storage_path.to_string_lossy(),
            doc.file_size as i64,
            doc.mime_type,
            doc.category.as_str(),
            doc.extraction_status.as_str(),
            doc.is_used,
            format_timestamp(doc.created_at),
            format_timestamp(doc.updated_at),
        ],
    )?;
    Ok(())
}

/// Finds a document by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Document>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM documents WHERE id = ?1", COLUMNS),
            params![id],
            DocumentRow::from_row,
        )
        .optional()?;
    row.map(DocumentRow::into_document).transpose()
}

/// Lists documents in any of the given statuses, oldest first.
pub fn list_by_status(
    conn: &Connection,
    statuses: &[ExtractionStatus],
) -> Result<Vec<Document>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {} FROM documents WHERE extraction_status IN ({}) ORDER BY created_at ASC",
        COLUMNS,
        placeholders.join(", ")
    );
    let values: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values), DocumentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(DocumentRow::into_document).collect()
}

/// Marks a document as being worked on and clears any previous outcome.
pub(crate) fn mark_processing(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE documents SET extraction_status = 'processing', extracted_text = NULL,
         text_length = NULL, page_count = NULL, extraction_error = NULL, updated_at = ?2,
         completed_at = NULL
         WHERE id = ?1",
        params![id, format_timestamp(now)],
    )?)
}

pub(crate) fn mark_completed(
    conn: &Connection,
    id: &str,
    text: &str,
    text_length: u64,
    page_count: u32,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE documents SET extraction_status = 'completed', extracted_text = ?2,
         text_length = ?3, page_count = ?4, extraction_error = NULL, updated_at = ?5,
         completed_at = ?5
         WHERE id = ?1",
        params![
            id,
            text,
            text_length as i64,
            page_count as i64,
            format_timestamp(now)
        ],
    )?)
}

pub(crate) fn mark_failed(
    conn: &Connection,
    id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE documents SET extraction_status = 'failed', extracted_text = NULL,
         text_length = NULL, page_count = NULL, extraction_error = ?2, updated_at = ?3,
         completed_at = ?3
         WHERE id = ?1",
        params![id, error, format_timestamp(now)],
    )?)
}

/// Puts a failed document back to `pending` for a fresh submission.
/// Documents in any other status are left untouched.
pub(crate) fn reset_failed_to_pending(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE documents SET extraction_status = 'pending', extraction_error = NULL,
         updated_at = ?2, completed_at = NULL
         WHERE id = ?1 AND extraction_status = 'failed'",
        params![id, format_timestamp(now)],
    )?)
}

/// Sets the usage flag. Does not touch extraction state.
pub(crate) fn set_used(
    conn: &Connection,
    id: &str,
    used: bool,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE documents SET is_used = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, used, format_timestamp(now)],
    )?)
}
