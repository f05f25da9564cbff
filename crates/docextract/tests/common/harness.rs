//! Test harness for isolated test execution.
//!
//! `TestHarness` owns a temp directory for input files and an in-memory
//! database, and hands out workers that are driven step by step with an
//! explicit clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tempfile::TempDir;

use docextract::config::Config;
use docextract::db::{document_repo, Database};
use docextract::extractor::{DocumentExtractor, ExtractedText, RawText, TextExtractor};
use docextract::model::{Document, ExtractionMethod, Job};
use docextract::service::Submission;
use docextract::{ExtractError, ExtractionService, Worker};

use super::builders::ConfigBuilder;

/// Test harness providing an isolated pipeline for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory where input documents are written.
    pub input_dir: PathBuf,
    pub db: Database,
    pub service: ExtractionService,
}

impl TestHarness {
    /// Create a harness with a single worker and default retry settings.
    pub fn new() -> Self {
        Self::with_config(ConfigBuilder::new().build())
    }

    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let service = ExtractionService::new(db.clone(), config);

        Self {
            temp_dir,
            input_dir,
            db,
            service,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a test input file to the input directory.
    pub fn write_input(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Write and register a document without queueing it.
    pub fn register(&self, filename: &str, content: &[u8]) -> Document {
        let path = self.write_input(filename, content);
        self.service
            .register_document(&path)
            .expect("Failed to register document")
    }

    /// Write, register and queue a document.
    pub fn register_and_submit(&self, filename: &str, content: &[u8]) -> (Document, Submission) {
        let doc = self.register(filename, content);
        let submission = self
            .service
            .submit(&doc.id)
            .expect("Failed to submit document");
        (doc, submission)
    }

    /// A worker sharing the harness database and configured retry policy.
    pub fn worker(&self, extractor: Arc<dyn DocumentExtractor>) -> Worker {
        self.worker_named("test-worker", extractor)
    }

    pub fn worker_named(&self, id: &str, extractor: Arc<dyn DocumentExtractor>) -> Worker {
        Worker::new(
            id,
            self.db.clone(),
            self.service.queue().clone(),
            extractor,
            self.service.config().retry_policy(),
        )
    }

    /// Reads a document straight from the database, text included.
    pub fn document(&self, id: &str) -> Document {
        self.db
            .with_conn(|c| document_repo::find_by_id(c, id))
            .expect("Failed to query document")
            .expect("Document not found")
    }

    pub fn history(&self, handle: &str) -> Vec<Job> {
        self.service
            .job_history(handle)
            .expect("Failed to read job history")
    }

    /// Installs a SQLite trigger; used to make specific writes fail.
    pub fn install_trigger(&self, sql: &str) {
        self.db
            .with_conn(|c| {
                c.execute_batch(sql)?;
                Ok(())
            })
            .expect("Failed to install trigger");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A whole-second instant shortly after now.
///
/// Timestamps are stored with microsecond precision, so instants that tests
/// compare after a database round trip must not carry nanoseconds.
pub fn clock() -> DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::seconds(1)).unwrap_or(now) + TimeDelta::seconds(1)
}

/// One scripted behaviour of a [`ScriptedExtractor`] call.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String, u32),
    Transient(&'static str),
    Unreadable,
}

/// Document extractor that replays a script, repeating the last step once
/// the script runs out.
pub struct ScriptedExtractor {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new(vec![step])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DocumentExtractor for ScriptedExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let step = {
            let mut last = self.last.lock().unwrap();
            match self.steps.lock().unwrap().pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last.clone().expect("ScriptedExtractor needs at least one step"),
            }
        };

        match step {
            Step::Text(text, pages) => Ok(ExtractedText::new(text, pages, ExtractionMethod::Primary)),
            Step::Transient(message) => Err(ExtractError::Transient(message.to_string())),
            Step::Unreadable => Err(ExtractError::SourceUnreadable {
                path: path.to_path_buf(),
                reason: "scripted".to_string(),
            }),
        }
    }
}

/// Text extractor returning fixed output and counting its calls.
pub struct StubTextExtractor {
    name: &'static str,
    output: RawText,
    calls: Arc<AtomicUsize>,
}

impl StubTextExtractor {
    pub fn new(name: &'static str, text: &str, page_count: u32) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                output: RawText {
                    text: text.to_string(),
                    page_count,
                },
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl TextExtractor for StubTextExtractor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extract(&self, _bytes: &[u8]) -> Result<RawText, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Wraps a real text extractor and counts how often it runs.
pub struct CountingExtractor<T> {
    inner: T,
    calls: Arc<AtomicUsize>,
}

impl<T: TextExtractor> CountingExtractor<T> {
    pub fn new(inner: T) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl<T: TextExtractor> TextExtractor for CountingExtractor<T> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn extract(&self, bytes: &[u8]) -> Result<RawText, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(bytes)
    }
}

/// Text extractor that always panics.
pub struct PanickingExtractor;

impl TextExtractor for PanickingExtractor {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn extract(&self, _bytes: &[u8]) -> Result<RawText, String> {
        panic!("extractor crashed")
    }
}
