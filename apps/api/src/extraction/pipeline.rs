//! Extraction pipeline — drives every document through
//! unpack → extract text → build prompt → complete → parse, and accumulates the result table.
//!
//! Documents are processed one at a time in input order. Each completion call
//! waits on the shared `CallScheduler` first. A document's failure is recorded
//! and the batch moves on; only an all-failed batch is an error, and only at
//! serialization time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::extraction::models::{
    Document, ExtractedText, ExtractionRecord, FailureReason, ParseFailure,
};
use crate::extraction::normalizer::{extract, unpack, TextExtractor, UnpackedUpload};
use crate::extraction::pacing::CallScheduler;
use crate::extraction::parser::{parse_response, PayloadShape};
use crate::extraction::prompts::build_extraction_prompt;
use crate::extraction::schema::Schema;
use crate::llm_client::CompletionClient;

/// Filename offered to the caller when downloading a run's table.
pub const DOWNLOAD_FILENAME: &str = "combined_employee_data.csv";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no document produced a record ({} failure(s))", failures.len())]
    AggregateEmptyResult { failures: Vec<ParseFailure> },

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write output file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub shape: PayloadShape,
    /// Attempts per document when the completion service fails. 1 = no retry.
    pub max_attempts: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            shape: PayloadShape::Json,
            max_attempts: 1,
        }
    }
}

/// Ordered rows, columns fixed to the schema's field order. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<ExtractionRecord>,
}

impl ResultTable {
    pub fn new(schema: &Schema) -> Self {
        Self {
            columns: schema.field_names().into_iter().map(String::from).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ExtractionRecord) {
        self.rows.push(record);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ExtractionRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row cells in column order; absent fields are empty strings.
    pub fn cells(&self) -> Vec<Vec<&str>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().map(|c| row.get(c)).collect())
            .collect()
    }

    /// Header row plus one line per record, standard CSV quoting, `\n` line ends.
    pub fn to_csv(&self) -> Result<Vec<u8>, PipelineError> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for cells in self.cells() {
            writer.write_record(&cells)?;
        }
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| PipelineError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
    }
}

/// Everything one run produced: the table and the per-document diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub table: ResultTable,
    pub failures: Vec<ParseFailure>,
}

impl BatchOutcome {
    pub fn new(schema: &Schema) -> Self {
        Self {
            table: ResultTable::new(schema),
            failures: Vec::new(),
        }
    }

    /// Serializes the table, or fails once with every diagnostic when no row succeeded.
    pub fn to_csv(&self) -> Result<Vec<u8>, PipelineError> {
        if self.table.is_empty() {
            return Err(PipelineError::AggregateEmptyResult {
                failures: self.failures.clone(),
            });
        }
        self.table.to_csv()
    }
}

/// Owns the collaborators one extraction run needs.
#[derive(Clone)]
pub struct ExtractionService {
    client: Arc<dyn CompletionClient>,
    scheduler: Arc<dyn CallScheduler>,
    text_extractor: Arc<dyn TextExtractor>,
    options: PipelineOptions,
}

impl ExtractionService {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        scheduler: Arc<dyn CallScheduler>,
        text_extractor: Arc<dyn TextExtractor>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            scheduler,
            text_extractor,
            options,
        }
    }

    /// Runs the whole batch: uploads in, table and diagnostics out.
    pub async fn run(&self, documents: Vec<Document>, schema: &Schema) -> BatchOutcome {
        self.run_with_shape(documents, schema, self.options.shape).await
    }

    pub async fn run_with_shape(
        &self,
        documents: Vec<Document>,
        schema: &Schema,
        shape: PayloadShape,
    ) -> BatchOutcome {
        info!(
            "Starting extraction run: {} upload(s), schema '{}', shape {:?}",
            documents.len(),
            schema.name(),
            shape
        );
        let mut outcome = BatchOutcome::new(schema);

        for upload in documents {
            let unpacked = self.unpack_isolated(upload).await;
            outcome.failures.extend(unpacked.failures);
            for document in unpacked.documents {
                let result = match self.extract_text_isolated(document).await {
                    Ok(text) => self.extract_document(&text, schema, shape).await,
                    Err(failure) => Err(failure),
                };
                match result {
                    Ok(record) => outcome.table.push(record),
                    Err(failure) => {
                        warn!("Extraction failed: {failure}");
                        outcome.failures.push(failure);
                    }
                }
            }
        }

        info!(
            "Extraction run finished: {} row(s), {} failure(s)",
            outcome.table.len(),
            outcome.failures.len()
        );
        outcome
    }

    /// Archive listing runs on the blocking pool; a panic there loses only this upload.
    async fn unpack_isolated(&self, upload: Document) -> UnpackedUpload {
        let id = upload.id.clone();
        match tokio::task::spawn_blocking(move || unpack(upload)).await {
            Ok(unpacked) => unpacked,
            Err(e) => {
                warn!("Unpacking aborted for {id}: {e}");
                UnpackedUpload {
                    documents: Vec::new(),
                    failures: vec![ParseFailure::new(
                        id,
                        FailureReason::UnsupportedFormat,
                        format!("unpacking aborted: {e}"),
                    )],
                }
            }
        }
    }

    /// Each leaf document, archive entries included, is decoded in its own
    /// blocking task, so a decoder panic only fails that document.
    async fn extract_text_isolated(&self, document: Document) -> Result<ExtractedText, ParseFailure> {
        let id = document.id.clone();
        let extractor = Arc::clone(&self.text_extractor);
        match tokio::task::spawn_blocking(move || extract(&document, extractor.as_ref())).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Text extraction aborted for {id}: {e}");
                Err(ParseFailure::new(
                    id,
                    FailureReason::UnsupportedFormat,
                    format!("text extraction aborted: {e}"),
                ))
            }
        }
    }

    /// One document through prompt → completion → parse.
    pub async fn extract_document(
        &self,
        text: &ExtractedText,
        schema: &Schema,
        shape: PayloadShape,
    ) -> Result<ExtractionRecord, ParseFailure> {
        let prompt = build_extraction_prompt(schema, shape, text);
        let attempts = self.options.max_attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            self.scheduler.acquire().await;
            match self.client.complete(&prompt).await {
                Ok(raw) => {
                    return parse_response(&raw, schema, shape, &text.document_id)
                        .map(|parsed| parsed.record)
                        .map_err(|e| {
                            ParseFailure::new(
                                &text.document_id,
                                FailureReason::MalformedPayload,
                                e.to_string(),
                            )
                        });
                }
                Err(e) => {
                    warn!(
                        "Completion attempt {}/{} failed for {}: {}",
                        attempt, attempts, text.document_id, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(ParseFailure::new(
            &text.document_id,
            FailureReason::CollaboratorError,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no completion attempt made".to_string()),
        ))
    }
}

/// Writes a serialized table to `<dir>/<run_id>.csv` and returns the path.
pub async fn persist_table(dir: &Path, run_id: &str, csv: &[u8]) -> Result<PathBuf, PipelineError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{run_id}.csv"));
    tokio::fs::write(&path, csv).await?;
    info!("Wrote {} bytes to {}", csv.len(), path.display());
    Ok(path)
}

/// Deletes `.csv` exports in `dir` last modified more than `max_age` ago, except
/// `keep`. A zero `max_age` keeps everything. Returns how many files were removed.
pub async fn prune_exports(dir: &Path, max_age: Duration, keep: &Path) -> Result<usize, PipelineError> {
    if max_age.is_zero() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path == keep || path.extension().map_or(true, |ext| ext != "csv") {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if now.duration_since(modified).unwrap_or_default() <= max_age {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            // Another run pruned it first.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    if removed > 0 {
        info!("Pruned {removed} export(s) older than {}s from {}", max_age.as_secs(), dir.display());
    }
    Ok(removed)
}
