//! Axum route handlers for the Extraction API.

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::extraction::models::{Document, ParseFailure};
use crate::extraction::parser::PayloadShape;
use crate::extraction::pipeline::{persist_table, prune_exports, DOWNLOAD_FILENAME};
use crate::extraction::schema::{FieldSpec, Schema};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

/// Parsed multipart upload.
struct UploadForm {
    documents: Vec<Document>,
    schema_name: Option<String>,
    custom_schema: Option<CustomSchema>,
    shape: Option<PayloadShape>,
}

/// `schema_json` part: either a bare field list or an object that also names
/// keyword terms to check for.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CustomSchema {
    Fields(Vec<FieldSpec>),
    WithTerms {
        fields: Vec<FieldSpec>,
        #[serde(default)]
        keyword_terms: Vec<String>,
    },
}

impl CustomSchema {
    fn into_schema(self) -> Result<Schema, AppError> {
        let (fields, terms) = match self {
            CustomSchema::Fields(fields) => (fields, Vec::new()),
            CustomSchema::WithTerms {
                fields,
                keyword_terms,
            } => (fields, keyword_terms),
        };
        Schema::new("custom", fields)
            .map(|schema| schema.with_keyword_terms(terms))
            .map_err(|e| AppError::Validation(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub run_id: Uuid,
    pub schema: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Source document of each row, same order as `rows`.
    pub documents: Vec<String>,
    pub failures: Vec<ParseFailure>,
    pub download_url: String,
    pub output_path: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/schemas
///
/// Lists the registered extraction flavors with their fields.
pub async fn handle_list_schemas(State(state): State<AppState>) -> Json<Vec<Schema>> {
    Json(state.schemas.all().to_vec())
}

/// POST /api/v1/extract
///
/// Multipart upload of `.docx`, `.pdf` and `.zip` files (`files` parts), with an
/// optional `schema` flavor name, `schema_json` custom field list, and `shape`.
/// Runs the full batch and writes the table to the output directory.
pub async fn handle_extract(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>, AppError> {
    let form = parse_upload(multipart).await?;
    if form.documents.is_empty() {
        return Err(AppError::Validation(
            "Upload at least one .docx, .pdf or .zip file".to_string(),
        ));
    }

    let schema = resolve_schema(&state, form.schema_name.as_deref(), form.custom_schema)?;
    let started_at = Utc::now();
    let outcome = match form.shape {
        Some(shape) => {
            state
                .extraction
                .run_with_shape(form.documents, &schema, shape)
                .await
        }
        None => state.extraction.run(form.documents, &schema).await,
    };
    let finished_at = Utc::now();

    let csv = outcome.to_csv()?;
    let run_id = Uuid::new_v4();
    let path = persist_table(&state.config.output_dir, &run_id.to_string(), &csv).await?;
    info!(
        "Run {run_id}: {} row(s), {} failure(s)",
        outcome.table.len(),
        outcome.failures.len()
    );
    if let Err(e) = prune_exports(&state.config.output_dir, state.config.export_retention, &path).await {
        warn!("Failed to prune old exports: {e}");
    }

    let rows = outcome
        .table
        .cells()
        .into_iter()
        .map(|row| row.into_iter().map(String::from).collect())
        .collect();
    let documents = outcome
        .table
        .rows()
        .iter()
        .map(|row| row.document_id().to_string())
        .collect();

    Ok(Json(ExtractResponse {
        run_id,
        schema: schema.name().to_string(),
        columns: outcome.table.columns().to_vec(),
        rows,
        documents,
        failures: outcome.failures,
        download_url: format!("/api/v1/exports/{run_id}"),
        output_path: path.display().to_string(),
        started_at,
        finished_at,
    }))
}

/// GET /api/v1/exports/:run_id
///
/// Returns a run's table as a CSV attachment.
pub async fn handle_download(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let path = state.config.output_dir.join(format!("{run_id}.csv"));
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("Export {run_id} not found")))
        }
        Err(e) => return Err(AppError::Internal(e.into())),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_FILENAME}\""),
            ),
        ],
        bytes,
    ))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn parse_upload(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        documents: Vec::new(),
        schema_name: None,
        custom_schema: None,
        shape: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read form field: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Validation("File part is missing a filename".to_string()))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read {filename}: {e}")))?;
                form.documents.push(Document::new(filename, data.to_vec()));
            }
            "schema" => {
                let value = read_text(field, "schema").await?;
                if !value.trim().is_empty() {
                    form.schema_name = Some(value);
                }
            }
            "schema_json" => {
                let value = read_text(field, "schema_json").await?;
                let custom: CustomSchema = serde_json::from_str(&value)
                    .map_err(|e| AppError::Validation(format!("schema_json: {e}")))?;
                form.custom_schema = Some(custom);
            }
            "shape" => {
                let value = read_text(field, "shape").await?;
                form.shape = Some(value.parse().map_err(AppError::Validation)?);
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))
}

/// A custom schema wins over a flavor name; with neither, the configured default applies.
fn resolve_schema(
    state: &AppState,
    name: Option<&str>,
    custom: Option<CustomSchema>,
) -> Result<Schema, AppError> {
    if let Some(custom) = custom {
        return custom.into_schema();
    }
    let name = name.unwrap_or(&state.config.default_schema);
    state
        .schemas
        .get(name)
        .cloned()
        .ok_or_else(|| AppError::Validation(format!("Unknown schema '{name}'")))
}
