use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared input format of an uploaded blob, decided by filename suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Docx,
    Pdf,
    Zip,
}

impl DocumentFormat {
    /// Suffix dispatch. Matching is case-insensitive so `CV.PDF` is still a pdf.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".docx") {
            Some(DocumentFormat::Docx)
        } else if lower.ends_with(".pdf") {
            Some(DocumentFormat::Pdf)
        } else if lower.ends_with(".zip") {
            Some(DocumentFormat::Zip)
        } else {
            None
        }
    }
}

/// A named byte blob as received from the caller.
#[derive(Debug, Clone)]
pub struct Document {
    /// Filename, or archive-relative path for zip entries.
    pub id: String,
    pub raw_bytes: Vec<u8>,
}

impl Document {
    pub fn new(id: impl Into<String>, raw_bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            raw_bytes: raw_bytes.into(),
        }
    }

    pub fn format(&self) -> Option<DocumentFormat> {
        DocumentFormat::from_name(&self.id)
    }
}

/// Plain text of one document, ready for the request builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub document_id: String,
    pub text: String,
}

/// One accepted table row. Keys are always declared schema field names;
/// outside this module tree the only way to build one is through
/// `Schema::record_from_pairs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionRecord {
    document_id: String,
    values: BTreeMap<String, String>,
}

impl ExtractionRecord {
    /// `values` must already be filtered to the schema's field names.
    pub(in crate::extraction) fn from_declared(
        document_id: impl Into<String>,
        values: BTreeMap<String, String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            values,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Value for a field, empty when the collaborator did not return it.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    MalformedPayload,
    UnsupportedFormat,
    CollaboratorError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::MalformedPayload => "malformed payload",
            FailureReason::UnsupportedFormat => "unsupported format",
            FailureReason::CollaboratorError => "collaborator error",
        };
        f.write_str(s)
    }
}

/// Why a single document produced no row. Never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub document_id: String,
    pub reason: FailureReason,
    pub detail: String,
}

impl ParseFailure {
    pub fn new(document_id: impl Into<String>, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.document_id, self.reason, self.detail)
    }
}
