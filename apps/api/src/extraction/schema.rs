//! Schema — the ordered field set that one extraction flavor asks the LLM for.
//!
//! A `Schema` is an immutable value built once and passed by reference into the
//! request builder and the response parser. Its field order is the column order
//! of the output table.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extraction::models::ExtractionRecord;
use crate::extraction::parser::PayloadShape;

pub const BASIC_SCHEMA: &str = "basic";
pub const EXTENDED_SCHEMA: &str = "extended";

/// Sector terms the extended flavor checks each resume against.
pub const SPECIFIC_TERMS: &[&str] = &[
    "Credit",
    "Derivatives",
    "Insurance Linked Securities",
    "Long/Short equity",
    "Private Equity",
    "Crypto / Digital Assets",
    "Real Estate",
    "Venture Capital",
    "Fund Investments (Fund of Funds)",
    "Hedge Funds",
    "Private Funds",
    "Fund of Funds",
    "SOC Reports",
    "Management Companies",
    "Financial Corporate Service Providers",
    "AML",
    "Public Companies (ICFR engagements)",
    "IFRS",
    "US GAAP",
    "Retail Banks",
    "Private Banks",
    "Trust Companies",
    "Captive insurance",
    "Non public commercial carriers",
    "Public companies",
    "Life insurance",
    "Property and casualty insurance",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema must declare at least one field")]
    Empty,

    #[error("field name must not be blank")]
    BlankName,

    #[error("duplicate field name: {0}")]
    DuplicateField(String),
}

/// A declared extraction target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    name: String,
    fields: Vec<FieldSpec>,
    /// Terms the model is asked to look for; spliced into the prompt when non-empty.
    keyword_terms: Vec<String>,
}

impl Schema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(SchemaError::BlankName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self {
            name: name.into(),
            fields,
            keyword_terms: Vec::new(),
        })
    }

    pub fn with_keyword_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyword_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn keyword_terms(&self) -> &[String] {
        &self.keyword_terms
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Response-shape instructions spliced into the prompt.
    pub fn format_instructions(&self, shape: PayloadShape) -> String {
        match shape {
            PayloadShape::Json | PayloadShape::Auto => self.json_instructions(),
            PayloadShape::Delimited => self.delimited_instructions(),
        }
    }

    fn json_instructions(&self) -> String {
        let mut out = String::from(
            "The output should be a markdown code snippet formatted in the following schema, \
             including the leading and trailing \"```json\" and \"```\":\n\n```json\n{\n",
        );
        for field in &self.fields {
            out.push_str(&format!(
                "\t\"{}\": string  // {}\n",
                field.name, field.description
            ));
        }
        out.push_str("}\n```");
        out
    }

    fn delimited_instructions(&self) -> String {
        let mut out = String::from(
            "The output should be comma-separated values: exactly one header row with the \
             column names below, in this order, followed by exactly one data row. \
             Quote any value that contains a comma, a double quote or a line break.\n\n",
        );
        out.push_str(&header_line(&self.field_names()));
        out.push_str("\n\nColumns:\n");
        for field in &self.fields {
            out.push_str(&format!("{}: {}\n", field.name, field.description));
        }
        out
    }

    /// Builds a record from raw key/value pairs, dropping every key the schema
    /// does not declare. Returns the record and the dropped keys.
    pub fn record_from_pairs<I>(&self, document_id: &str, pairs: I) -> (ExtractionRecord, Vec<String>)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut values = BTreeMap::new();
        let mut dropped = Vec::new();
        for (key, value) in pairs {
            if self.contains(&key) {
                values.insert(key, value);
            } else {
                dropped.push(key);
            }
        }
        (
            ExtractionRecord::from_declared(document_id, values),
            dropped,
        )
    }

    /// The 8-field flavor: contact details, work history, skills, projects.
    pub fn basic() -> Self {
        Self {
            name: BASIC_SCHEMA.to_string(),
            fields: vec![
                name_field(),
                mail_field(),
                FieldSpec::new(
                    "LinkedIn",
                    "Extract the LinkedIn profile URL from the resume text.",
                ),
                work_experience_field(),
                company_details_field(),
                technical_skills_field(),
                soft_skills_field(),
                projects_field(),
            ],
            keyword_terms: Vec::new(),
        }
    }

    /// The 10-field flavor: drops LinkedIn, adds education, languages and the
    /// sector keyword-presence check.
    pub fn extended() -> Self {
        Self {
            name: EXTENDED_SCHEMA.to_string(),
            fields: vec![
                name_field(),
                mail_field(),
                work_experience_field(),
                company_details_field(),
                technical_skills_field(),
                soft_skills_field(),
                projects_field(),
                FieldSpec::new(
                    "Education",
                    "Extract all educational qualifications mentioned in the resume text, \
                     including degrees, institutions, and years attended.",
                ),
                FieldSpec::new(
                    "Languages Spoken",
                    "Extract all languages spoken by the person mentioned in the resume text.",
                ),
                FieldSpec::new(
                    "Specific Terms",
                    "Check if any of the specified terms are present in the resume and list \
                     their headings if found.",
                ),
            ],
            keyword_terms: SPECIFIC_TERMS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

fn name_field() -> FieldSpec {
    FieldSpec::new("Name", "Extract the full name from the resume text.")
}

fn mail_field() -> FieldSpec {
    FieldSpec::new("Mail ID", "Extract the email ID from the resume text.")
}

fn work_experience_field() -> FieldSpec {
    FieldSpec::new(
        "Work Experience",
        "Extract all organization names where the person has worked, along with the number of \
         years or months worked there and the designations held, and output them as a \
         comma-separated list.",
    )
}

fn company_details_field() -> FieldSpec {
    FieldSpec::new(
        "Company Details",
        "Extract all company names and details where the person has worked, and output them \
         as a comma-separated list.",
    )
}

fn technical_skills_field() -> FieldSpec {
    FieldSpec::new(
        "Technical Skills",
        "Extract all technical skills mentioned in the resume text and output them as a \
         comma-separated list.",
    )
}

fn soft_skills_field() -> FieldSpec {
    FieldSpec::new(
        "Soft Skills",
        "Extract all soft skills mentioned in the resume text and output them as a \
         comma-separated list.",
    )
}

fn projects_field() -> FieldSpec {
    FieldSpec::new(
        "Projects",
        "Extract all project titles mentioned in the resume text and output them as a \
         comma-separated list.",
    )
}

/// Renders one CSV line with standard quoting, without the trailing newline.
pub fn header_line(cells: &[&str]) -> String {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    let rendered = writer
        .write_record(cells)
        .ok()
        .and_then(|_| writer.into_inner().ok())
        .and_then(|bytes| String::from_utf8(bytes).ok());
    match rendered {
        Some(line) => line.trim_end_matches(['\r', '\n']).to_string(),
        None => cells.join(","),
    }
}

/// Named schema flavors available to callers.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<Schema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self {
            schemas: vec![Schema::basic(), Schema::extended()],
        }
    }
}

impl SchemaRegistry {
    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn all(&self) -> &[Schema] {
        &self.schemas
    }
}
