// Extraction Request Builder.
// One prompt per document: role framing, the numbered field list, optional keyword
// check, the schema's format instructions, then the resume text verbatim.
// Output depends only on (schema, shape, text) so a retried request is identical.

use crate::extraction::models::ExtractedText;
use crate::extraction::parser::PayloadShape;
use crate::extraction::schema::Schema;
use crate::llm_client::prompts::{EXTRACTION_ROLE, NO_EXTRA_TEXT};

pub fn build_extraction_prompt(schema: &Schema, shape: PayloadShape, document: &ExtractedText) -> String {
    let mut prompt = String::with_capacity(document.text.len() + 2048);

    prompt.push_str(EXTRACTION_ROLE);
    prompt.push('\n');
    for (i, field) in schema.fields().iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, field.name));
    }

    if !schema.keyword_terms().is_empty() {
        prompt.push_str(&format!(
            "Check if any of the following terms are present or similar in the resume and list their headings if found: {}\n",
            schema.keyword_terms().join(", ")
        ));
    }

    prompt.push_str("Give the extracted information in the following format: ");
    prompt.push_str(&schema.format_instructions(shape));
    prompt.push_str("\n\n");
    prompt.push_str(NO_EXTRA_TEXT);
    prompt.push_str("\n\nResume:\n");
    prompt.push_str(&document.text);
    prompt
}
