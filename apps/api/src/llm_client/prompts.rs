// Shared prompt fragments for extraction requests.
// The request builder in extraction/prompts.rs assembles these with the schema.

/// Role framing placed at the top of every extraction prompt.
pub const EXTRACTION_ROLE: &str = "\
You are an AI bot designed to act as a professional for parsing resumes. \
You are given a resume, and your job is to extract exactly the following information from it \
without adding any additional text:";

/// Closing rule that keeps the model from wrapping the payload in prose.
pub const NO_EXTRA_TEXT: &str = "\
Return only the requested payload. Do not add explanations, apologies, or fields that were not requested. \
If a value is not present in the resume, leave it empty.";
