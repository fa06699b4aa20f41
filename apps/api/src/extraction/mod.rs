// Resume extraction engine.
// Flow: normalizer → prompts (request builder) → llm_client → parser → pipeline (table + diagnostics).
// All completion calls go through llm_client and wait on the pacing gate first.

pub mod handlers;
pub mod models;
pub mod normalizer;
pub mod pacing;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod schema;
