use std::sync::Arc;

use crate::config::Config;
use crate::extraction::pipeline::ExtractionService;
use crate::extraction::schema::SchemaRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Completion client, rate gate and text extractor for extraction runs.
    /// The rate gate inside is shared by every request, so concurrent uploads
    /// still respect one global call spacing.
    pub extraction: ExtractionService,
    pub schemas: Arc<SchemaRegistry>,
    pub config: Config,
}
