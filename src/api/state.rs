//! Application state for the API server

use crate::{Config, Pipeline};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (cheap Arc clone) and provides
/// access to the pipeline instance and configuration.
#[derive(Clone)]
pub struct AppState {
    /// The pipeline serving intake, queries and progress
    pub pipeline: Arc<Pipeline>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(pipeline: Arc<Pipeline>, config: Arc<Config>) -> Self {
        Self { pipeline, config }
    }
}
