mod dto;
mod handlers;
pub mod job;
pub mod pipeline;
pub mod repo;

use crate::state::AppState;
use axum::Router;

pub use pipeline::{AnalysisPipeline, PipelineSettings};
pub use repo::PgAnalysisRepo;

pub fn router(max_image_bytes: usize) -> Router<AppState> {
    handlers::routes(max_image_bytes)
}
