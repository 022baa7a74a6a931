pub mod cache;
mod dto;
pub mod estimate;
pub mod facts;
mod handlers;
pub mod resolver;
pub mod sources;

use crate::state::AppState;
use axum::Router;

pub use facts::{NutritionFacts, Resolution, SourceTag};
pub use resolver::{FoodResolver, NutritionResolver, ResolveFault, ResolverSettings};

pub fn router() -> Router<AppState> {
    handlers::routes()
}
