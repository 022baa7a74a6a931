use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::{info, instrument, warn};

use super::dto::{CalculateNutritionRequest, CalculateNutritionResponse};
use crate::{auth::AuthUser, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/foods/calculate-nutrition", post(calculate_nutrition))
}

/// POST /foods/calculate-nutrition { food_name, portion_grams }
#[instrument(skip(state, body))]
pub async fn calculate_nutrition(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CalculateNutritionRequest>,
) -> Result<Json<CalculateNutritionResponse>, (StatusCode, String)> {
    let food_name = body.food_name.trim().to_string();
    if food_name.is_empty() || food_name.chars().count() > 100 {
        warn!(%user_id, "invalid food_name");
        return Err((
            StatusCode::BAD_REQUEST,
            "food_name must be 1-100 characters".into(),
        ));
    }
    if !(1.0..=2000.0).contains(&body.portion_grams) {
        return Err((
            StatusCode::BAD_REQUEST,
            "portion_grams must be between 1 and 2000".into(),
        ));
    }

    let resolved = state.resolver.resolve(&food_name, body.portion_grams).await;
    info!(%user_id, food = %food_name, source = %resolved.source, "nutrition calculated");

    Ok(Json(CalculateNutritionResponse {
        food_name,
        portion_grams: resolved.portion_grams,
        nutrition: resolved.nutrition,
        source: resolved.source,
        category: resolved.category,
    }))
}
