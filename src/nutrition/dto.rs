use serde::{Deserialize, Serialize};

use super::facts::{NutritionFacts, SourceTag};

#[derive(Debug, Deserialize)]
pub struct CalculateNutritionRequest {
    pub food_name: String,
    pub portion_grams: f64,
}

#[derive(Debug, Serialize)]
pub struct CalculateNutritionResponse {
    pub food_name: String,
    pub portion_grams: f64,
    pub nutrition: NutritionFacts,
    pub source: SourceTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}
