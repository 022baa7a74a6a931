use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::facts::NutritionFacts;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("could not parse upstream payload: {0}")]
    Parse(String),
    #[error("source not configured")]
    NotConfigured,
    #[error("source call timed out")]
    Timeout,
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// A hit from an external source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFacts {
    pub facts: NutritionFacts,
    pub matched_name: Option<String>,
}

/// Query-by-name source answering per 100 g.
#[async_trait]
pub trait PrimarySource: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Option<SourceFacts>, SourceError>;
}

/// Query-by-(name, portion) source answering already scaled to the portion.
#[async_trait]
pub trait SecondarySource: Send + Sync {
    async fn lookup_portion(
        &self,
        name: &str,
        portion_grams: f64,
    ) -> Result<Option<SourceFacts>, SourceError>;
}

fn http_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("platescan/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Network(e.to_string()))
}

// --- USDA FoodData Central ---

#[derive(Debug, Deserialize)]
struct UsdaSearchResponse {
    #[serde(default)]
    foods: Vec<UsdaFood>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsdaFood {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    food_nutrients: Vec<UsdaNutrient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsdaNutrient {
    #[serde(default)]
    nutrient_name: String,
    #[serde(default)]
    value: f64,
}

pub struct UsdaClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl UsdaClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

fn parse_usda(body: UsdaSearchResponse) -> Option<SourceFacts> {
    let food = body.foods.into_iter().next()?;
    let mut facts = NutritionFacts::default();
    for n in &food.food_nutrients {
        match n.nutrient_name.as_str() {
            "Energy" => facts.calories = n.value,
            "Protein" => facts.protein_g = n.value,
            "Carbohydrate, by difference" => facts.carbs_g = n.value,
            "Total lipid (fat)" => facts.fat_g = n.value,
            "Fiber, total dietary" => facts.fiber_g = n.value,
            "Sugars, total including NLEA" => facts.sugar_g = n.value,
            "Sodium, Na" => facts.sodium_g = n.value / 1000.0,
            _ => {}
        }
    }
    Some(SourceFacts {
        facts: facts.sanitized(),
        matched_name: food.description,
    })
}

#[async_trait]
impl PrimarySource for UsdaClient {
    async fn lookup(&self, name: &str) -> Result<Option<SourceFacts>, SourceError> {
        if self.api_key.is_empty() {
            return Err(SourceError::NotConfigured);
        }
        let url = format!("{}/foods/search", self.base_url);
        let res = self
            .http
            .get(&url)
            .query(&[
                ("query", name),
                ("api_key", self.api_key.as_str()),
                ("pageSize", "5"),
                ("dataType", "Foundation"),
                ("dataType", "SR Legacy"),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(SourceError::Status(res.status().as_u16()));
        }
        let body: UsdaSearchResponse = res.json().await?;
        debug!(food = name, hits = body.foods.len(), "usda search");
        Ok(parse_usda(body))
    }
}

// --- Nutritionix natural-language nutrients ---

#[derive(Debug, Deserialize)]
struct NutritionixResponse {
    #[serde(default)]
    foods: Vec<NutritionixFood>,
}

#[derive(Debug, Deserialize)]
struct NutritionixFood {
    #[serde(default)]
    food_name: Option<String>,
    #[serde(default)]
    nf_calories: Option<f64>,
    #[serde(default)]
    nf_protein: Option<f64>,
    #[serde(default)]
    nf_total_carbohydrate: Option<f64>,
    #[serde(default)]
    nf_total_fat: Option<f64>,
    #[serde(default)]
    nf_dietary_fiber: Option<f64>,
    #[serde(default)]
    nf_sugars: Option<f64>,
    #[serde(default)]
    nf_sodium: Option<f64>,
}

pub struct NutritionixClient {
    http: Client,
    base_url: String,
    app_id: String,
    app_key: String,
}

impl NutritionixClient {
    pub fn new(
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            app_id: app_id.into(),
            app_key: app_key.into(),
        })
    }
}

fn parse_nutritionix(body: NutritionixResponse) -> Option<SourceFacts> {
    let food = body.foods.into_iter().next()?;
    let facts = NutritionFacts {
        calories: food.nf_calories.unwrap_or_default(),
        protein_g: food.nf_protein.unwrap_or_default(),
        carbs_g: food.nf_total_carbohydrate.unwrap_or_default(),
        fat_g: food.nf_total_fat.unwrap_or_default(),
        fiber_g: food.nf_dietary_fiber.unwrap_or_default(),
        sugar_g: food.nf_sugars.unwrap_or_default(),
        sodium_g: food.nf_sodium.unwrap_or_default() / 1000.0,
    };
    Some(SourceFacts {
        facts: facts.sanitized().rounded(),
        matched_name: food.food_name,
    })
}

#[async_trait]
impl SecondarySource for NutritionixClient {
    async fn lookup_portion(
        &self,
        name: &str,
        portion_grams: f64,
    ) -> Result<Option<SourceFacts>, SourceError> {
        if self.app_id.is_empty() || self.app_key.is_empty() {
            return Err(SourceError::NotConfigured);
        }
        let url = format!("{}/natural/nutrients", self.base_url);
        let res = self
            .http
            .post(&url)
            .header("x-app-id", &self.app_id)
            .header("x-app-key", &self.app_key)
            .json(&json!({ "query": format!("{}g {}", portion_grams, name) }))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(SourceError::Status(res.status().as_u16()));
        }
        let body: NutritionixResponse = res.json().await?;
        debug!(food = name, portion_grams, hits = body.foods.len(), "nutritionix lookup");
        Ok(parse_nutritionix(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usda_maps_nutrient_names_and_sodium_units() {
        let body: UsdaSearchResponse = serde_json::from_value(json!({
            "foods": [{
                "description": "Apples, fuji, with skin, raw",
                "foodNutrients": [
                    {"nutrientName": "Energy", "value": 52.0},
                    {"nutrientName": "Protein", "value": 0.26},
                    {"nutrientName": "Carbohydrate, by difference", "value": 13.81},
                    {"nutrientName": "Total lipid (fat)", "value": 0.17},
                    {"nutrientName": "Fiber, total dietary", "value": 2.4},
                    {"nutrientName": "Sugars, total including NLEA", "value": 10.39},
                    {"nutrientName": "Sodium, Na", "value": 1.0},
                    {"nutrientName": "Vitamin C, total ascorbic acid", "value": 4.6}
                ]
            }, {
                "description": "second hit is ignored",
                "foodNutrients": []
            }]
        }))
        .unwrap();

        let hit = parse_usda(body).unwrap();
        assert_eq!(hit.matched_name.as_deref(), Some("Apples, fuji, with skin, raw"));
        assert_eq!(hit.facts.calories, 52.0);
        assert_eq!(hit.facts.carbs_g, 13.81);
        assert_eq!(hit.facts.sugar_g, 10.39);
        assert_eq!(hit.facts.sodium_g, 0.001);
    }

    #[test]
    fn usda_empty_search_is_a_miss() {
        let body: UsdaSearchResponse = serde_json::from_value(json!({"foods": []})).unwrap();
        assert!(parse_usda(body).is_none());
        let body: UsdaSearchResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parse_usda(body).is_none());
    }

    #[test]
    fn nutritionix_tolerates_missing_fields() {
        let body: NutritionixResponse = serde_json::from_value(json!({
            "foods": [{
                "food_name": "rice",
                "nf_calories": 195.0,
                "nf_total_carbohydrate": 42.3,
                "nf_sodium": 1.5,
                "nf_total_fat": null
            }]
        }))
        .unwrap();
        let hit = parse_nutritionix(body).unwrap();
        assert_eq!(hit.facts.calories, 195.0);
        assert_eq!(hit.facts.carbs_g, 42.3);
        assert_eq!(hit.facts.fat_g, 0.0);
        assert_eq!(hit.facts.sodium_g, 0.0);
    }

    #[tokio::test]
    async fn unconfigured_sources_error_without_network() {
        let usda = UsdaClient::new("http://127.0.0.1:9", "", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            usda.lookup("apple").await,
            Err(SourceError::NotConfigured)
        ));
        let nix =
            NutritionixClient::new("http://127.0.0.1:9", "", "", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            nix.lookup_portion("apple", 100.0).await,
            Err(SourceError::NotConfigured)
        ));
    }
}
