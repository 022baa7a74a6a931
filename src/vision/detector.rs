use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::model::{VisionError, VisionModel};

pub const UNIDENTIFIED_FOOD: &str = "unidentified food";
pub const FALLBACK_PORTION_GRAMS: f64 = 100.0;
pub const FALLBACK_CONFIDENCE: u8 = 3;

const DEFAULT_CONFIDENCE: u8 = 5;

const ANALYSIS_INSTRUCTION: &str = r#"Identify every food visible in this image.
Reply ONLY with valid JSON in this shape, no extra text:
{"foods": [{"name": "common food name", "portion_grams": 150, "confidence": 8, "notes": "optional detail"}]}
Estimate realistic portions in grams. Confidence is an integer from 1 (guess) to 10 (certain).
If no food is visible return {"foods": []}."#;

/// One food the vision model believes is on the plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodDetection {
    pub name: String,
    pub estimated_portion_grams: f64,
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl FoodDetection {
    pub fn unidentified(note: impl Into<String>) -> Self {
        Self {
            name: UNIDENTIFIED_FOOD.to_string(),
            estimated_portion_grams: FALLBACK_PORTION_GRAMS,
            confidence: FALLBACK_CONFIDENCE,
            notes: Some(note.into()),
        }
    }
}

/// Image bytes to a non-empty list of detections; failures degrade to a
/// single low-confidence placeholder.
#[async_trait]
pub trait FoodDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Vec<FoodDetection>;
}

pub struct VisionDetector {
    model: Arc<dyn VisionModel>,
    timeout: Duration,
}

impl VisionDetector {
    pub fn new(model: Arc<dyn VisionModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }
}

#[async_trait]
impl FoodDetector for VisionDetector {
    async fn detect(&self, image: &[u8]) -> Vec<FoodDetection> {
        let reply = tokio::time::timeout(self.timeout, self.model.describe(image, ANALYSIS_INSTRUCTION))
            .await
            .unwrap_or(Err(VisionError::Timeout));

        let parsed = reply.and_then(|text| parse_detections(&text));
        match parsed {
            Ok(foods) if foods.is_empty() => {
                debug!("vision model saw no food");
                vec![FoodDetection::unidentified("no food recognised in the image")]
            }
            Ok(foods) => {
                debug!(count = foods.len(), "foods detected");
                foods
            }
            Err(e) => {
                warn!(error = %e, "vision analysis failed; using placeholder detection");
                vec![FoodDetection::unidentified(
                    "image analysis failed, values are estimates",
                )]
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "portion_grams")]
    estimated_portion_grams: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Wrapped { foods: Vec<RawDetection> },
    Bare(Vec<RawDetection>),
}

fn strip_code_fence(text: &str) -> &str {
    lazy_static! {
        static ref FENCE_RE: Regex = Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").unwrap();
    }
    let trimmed = text.trim();
    FENCE_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}

/// Parse model output. Structurally invalid payloads are errors; individual
/// entries without a name or a usable portion are dropped.
pub(crate) fn parse_detections(text: &str) -> Result<Vec<FoodDetection>, VisionError> {
    let payload: RawPayload = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| VisionError::Malformed(e.to_string()))?;
    let raw = match payload {
        RawPayload::Wrapped { foods } => foods,
        RawPayload::Bare(foods) => foods,
    };

    Ok(raw
        .into_iter()
        .filter_map(|r| {
            let name = r.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
            let grams = r
                .estimated_portion_grams
                .filter(|g| g.is_finite() && *g > 0.0)?;
            let confidence = r
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.round().clamp(1.0, 10.0) as u8)
                .unwrap_or(DEFAULT_CONFIDENCE);
            Some(FoodDetection {
                name,
                estimated_portion_grams: grams,
                confidence,
                notes: r.notes.filter(|n| !n.trim().is_empty()),
            })
        })
        .collect())
}
