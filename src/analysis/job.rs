use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::nutrition::{NutritionFacts, Resolution, SourceTag};
use crate::vision::FoodDetection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }
}

impl FromStr for MealType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            other => anyhow::bail!("unknown meal type {other:?}"),
        }
    }
}

/// A detection joined with the nutrition resolved for its portion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedFood {
    pub name: String,
    pub estimated_portion_grams: f64,
    pub confidence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub nutrition: NutritionFacts,
    pub source: SourceTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl EnrichedFood {
    pub fn new(detection: FoodDetection, resolved: Resolution) -> Self {
        Self {
            name: detection.name,
            estimated_portion_grams: detection.estimated_portion_grams,
            confidence: detection.confidence,
            notes: detection.notes,
            nutrition: resolved.nutrition,
            source: resolved.source,
            category: resolved.category,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("job {id} is already {status}")]
pub struct AlreadyTerminal {
    pub id: Uuid,
    pub status: JobStatus,
}

/// One image analysis. Starts in `Processing` and takes exactly one terminal
/// transition, after which it never changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub owner_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<MealType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub detected_foods: Vec<EnrichedFood>,
    pub total_nutrition: Option<NutritionFacts>,
    pub confidence_score: Option<u8>,
    pub processing_time_ms: Option<i64>,
    #[serde(skip_serializing)]
    pub image_key: Option<String>,
    pub error: Option<String>,
}

impl AnalysisJob {
    pub fn new(owner_id: Uuid, meal_type: Option<MealType>, notes: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            status: JobStatus::Processing,
            meal_type,
            notes,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            detected_foods: Vec::new(),
            total_nutrition: None,
            confidence_score: None,
            processing_time_ms: None,
            image_key: None,
            error: None,
        }
    }

    fn ensure_processing(&self) -> Result<(), AlreadyTerminal> {
        if self.status.is_terminal() {
            return Err(AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn complete(
        &mut self,
        foods: Vec<EnrichedFood>,
        elapsed: Duration,
    ) -> Result<(), AlreadyTerminal> {
        self.ensure_processing()?;
        let total: NutritionFacts = foods.iter().map(|f| f.nutrition).sum();
        self.total_nutrition = Some(total.rounded());
        self.confidence_score = mean_confidence(&foods);
        self.detected_foods = foods;
        self.status = JobStatus::Completed;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.processing_time_ms = Some(elapsed.as_millis() as i64);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, elapsed: Duration) -> Result<(), AlreadyTerminal> {
        self.ensure_processing()?;
        self.detected_foods.clear();
        self.total_nutrition = None;
        self.confidence_score = None;
        self.error = Some(error.into());
        self.status = JobStatus::Failed;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self.processing_time_ms = Some(elapsed.as_millis() as i64);
        Ok(())
    }
}

fn mean_confidence(foods: &[EnrichedFood]) -> Option<u8> {
    if foods.is_empty() {
        return None;
    }
    let sum: u32 = foods.iter().map(|f| f.confidence as u32).sum();
    let mean = (sum as f64 / foods.len() as f64).round();
    Some(mean.clamp(1.0, 10.0) as u8)
}
