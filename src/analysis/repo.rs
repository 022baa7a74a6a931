use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::job::{AnalysisJob, EnrichedFood, JobStatus, MealType};
use crate::nutrition::NutritionFacts;

/// Durable home of terminal analysis records.
#[async_trait]
pub trait AnalysisRepo: Send + Sync {
    async fn save(&self, job: &AnalysisJob) -> anyhow::Result<()>;
    async fn find(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<Option<AnalysisJob>>;
}

#[derive(Debug, FromRow)]
struct AnalysisRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    meal_type: Option<String>,
    notes: Option<String>,
    detected_foods: Json<Vec<EnrichedFood>>,
    total_nutrition: Option<Json<NutritionFacts>>,
    confidence_score: Option<i16>,
    processing_time_ms: Option<i64>,
    image_key: Option<String>,
    error: Option<String>,
    created_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<AnalysisRow> for AnalysisJob {
    type Error = anyhow::Error;

    fn try_from(r: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            owner_id: r.user_id,
            status: r.status.parse::<JobStatus>()?,
            meal_type: r.meal_type.as_deref().map(str::parse::<MealType>).transpose()?,
            notes: r.notes,
            created_at: r.created_at,
            completed_at: r.completed_at,
            detected_foods: r.detected_foods.0,
            total_nutrition: r.total_nutrition.map(|Json(t)| t),
            confidence_score: r.confidence_score.map(|c| c.clamp(1, 10) as u8),
            processing_time_ms: r.processing_time_ms,
            image_key: r.image_key,
            error: r.error,
        })
    }
}

#[derive(Clone)]
pub struct PgAnalysisRepo {
    db: PgPool,
}

impl PgAnalysisRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AnalysisRepo for PgAnalysisRepo {
    async fn save(&self, job: &AnalysisJob) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analyses (
                id, user_id, status, meal_type, notes, detected_foods, total_nutrition,
                confidence_score, processing_time_ms, image_key, error, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                detected_foods = EXCLUDED.detected_foods,
                total_nutrition = EXCLUDED.total_nutrition,
                confidence_score = EXCLUDED.confidence_score,
                processing_time_ms = EXCLUDED.processing_time_ms,
                image_key = EXCLUDED.image_key,
                error = EXCLUDED.error,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id)
        .bind(job.status.as_str())
        .bind(job.meal_type.map(|m| m.as_str()))
        .bind(job.notes.as_deref())
        .bind(Json(&job.detected_foods))
        .bind(job.total_nutrition.map(Json))
        .bind(job.confidence_score.map(i16::from))
        .bind(job.processing_time_ms)
        .bind(job.image_key.as_deref())
        .bind(job.error.as_deref())
        .bind(job.created_at)
        .bind(job.completed_at)
        .execute(&self.db)
        .await
        .with_context(|| format!("save analysis {}", job.id))?;
        Ok(())
    }

    async fn find(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<Option<AnalysisJob>> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, user_id, status, meal_type, notes, detected_foods, total_nutrition,
                   confidence_score, processing_time_ms, image_key, error, created_at, completed_at
            FROM analyses
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.db)
        .await
        .context("load analysis")?;
        row.map(AnalysisJob::try_from).transpose()
    }
}
