use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::AnalysisAccepted;
use super::job::{AnalysisJob, JobStatus, MealType};
use super::pipeline::{NewAnalysis, StatusError};
use crate::{auth::AuthUser, state::AppState, storage::ext_from_mime};

const MAX_NOTES_CHARS: usize = 500;
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn routes(max_image_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/analyze/image",
            post(analyze_image).layer(DefaultBodyLimit::max(max_image_bytes + FORM_OVERHEAD_BYTES)),
        )
        .route("/analyze/:id", get(get_analysis))
}

fn multipart_rejection(e: MultipartError) -> (StatusCode, String) {
    (e.status(), e.body_text())
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

/// POST /analyze/image (multipart)
/// Fields: image (required), meal_type, notes
#[instrument(skip(state, mp))]
pub async fn analyze_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<(StatusCode, HeaderMap, Json<AnalysisAccepted>), (StatusCode, String)> {
    let mut image: Option<(Bytes, String)> = None;
    let mut meal_type: Option<MealType> = None;
    let mut notes: Option<String> = None;

    while let Some(field) = mp.next_field().await.map_err(multipart_rejection)? {
        match field.name() {
            Some("image") => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_ascii_lowercase())
                    .unwrap_or_default();
                if ext_from_mime(&content_type).is_none() {
                    return Err(bad_request("image must be jpeg, png, webp or heic"));
                }
                let data = field.bytes().await.map_err(multipart_rejection)?;
                image = Some((data, content_type));
            }
            Some("meal_type") => {
                let raw = field.text().await.map_err(multipart_rejection)?;
                if !raw.trim().is_empty() {
                    meal_type = Some(
                        raw.parse()
                            .map_err(|_| bad_request("meal_type must be breakfast, lunch, dinner or snack"))?,
                    );
                }
            }
            Some("notes") => {
                let raw = field.text().await.map_err(multipart_rejection)?;
                let trimmed = raw.trim();
                if trimmed.chars().count() > MAX_NOTES_CHARS {
                    return Err(bad_request("notes must be at most 500 characters"));
                }
                notes = Some(trimmed.to_string()).filter(|n| !n.is_empty());
            }
            _ => {}
        }
    }

    let Some((image, content_type)) = image else {
        return Err(bad_request("image is required"));
    };
    if image.is_empty() {
        return Err(bad_request("image is empty"));
    }
    if image.len() > state.config.max_image_bytes {
        warn!(%user_id, bytes = image.len(), "image too large");
        return Err((StatusCode::PAYLOAD_TOO_LARGE, "image is too large".into()));
    }

    let analysis_id = state
        .pipeline
        .submit(NewAnalysis {
            owner_id: user_id,
            image,
            content_type,
            meal_type,
            notes,
        })
        .map_err(|e| {
            warn!(%user_id, error = %e, "analysis refused");
            (StatusCode::SERVICE_UNAVAILABLE, "analysis queue is full, retry later".to_string())
        })?;
    info!(%user_id, %analysis_id, "analysis accepted");

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/v1/analyze/{}", analysis_id)) {
        headers.insert(header::LOCATION, location);
    }

    Ok((
        StatusCode::ACCEPTED,
        headers,
        Json(AnalysisAccepted {
            analysis_id,
            status: JobStatus::Processing,
            message: "Image accepted for analysis",
        }),
    ))
}

/// GET /analyze/:id
#[instrument(skip(state))]
pub async fn get_analysis(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisJob>, (StatusCode, String)> {
    match state.pipeline.get_status(id, user_id).await {
        Ok(job) => Ok(Json(job)),
        Err(StatusError::NotFound(_)) => Err((StatusCode::NOT_FOUND, "Analysis not found".into())),
        Err(e) => {
            error!(error = %e, %user_id, %id, "get_analysis failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error".into()))
        }
    }
}
