use serde::Serialize;
use uuid::Uuid;

use super::job::JobStatus;

#[derive(Debug, Serialize)]
pub struct AnalysisAccepted {
    pub analysis_id: Uuid,
    pub status: JobStatus,
    pub message: &'static str,
}
