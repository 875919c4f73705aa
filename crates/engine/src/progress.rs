use chrono::{DateTime, Utc};
use db::models::execution::ExecutionPhase;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub execution_id: Uuid,
    pub phase: ExecutionPhase,
    pub progress: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
