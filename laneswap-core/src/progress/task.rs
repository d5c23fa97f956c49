use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::status::ProgressStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressTask {
    pub id: String,
    pub service_id: String,
    pub name: String,
    pub total_steps: u64,
    pub current_step: u64,
    pub status: ProgressStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ProgressTask {
    /// Percentage in `0.0..=100.0`, derived from the clamped step counter.
    pub fn percent_complete(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        let current = self.current_step.min(self.total_steps);
        current as f64 / self.total_steps as f64 * 100.0
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn clamp_step(&self, step: i64) -> u64 {
        if step <= 0 {
            0
        } else {
            (step as u64).min(self.total_steps)
        }
    }
}
