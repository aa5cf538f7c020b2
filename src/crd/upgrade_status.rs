//! `UpgradeStatus`, embedded in `ClusterStatus` (spec.md §3).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum UpgradePhase {
    InProgress,
    Paused,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeProgress {
    pub total: i32,
    pub upgraded: i32,
    pub pending: i32,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStatus {
    pub phase: UpgradePhase,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
    pub current_step: String,
    pub previous_version: String,
    pub target_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub progress: UpgradeProgress,
}

impl UpgradeStatus {
    pub fn new(previous_version: &str, target_version: &str, total: i32) -> Self {
        Self {
            phase: UpgradePhase::InProgress,
            start_time: chrono::Utc::now().to_rfc3339(),
            completion_time: None,
            current_step: "Initializing".to_string(),
            previous_version: previous_version.to_string(),
            target_version: target_version.to_string(),
            last_error: None,
            progress: UpgradeProgress {
                total,
                upgraded: 0,
                pending: total,
            },
        }
    }

    pub fn advance(&mut self, step: &str, upgraded: i32) {
        self.current_step = step.to_string();
        self.progress.upgraded = upgraded;
        self.progress.pending = self.progress.total - upgraded;
    }

    pub fn complete(&mut self) {
        self.phase = UpgradePhase::Completed;
        self.completion_time = Some(chrono::Utc::now().to_rfc3339());
        self.progress.upgraded = self.progress.total;
        self.progress.pending = 0;
    }

    pub fn fail(&mut self, error: &str, auto_pause: bool) {
        self.phase = if auto_pause {
            UpgradePhase::Paused
        } else {
            UpgradePhase::Failed
        };
        self.last_error = Some(error.to_string());
    }
}
