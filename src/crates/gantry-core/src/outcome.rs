//! The structured result a handler returns to the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handler completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Fail,
    Retry,
    Skipped,
}

impl StageStatus {
    /// Lowercase name, as stored in the context `outcome` key.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Fail => "fail",
            StageStatus::Retry => "retry",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Branch ranking: SUCCESS > PARTIAL_SUCCESS > everything else.
    pub fn rank(&self) -> u8 {
        match self {
            StageStatus::Success => 3,
            StageStatus::PartialSuccess => 2,
            StageStatus::Skipped => 1,
            StageStatus::Retry => 1,
            StageStatus::Fail => 0,
        }
    }
}

/// What a handler tells the engine about a completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    /// Hint consumed by the edge selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Merged into the context on SUCCESS / PARTIAL_SUCCESS.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_updates: BTreeMap<String, Value>,
    /// Free-form artifact metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Value>,
}

impl Outcome {
    fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            preferred_label: None,
            failure_reason: None,
            notes: None,
            context_updates: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn success() -> Self {
        Self::with_status(StageStatus::Success)
    }

    pub fn partial_success() -> Self {
        Self::with_status(StageStatus::PartialSuccess)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        let mut outcome = Self::with_status(StageStatus::Fail);
        outcome.failure_reason = Some(reason.into());
        outcome
    }

    pub fn retry() -> Self {
        Self::with_status(StageStatus::Retry)
    }

    pub fn skipped() -> Self {
        Self::with_status(StageStatus::Skipped)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_preferred_label(mut self, label: impl Into<String>) -> Self {
        self.preferred_label = Some(label.into());
        self
    }

    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranking_prefers_success() {
        assert!(StageStatus::Success.rank() > StageStatus::PartialSuccess.rank());
        assert!(StageStatus::PartialSuccess.rank() > StageStatus::Fail.rank());
    }

    #[test]
    fn serde_round_trip() {
        let outcome = Outcome::success()
            .with_preferred_label("ship")
            .with_update("k", serde_json::json!(1));
        let text = serde_json::to_string(&outcome).unwrap();
        let back: Outcome = serde_json::from_str(&text).unwrap();
        assert_eq!(back, outcome);
        assert!(text.contains("\"success\""));
    }
}
