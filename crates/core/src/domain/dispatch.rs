use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::QuoteId;

/// Key of one dispatch dialog session. Retries of the same dialog reuse it
/// so already-completed steps can be skipped.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchId(pub String);

impl DispatchId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStep {
    StatusUpdate,
    Sms,
    Email,
}

impl DispatchStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusUpdate => "status_update",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "status_update" => Some(Self::StatusUpdate),
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable proof that one step of a dispatch took effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStepRecord {
    pub dispatch_id: DispatchId,
    pub quote_id: QuoteId,
    pub step: DispatchStep,
    pub payload_hash: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::DispatchStep;

    #[test]
    fn dispatch_step_round_trips_from_storage_encoding() {
        for step in [DispatchStep::StatusUpdate, DispatchStep::Sms, DispatchStep::Email] {
            assert_eq!(DispatchStep::parse(step.as_str()), Some(step));
        }
        assert_eq!(DispatchStep::parse("fax"), None);
    }
}
