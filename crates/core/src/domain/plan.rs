use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Quotes. Named after the plan's billing label.
    Offers,
    Leads,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offers => "offers",
            Self::Leads => "leads",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "offers" | "quotes" => Some(Self::Offers),
            "leads" => Some(Self::Leads),
            _ => None,
        }
    }
}

/// Current subscription plan. Usage is never stored here; it is counted
/// from entities created on or after `start_date`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_limits: BTreeMap<ResourceKind, u32>,
}

impl Plan {
    pub fn new(start_date: Option<DateTime<Utc>>) -> Self {
        Self { start_date, resource_limits: BTreeMap::new() }
    }

    pub fn with_limit(mut self, resource: ResourceKind, total_allowed: u32) -> Self {
        self.resource_limits.insert(resource, total_allowed);
        self
    }

    pub fn limit_for(&self, resource: ResourceKind) -> Option<u32> {
        self.resource_limits.get(&resource).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUsage {
    pub resource: ResourceKind,
    pub usage: u32,
    pub total_allowed: u32,
}

#[cfg(test)]
mod tests {
    use super::{Plan, ResourceKind};

    #[test]
    fn resource_kind_round_trips_from_storage_encoding() {
        for kind in [ResourceKind::Offers, ResourceKind::Leads] {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::parse("Quotes"), Some(ResourceKind::Offers));
    }

    #[test]
    fn plan_limits_deserialize_from_snake_case_keys() {
        let plan: Plan = serde_json::from_str(
            r#"{"start_date":"2026-01-01T00:00:00Z","resource_limits":{"offers":5}}"#,
        )
        .expect("plan json");

        assert_eq!(plan.limit_for(ResourceKind::Offers), Some(5));
        assert_eq!(plan.limit_for(ResourceKind::Leads), None);
        assert!(plan.start_date.is_some());
    }
}
