use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plan::{Plan, ResourceKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    LimitReached,
    /// The plan window cannot be established.
    MissingPlanStart,
    MissingLimit,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LimitReached => "limit_reached",
            Self::MissingPlanStart => "missing_plan_start",
            Self::MissingLimit => "missing_limit",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    Blocked { usage: u32, total_allowed: u32, reason: BlockReason },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Counts entities that fall inside the plan window. Without a start date
/// there is no window and the count is zero; admission is refused anyway.
pub fn count_usage<I>(created_ats: I, plan: &Plan) -> u32
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let Some(start) = plan.start_date else {
        return 0;
    };
    let count = created_ats.into_iter().filter(|created_at| *created_at >= start).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteQuotaGuard;

impl QuoteQuotaGuard {
    /// Decides whether one more entity of `resource` may be created. Every
    /// ambiguous plan state blocks.
    pub fn check_admission(&self, resource: ResourceKind, usage: u32, plan: &Plan) -> Admission {
        if plan.start_date.is_none() {
            let total_allowed = plan.limit_for(resource).unwrap_or(0);
            return Admission::Blocked {
                usage,
                total_allowed,
                reason: BlockReason::MissingPlanStart,
            };
        }

        let Some(total_allowed) = plan.limit_for(resource) else {
            return Admission::Blocked {
                usage,
                total_allowed: 0,
                reason: BlockReason::MissingLimit,
            };
        };

        if usage >= total_allowed {
            Admission::Blocked { usage, total_allowed, reason: BlockReason::LimitReached }
        } else {
            Admission::Allowed
        }
    }
}
