use chrono::Utc;
use leadquote_core::{Admission, Plan, QuoteQuotaGuard, ResourceKind};

use crate::commands::CommandResult;

/// Exit code for a blocked admission. Input errors use 2.
const BLOCKED_EXIT_CODE: u8 = 1;

pub fn run(limit: Option<u32>, usage: u32, plan_started: bool) -> CommandResult {
    let mut plan = Plan::new(plan_started.then(Utc::now));
    if let Some(limit) = limit {
        plan = plan.with_limit(ResourceKind::Offers, limit);
    }

    let admission = QuoteQuotaGuard.check_admission(ResourceKind::Offers, usage, &plan);
    match admission {
        Admission::Allowed => CommandResult::success_with(
            "quota",
            format!("allowed ({usage} of {} used)", limit.unwrap_or_default()),
            &admission,
        ),
        Admission::Blocked { usage, total_allowed, reason } => CommandResult::failure_with(
            "quota",
            "quota_blocked",
            format!("blocked: {} ({usage} of {total_allowed} used)", reason.as_str()),
            &admission,
            BLOCKED_EXIT_CODE,
        ),
    }
}
