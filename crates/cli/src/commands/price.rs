use std::path::Path;

use leadquote_core::pricing::{snapshot_total, LivePreview, LivePricing};
use leadquote_core::ServiceLineItem;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::commands::{read_input, CommandResult};

#[derive(Debug, Deserialize)]
struct PriceInput {
    services: Vec<ServiceLineItem>,
    #[serde(default)]
    overall_discount_percent: Decimal,
    /// A line still being typed; it only counts once it is valid.
    #[serde(default)]
    pending: Option<ServiceLineItem>,
}

#[derive(Debug, Serialize)]
struct PriceReport {
    #[serde(flatten)]
    preview: LivePreview,
    snapshot_total: Decimal,
}

pub fn run(path: &Path) -> CommandResult {
    let input: PriceInput = match read_input("price", path) {
        Ok(input) => input,
        Err(result) => return result,
    };

    let preview = LivePricing::new(input.services, input.overall_discount_percent)
        .and_then(|mut pricing| pricing.set_pending(input.pending));
    let preview = match preview {
        Ok(preview) => preview,
        Err(error) => {
            return CommandResult::failure_with(
                "price",
                "pricing_validation",
                error.to_string(),
                &error,
                3,
            );
        }
    };

    let snapshot_total = snapshot_total(preview.breakdown.total);
    let message = match &preview.pending_error {
        Some(error) => format!("total {snapshot_total} (pending line ignored: {error})"),
        None => format!("total {snapshot_total}"),
    };
    CommandResult::success_with("price", message, &PriceReport { preview, snapshot_total })
}
