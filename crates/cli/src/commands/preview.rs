use std::path::Path;

use leadquote_core::domain::variable::VariableSet;
use leadquote_core::{QuoteId, ResolutionContext, SmsSegmentation, SmsSegmenter};
use leadquote_core::{ResolvedMessage, TemplateVariableResolver};
use serde::{Deserialize, Serialize};

use crate::commands::{read_input, CommandResult};

#[derive(Debug, Deserialize)]
struct PreviewInput {
    message: String,
    #[serde(default)]
    variables: VariableSet,
    #[serde(default)]
    quote_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PreviewReport {
    #[serde(flatten)]
    resolved: ResolvedMessage,
    sms: SmsSegmentation,
}

pub fn run(path: &Path) -> CommandResult {
    let input: PreviewInput = match read_input("preview", path) {
        Ok(input) => input,
        Err(result) => return result,
    };

    let context = ResolutionContext { quote_id: input.quote_id.map(QuoteId) };
    let resolved =
        TemplateVariableResolver.resolve_detailed(&input.message, &input.variables, context);
    let sms = SmsSegmenter.segment(&resolved.text);

    let message = if resolved.unresolved.is_empty() {
        format!("{} characters, {} sms part(s)", sms.char_count, sms.segments)
    } else {
        format!(
            "{} characters, {} sms part(s), unresolved: {}",
            sms.char_count,
            sms.segments,
            resolved.unresolved.join(", ")
        )
    };
    CommandResult::success_with("preview", message, &PreviewReport { resolved, sms })
}
