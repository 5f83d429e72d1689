use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::domain::status::StatusId;
use crate::domain::template::PricingTemplateId;
use crate::errors::ValidationError;
use crate::pricing;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub i64);

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account that owns leads and quotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One priced row of a quote. The line total is always derived, see
/// [`pricing::line_total`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceLineItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
}

impl ServiceLineItem {
    pub fn new(
        name: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        discount_percent: Decimal,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            quantity,
            unit_price,
            discount_percent,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub lead_id: LeadId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub valid_days: u32,
    pub overall_discount_percent: Decimal,
    pub terms: String,
    pub services: Vec<ServiceLineItem>,
    pub pricing_template_id: Option<PricingTemplateId>,
    pub status_id: StatusId,
    /// Snapshot taken at save time; never re-derived on read.
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn apply_patch(&mut self, patch: QuotePatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(valid_days) = patch.valid_days {
            self.valid_days = valid_days;
        }
        if let Some(terms) = patch.terms {
            self.terms = terms;
        }
        if let Some(overall_discount_percent) = patch.overall_discount_percent {
            self.overall_discount_percent = overall_discount_percent;
        }
        if let Some(services) = patch.services {
            self.services = services;
        }
        if let Some(status_id) = patch.status_id {
            self.status_id = status_id;
        }
        if let Some(total) = patch.total {
            self.total = total;
        }
        self.updated_at = now;
    }
}

/// The quote form as the operator edits it, before the engine assigns a
/// status and a total snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub lead_id: LeadId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub valid_days: u32,
    #[serde(default)]
    pub overall_discount_percent: Decimal,
    #[serde(default)]
    pub terms: String,
    #[serde(default)]
    pub services: Vec<ServiceLineItem>,
    #[serde(default)]
    pub pricing_template_id: Option<PricingTemplateId>,
}

impl QuoteDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        let discount = self.overall_discount_percent;
        pricing::validate_overall_discount(discount)
            .map_err(|_| ValidationError::OverallDiscountOutOfRange(discount))?;
        for (index, item) in self.services.iter().enumerate() {
            pricing::validate_line(item)
                .map_err(|source| ValidationError::Line { index, source })?;
        }
        Ok(())
    }

    pub fn from_quote(quote: &Quote) -> Self {
        Self {
            lead_id: quote.lead_id,
            title: quote.title.clone(),
            description: quote.description.clone(),
            valid_days: quote.valid_days,
            overall_discount_percent: quote.overall_discount_percent,
            terms: quote.terms.clone(),
            services: quote.services.clone(),
            pricing_template_id: quote.pricing_template_id,
        }
    }
}

/// Payload handed to the quote store once a draft has been validated,
/// priced and admitted by the quota guard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewQuote {
    pub user_id: UserId,
    #[serde(flatten)]
    pub draft: QuoteDraft,
    pub status_id: StatusId,
    pub total: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_discount_percent: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceLineItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<StatusId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Decimal>,
}

impl QuotePatch {
    pub fn status(status_id: StatusId) -> Self {
        Self { status_id: Some(status_id), ..Self::default() }
    }

    pub fn from_draft(draft: QuoteDraft, total: Decimal) -> Self {
        Self {
            title: Some(draft.title),
            description: Some(draft.description),
            valid_days: Some(draft.valid_days),
            terms: Some(draft.terms),
            overall_discount_percent: Some(draft.overall_discount_percent),
            services: Some(draft.services),
            status_id: None,
            total: Some(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{QuoteDraft, QuotePatch, ServiceLineItem};
    use crate::domain::lead::LeadId;
    use crate::domain::status::StatusId;
    use crate::errors::ValidationError;

    fn draft(title: &str) -> QuoteDraft {
        QuoteDraft {
            lead_id: LeadId(7),
            title: title.to_string(),
            description: String::new(),
            valid_days: 30,
            overall_discount_percent: Decimal::ZERO,
            terms: String::new(),
            services: vec![ServiceLineItem::new(
                "Installation",
                Decimal::from(2),
                Decimal::from(50),
                Decimal::ZERO,
            )],
            pricing_template_id: None,
        }
    }

    #[test]
    fn blank_title_is_rejected() {
        let error = draft("   ").validate().expect_err("blank title should fail");
        assert_eq!(error, ValidationError::MissingTitle);
    }

    #[test]
    fn invalid_line_reports_its_index() {
        let mut draft = draft("Kitchen remodel");
        draft.services.push(ServiceLineItem::new(
            "Negative",
            Decimal::ONE,
            Decimal::from(-5),
            Decimal::ZERO,
        ));

        let error = draft.validate().expect_err("negative price should fail");
        assert!(matches!(error, ValidationError::Line { index: 1, .. }));
    }

    #[test]
    fn status_patch_only_touches_status() {
        let patch = QuotePatch::status(StatusId(4));
        let json = serde_json::to_value(&patch).expect("serialize patch");

        assert_eq!(json, serde_json::json!({ "status_id": 4 }));
    }
}
