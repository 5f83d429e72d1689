//! Quote pricing.
//!
//! All arithmetic is done on [`Decimal`] so totals are exact in base 10.
//! Two discount layers exist: a per-line discount applied inside
//! [`line_total`], and the quote's overall discount applied to the subtotal
//! in [`total`].

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::quote::ServiceLineItem;

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingError {
    #[error("invalid line item `{field}`: {reason}")]
    InvalidLineItem { field: String, reason: String },
    #[error("overall discount must be within 0..=100, got {0}")]
    InvalidDiscount(Decimal),
    #[error("no service line at index {0}")]
    LineIndexOutOfRange(usize),
}

impl PricingError {
    fn line(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidLineItem { field: field.to_string(), reason: reason.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub index: usize,
    pub name: String,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub trace: Vec<PricingTraceStep>,
}

pub fn validate_line(item: &ServiceLineItem) -> Result<(), PricingError> {
    if item.quantity <= Decimal::ZERO {
        return Err(PricingError::line(
            "quantity",
            format!("must be greater than 0, got {}", item.quantity),
        ));
    }
    if item.unit_price < Decimal::ZERO {
        return Err(PricingError::line(
            "unit_price",
            format!("must not be negative, got {}", item.unit_price),
        ));
    }
    if !is_percentage(item.discount_percent) {
        return Err(PricingError::line(
            "discount_percent",
            format!("must be within 0..=100, got {}", item.discount_percent),
        ));
    }
    Ok(())
}

pub fn validate_overall_discount(discount_percent: Decimal) -> Result<(), PricingError> {
    if is_percentage(discount_percent) {
        Ok(())
    } else {
        Err(PricingError::InvalidDiscount(discount_percent))
    }
}

/// `quantity * unit_price * (1 - discount_percent / 100)`.
pub fn line_total(item: &ServiceLineItem) -> Result<Decimal, PricingError> {
    validate_line(item)?;
    let gross = item
        .quantity
        .checked_mul(item.unit_price)
        .ok_or_else(|| PricingError::line("unit_price", "amount overflow"))?;
    gross
        .checked_mul(remaining_fraction(item.discount_percent))
        .ok_or_else(|| PricingError::line("unit_price", "amount overflow"))
}

pub fn subtotal(items: &[ServiceLineItem]) -> Result<Decimal, PricingError> {
    items.iter().try_fold(Decimal::ZERO, |sum, item| {
        let line = line_total(item)?;
        sum.checked_add(line).ok_or_else(|| PricingError::line("unit_price", "amount overflow"))
    })
}

pub fn total(
    items: &[ServiceLineItem],
    overall_discount_percent: Decimal,
) -> Result<Decimal, PricingError> {
    apply_overall_discount(subtotal(items)?, overall_discount_percent)
}

/// Applies the overall discount to an already computed subtotal; never
/// returns a negative amount.
pub fn apply_overall_discount(
    subtotal: Decimal,
    overall_discount_percent: Decimal,
) -> Result<Decimal, PricingError> {
    validate_overall_discount(overall_discount_percent)?;
    let discounted = subtotal
        .checked_mul(remaining_fraction(overall_discount_percent))
        .ok_or_else(|| PricingError::line("unit_price", "amount overflow"))?;
    Ok(discounted.max(Decimal::ZERO))
}

/// Rounds a total to the two decimal places persisted as the quote snapshot.
pub fn snapshot_total(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn price_services(
    items: &[ServiceLineItem],
    overall_discount_percent: Decimal,
) -> Result<PricingBreakdown, PricingError> {
    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        lines.push(PricedLine { index, name: item.name.clone(), line_total: line_total(item)? });
    }

    let subtotal = lines.iter().try_fold(Decimal::ZERO, |sum, line| {
        sum.checked_add(line.line_total)
            .ok_or_else(|| PricingError::line("unit_price", "amount overflow"))
    })?;
    let total = apply_overall_discount(subtotal, overall_discount_percent)?;
    let discount_total = subtotal - total;

    Ok(PricingBreakdown {
        lines,
        subtotal,
        discount_total,
        total,
        trace: vec![
            PricingTraceStep {
                stage: "subtotal".to_string(),
                detail: "sum(quantity * unit_price * (1 - line_discount / 100))".to_string(),
                amount: subtotal,
            },
            PricingTraceStep {
                stage: "overall_discount".to_string(),
                detail: format!("{overall_discount_percent}% of subtotal"),
                amount: discount_total,
            },
            PricingTraceStep {
                stage: "total".to_string(),
                detail: "subtotal - overall_discount, clamped at zero".to_string(),
                amount: total,
            },
        ],
    })
}

/// Parses a numeric form field. Non-numeric text is a validation failure,
/// not a zero.
pub fn parse_amount(field: &str, raw: &str) -> Result<Decimal, PricingError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PricingError::line(field, "value is required"));
    }
    trimmed
        .parse::<Decimal>()
        .map_err(|_| PricingError::line(field, format!("`{trimmed}` is not a number")))
}

fn decimal_from_f64(field: &str, value: f64) -> Result<Decimal, PricingError> {
    if !value.is_finite() {
        return Err(PricingError::line(field, format!("must be finite, got {value}")));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| PricingError::line(field, format!("`{value}` is out of range")))
}

impl ServiceLineItem {
    /// Builds a line from floating point form values, rejecting NaN and
    /// infinities before anything is priced.
    pub fn from_f64(
        name: impl Into<String>,
        quantity: f64,
        unit_price: f64,
        discount_percent: f64,
    ) -> Result<Self, PricingError> {
        let item = Self::new(
            name,
            decimal_from_f64("quantity", quantity)?,
            decimal_from_f64("unit_price", unit_price)?,
            decimal_from_f64("discount_percent", discount_percent)?,
        );
        validate_line(&item)?;
        Ok(item)
    }
}

fn is_percentage(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE_HUNDRED
}

fn remaining_fraction(discount_percent: Decimal) -> Decimal {
    Decimal::ONE - discount_percent / Decimal::ONE_HUNDRED
}

/// Editor-side pricing state. Every mutation returns freshly recomputed
/// totals, and a line that is still being typed is included in the preview
/// as soon as it is valid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LivePricing {
    committed: Vec<ServiceLineItem>,
    pending: Option<ServiceLineItem>,
    overall_discount_percent: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivePreview {
    pub breakdown: PricingBreakdown,
    pub pending_included: bool,
    pub pending_error: Option<PricingError>,
}

impl LivePricing {
    pub fn new(
        services: Vec<ServiceLineItem>,
        overall_discount_percent: Decimal,
    ) -> Result<Self, PricingError> {
        validate_overall_discount(overall_discount_percent)?;
        for item in &services {
            validate_line(item)?;
        }
        Ok(Self { committed: services, pending: None, overall_discount_percent })
    }

    pub fn services(&self) -> &[ServiceLineItem] {
        &self.committed
    }

    pub fn overall_discount_percent(&self) -> Decimal {
        self.overall_discount_percent
    }

    pub fn set_pending(
        &mut self,
        item: Option<ServiceLineItem>,
    ) -> Result<LivePreview, PricingError> {
        self.pending = item;
        self.preview()
    }

    pub fn commit_pending(&mut self) -> Result<LivePreview, PricingError> {
        if let Some(item) = self.pending.as_ref() {
            validate_line(item)?;
        }
        if let Some(item) = self.pending.take() {
            self.committed.push(item);
        }
        self.preview()
    }

    pub fn update_line(
        &mut self,
        index: usize,
        item: ServiceLineItem,
    ) -> Result<LivePreview, PricingError> {
        validate_line(&item)?;
        let slot =
            self.committed.get_mut(index).ok_or(PricingError::LineIndexOutOfRange(index))?;
        *slot = item;
        self.preview()
    }

    pub fn remove_line(&mut self, index: usize) -> Result<LivePreview, PricingError> {
        if index >= self.committed.len() {
            return Err(PricingError::LineIndexOutOfRange(index));
        }
        self.committed.remove(index);
        self.preview()
    }

    pub fn set_overall_discount(
        &mut self,
        discount_percent: Decimal,
    ) -> Result<LivePreview, PricingError> {
        validate_overall_discount(discount_percent)?;
        self.overall_discount_percent = discount_percent;
        self.preview()
    }

    pub fn preview(&self) -> Result<LivePreview, PricingError> {
        let pending_error = self.pending.as_ref().and_then(|item| validate_line(item).err());
        let pending_included = self.pending.is_some() && pending_error.is_none();

        let breakdown = if pending_included {
            let mut lines = self.committed.clone();
            lines.extend(self.pending.iter().cloned());
            price_services(&lines, self.overall_discount_percent)?
        } else {
            price_services(&self.committed, self.overall_discount_percent)?
        };

        Ok(LivePreview { breakdown, pending_included, pending_error })
    }
}
