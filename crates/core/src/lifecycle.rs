use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::lead::{Lead, LeadId, LeadPatch};
use crate::domain::plan::ResourceKind;
use crate::domain::quote::{NewQuote, Quote, QuoteDraft, QuoteId, QuotePatch, UserId};
use crate::domain::status::{self, EntityKind, Status, StatusId, NOT_SENT_STATUS_NAME};
use crate::domain::template::{PricingTemplate, PricingTemplateId};
use crate::errors::{ApplicationError, DomainError, ValidationError};
use crate::ports::{
    CollaboratorError, Collaborators, LeadStore, PlanProvider, PricingTemplateStore, QuoteStore,
    StatusStore,
};
use crate::pricing::{self, PricingError};
use crate::quota::{count_usage, Admission, BlockReason, QuoteQuotaGuard};

pub const DEFAULT_VALID_DAYS: u32 = 30;
pub const DEFAULT_COPY_TITLE_PREFIX: &str = "Copy of ";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl From<ValidationError> for LifecycleError {
    fn from(value: ValidationError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<PricingError> for LifecycleError {
    fn from(value: PricingError) -> Self {
        Self::Domain(value.into())
    }
}

impl From<LifecycleError> for ApplicationError {
    fn from(value: LifecycleError) -> Self {
        match value {
            LifecycleError::Domain(error) => Self::Domain(error),
            LifecycleError::Collaborator(error) => error.into(),
        }
    }
}

/// Decides whether an operator may move a quote between two labels.
pub trait TransitionPolicy: Send + Sync {
    fn permits(&self, from: StatusId, to: &Status) -> bool;
}

/// Any label to any label. Statuses are data-driven and carry no ordering.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unrestricted;

impl TransitionPolicy for Unrestricted {
    fn permits(&self, _from: StatusId, _to: &Status) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuoteCreation {
    Created { quote: Quote },
    QuotaExceeded { usage: u32, total_allowed: u32, reason: BlockReason },
}

/// Status assignment and persistence orchestration for quotes.
pub struct QuoteLifecycle {
    leads: Arc<dyn LeadStore>,
    quotes: Arc<dyn QuoteStore>,
    pricing_templates: Arc<dyn PricingTemplateStore>,
    statuses: Arc<dyn StatusStore>,
    plan: Arc<dyn PlanProvider>,
    guard: QuoteQuotaGuard,
    policy: Arc<dyn TransitionPolicy>,
    copy_title_prefix: String,
    audit: Arc<dyn AuditSink>,
}

impl QuoteLifecycle {
    pub fn new(collaborators: &Collaborators, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            leads: collaborators.leads.clone(),
            quotes: collaborators.quotes.clone(),
            pricing_templates: collaborators.pricing_templates.clone(),
            statuses: collaborators.statuses.clone(),
            plan: collaborators.plan.clone(),
            guard: QuoteQuotaGuard,
            policy: Arc::new(Unrestricted),
            copy_title_prefix: DEFAULT_COPY_TITLE_PREFIX.to_owned(),
            audit,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn TransitionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_copy_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.copy_title_prefix = prefix.into();
        self
    }

    pub async fn history(&self, lead_id: LeadId) -> Result<Vec<Quote>, LifecycleError> {
        Ok(self.quotes.list(Some(lead_id)).await?)
    }

    pub async fn create_quote(
        &self,
        user_id: UserId,
        draft: QuoteDraft,
        context: &AuditContext,
    ) -> Result<QuoteCreation, LifecycleError> {
        self.persist_new(user_id, draft, context, "lifecycle.quote_created").await
    }

    /// Duplicates a quote under a prefixed title. The copy is a new quote in
    /// every respect: it passes the quota guard, starts as "Not sent" and
    /// gets a fresh total snapshot.
    pub async fn copy_quote(
        &self,
        user_id: UserId,
        source_id: QuoteId,
        context: &AuditContext,
    ) -> Result<QuoteCreation, LifecycleError> {
        let source = self.quotes.get(source_id).await?;
        let mut draft = QuoteDraft::from_quote(&source);
        draft.title = format!("{}{}", self.copy_title_prefix, source.title);

        info!(
            event_name = "lifecycle.quote_copy_requested",
            correlation_id = %context.correlation_id,
            quote_id = %source_id,
            "copying quote"
        );
        self.persist_new(user_id, draft, context, "lifecycle.quote_copied").await
    }

    /// Saves an edited quote. Editing never consumes quota.
    pub async fn update_quote(
        &self,
        quote_id: QuoteId,
        draft: QuoteDraft,
        context: &AuditContext,
    ) -> Result<Quote, LifecycleError> {
        draft.validate()?;
        let total = snapshot_of(&draft)?;
        let updated = self.quotes.update(quote_id, QuotePatch::from_draft(draft, total)).await?;

        info!(
            event_name = "lifecycle.quote_updated",
            correlation_id = %context.correlation_id,
            quote_id = %quote_id,
            total = %total,
            "quote updated"
        );
        self.audit.emit(
            context
                .for_quote(quote_id)
                .event("lifecycle.quote_updated", AuditCategory::Lifecycle, AuditOutcome::Success)
                .with_metadata("total", total.to_string()),
        );
        Ok(updated)
    }

    pub async fn change_status(
        &self,
        quote_id: QuoteId,
        status_id: StatusId,
        context: &AuditContext,
    ) -> Result<Quote, LifecycleError> {
        let quote = self.quotes.get(quote_id).await?;
        self.change_status_of(&quote, status_id, context).await
    }

    /// PUT-style status update. Repeating it with the same status is
    /// harmless.
    pub async fn change_status_of(
        &self,
        quote: &Quote,
        status_id: StatusId,
        context: &AuditContext,
    ) -> Result<Quote, LifecycleError> {
        let statuses = self.statuses.list().await?;
        let target = status::find_by_id(&statuses, status_id)
            .filter(|status| status.entity_kind == EntityKind::Quote)
            .ok_or(DomainError::UnknownStatus(status_id))?;

        if !self.policy.permits(quote.status_id, target) {
            self.audit.emit(
                context
                    .for_quote(quote.id)
                    .event(
                        "lifecycle.status_change_rejected",
                        AuditCategory::Lifecycle,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("from", quote.status_id.to_string())
                    .with_metadata("to", status_id.to_string()),
            );
            return Err(DomainError::TransitionRejected { from: quote.status_id, to: status_id }
                .into());
        }

        let updated = self.quotes.update(quote.id, QuotePatch::status(status_id)).await?;

        info!(
            event_name = "lifecycle.status_changed",
            correlation_id = %context.correlation_id,
            quote_id = %quote.id,
            from = %quote.status_id,
            to = %status_id,
            status_name = %target.name,
            "quote status changed"
        );
        self.audit.emit(
            context
                .for_quote(quote.id)
                .event("lifecycle.status_changed", AuditCategory::Lifecycle, AuditOutcome::Success)
                .with_metadata("from", quote.status_id.to_string())
                .with_metadata("to", status_id.to_string()),
        );
        Ok(updated)
    }

    pub async fn assign_lead_status(
        &self,
        lead_id: LeadId,
        status_id: StatusId,
        context: &AuditContext,
    ) -> Result<Lead, LifecycleError> {
        let statuses = self.statuses.list().await?;
        status::find_by_id(&statuses, status_id)
            .filter(|status| status.entity_kind == EntityKind::Lead)
            .ok_or(DomainError::UnknownStatus(status_id))?;

        let patch = LeadPatch { status_id: Some(status_id), ..LeadPatch::default() };
        let lead = self.leads.update(lead_id, patch).await?;

        info!(
            event_name = "lifecycle.lead_status_changed",
            correlation_id = %context.correlation_id,
            lead_id = %lead_id,
            to = %status_id,
            "lead status changed"
        );
        self.audit.emit(
            context
                .event(
                    "lifecycle.lead_status_changed",
                    AuditCategory::Lifecycle,
                    AuditOutcome::Success,
                )
                .with_metadata("lead_id", lead_id.to_string())
                .with_metadata("to", status_id.to_string()),
        );
        Ok(lead)
    }

    pub async fn draft_from_template_id(
        &self,
        lead_id: LeadId,
        template_id: PricingTemplateId,
    ) -> Result<QuoteDraft, LifecycleError> {
        let templates = self.pricing_templates.list().await?;
        let template =
            templates.iter().find(|template| template.id == template_id).ok_or_else(|| {
                CollaboratorError::not_found(
                    "pricing_templates",
                    format!("pricing template {template_id} does not exist"),
                )
            })?;
        Ok(draft_from_template(lead_id, template))
    }

    async fn persist_new(
        &self,
        user_id: UserId,
        draft: QuoteDraft,
        context: &AuditContext,
        event_type: &'static str,
    ) -> Result<QuoteCreation, LifecycleError> {
        draft.validate()?;
        let total = snapshot_of(&draft)?;

        if let Admission::Blocked { usage, total_allowed, reason } = self.admit(user_id).await? {
            warn!(
                event_name = "quota.admission_blocked",
                correlation_id = %context.correlation_id,
                usage,
                total_allowed,
                reason = reason.as_str(),
                "quote creation blocked by plan quota"
            );
            self.audit.emit(
                context
                    .event("quota.admission_blocked", AuditCategory::Quota, AuditOutcome::Rejected)
                    .with_metadata("usage", usage.to_string())
                    .with_metadata("total_allowed", total_allowed.to_string())
                    .with_metadata("reason", reason.as_str()),
            );
            return Ok(QuoteCreation::QuotaExceeded { usage, total_allowed, reason });
        }

        let status_id = self.initial_status().await?;
        let quote = self.quotes.create(NewQuote { user_id, draft, status_id, total }).await?;

        if let Err(error) = self.plan.refresh().await {
            warn!(
                event_name = "quota.plan_refresh_failed",
                correlation_id = %context.correlation_id,
                quote_id = %quote.id,
                error = %error,
                "plan usage refresh failed after quote creation"
            );
        }

        info!(
            event_name = event_type,
            correlation_id = %context.correlation_id,
            quote_id = %quote.id,
            lead_id = %quote.lead_id,
            total = %quote.total,
            "quote persisted"
        );
        self.audit.emit(
            context
                .for_quote(quote.id)
                .event(event_type, AuditCategory::Lifecycle, AuditOutcome::Success)
                .with_metadata("lead_id", quote.lead_id.to_string())
                .with_metadata("total", quote.total.to_string()),
        );
        Ok(QuoteCreation::Created { quote })
    }

    /// Usage is recomputed from the quote list on every call.
    async fn admit(&self, user_id: UserId) -> Result<Admission, LifecycleError> {
        let plan = self.plan.current_plan().await?;
        let quotes = self.quotes.list(None).await?;
        let usage = count_usage(
            quotes.iter().filter(|quote| quote.user_id == user_id).map(|quote| quote.created_at),
            &plan,
        );
        Ok(self.guard.check_admission(ResourceKind::Offers, usage, &plan))
    }

    async fn initial_status(&self) -> Result<StatusId, LifecycleError> {
        let statuses = self.statuses.list().await?;
        status::find_by_name(&statuses, EntityKind::Quote, NOT_SENT_STATUS_NAME)
            .map(|status| status.id)
            .ok_or_else(|| {
                DomainError::MissingStatus { name: NOT_SENT_STATUS_NAME.to_owned() }.into()
            })
    }
}

/// Seeds a new quote form. The template itself is never modified.
pub fn draft_from_template(lead_id: LeadId, template: &PricingTemplate) -> QuoteDraft {
    QuoteDraft {
        lead_id,
        title: template.title.clone(),
        description: template.description.clone(),
        valid_days: DEFAULT_VALID_DAYS,
        overall_discount_percent: Decimal::ZERO,
        terms: template.terms.clone(),
        services: template.services.clone(),
        pricing_template_id: Some(template.id),
    }
}

fn snapshot_of(draft: &QuoteDraft) -> Result<Decimal, PricingError> {
    let total = pricing::total(&draft.services, draft.overall_discount_percent)?;
    Ok(pricing::snapshot_total(total))
}
