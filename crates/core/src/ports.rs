//! Collaborators the engine talks to. The engine owns none of this state;
//! implementations live in the server (REST backend, HTTP gateways) and the
//! db crate (ledger, in-memory doubles).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::dispatch::{DispatchId, DispatchStepRecord};
use crate::domain::lead::{Lead, LeadId, LeadPatch};
use crate::domain::plan::Plan;
use crate::domain::quote::{NewQuote, Quote, QuoteId, QuotePatch};
use crate::domain::status::Status;
use crate::domain::template::{MessageTemplate, MessageTemplateId, PricingTemplate};
use crate::domain::variable::Variable;
use crate::errors::ApplicationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorErrorKind {
    NotFound,
    Rejected,
    Unavailable,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{collaborator}: {message}")]
pub struct CollaboratorError {
    pub collaborator: String,
    pub kind: CollaboratorErrorKind,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(
        collaborator: impl Into<String>,
        kind: CollaboratorErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self { collaborator: collaborator.into(), kind, message: message.into() }
    }

    pub fn not_found(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(collaborator, CollaboratorErrorKind::NotFound, message)
    }

    pub fn rejected(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(collaborator, CollaboratorErrorKind::Rejected, message)
    }

    pub fn unavailable(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(collaborator, CollaboratorErrorKind::Unavailable, message)
    }
}

impl From<CollaboratorError> for ApplicationError {
    fn from(value: CollaboratorError) -> Self {
        Self::Integration(value.to_string())
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Provider acknowledgement for a sent message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub provider_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub file_name: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsSend {
    pub quote_id: QuoteId,
    pub recipient_phone: String,
    pub sender_name: String,
    pub message: String,
    pub template_id: Option<MessageTemplateId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSend {
    pub quote_id: QuoteId,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    pub template_id: Option<MessageTemplateId>,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn get(&self, id: LeadId) -> CollaboratorResult<Lead>;
    async fn update(&self, id: LeadId, patch: LeadPatch) -> CollaboratorResult<Lead>;
}

#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Quotes of the current account, optionally narrowed to one lead.
    async fn list(&self, lead_id: Option<LeadId>) -> CollaboratorResult<Vec<Quote>>;
    async fn get(&self, id: QuoteId) -> CollaboratorResult<Quote>;
    async fn create(&self, quote: NewQuote) -> CollaboratorResult<Quote>;
    async fn update(&self, id: QuoteId, patch: QuotePatch) -> CollaboratorResult<Quote>;
}

#[async_trait]
pub trait PricingTemplateStore: Send + Sync {
    async fn list(&self) -> CollaboratorResult<Vec<PricingTemplate>>;
}

#[async_trait]
pub trait MessageTemplateStore: Send + Sync {
    async fn list(&self) -> CollaboratorResult<Vec<MessageTemplate>>;
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn list(&self) -> CollaboratorResult<Vec<Status>>;
}

#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn list(&self) -> CollaboratorResult<Vec<Variable>>;
}

#[async_trait]
pub trait SmsChannel: Send + Sync {
    async fn send(&self, sms: SmsSend) -> CollaboratorResult<Ack>;
}

#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send(&self, email: EmailSend) -> CollaboratorResult<Ack>;
}

#[async_trait]
pub trait PlanProvider: Send + Sync {
    async fn current_plan(&self) -> CollaboratorResult<Plan>;
    /// Drops any cached plan or usage figures so the next read is fresh.
    async fn refresh(&self) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait DispatchLedger: Send + Sync {
    async fn completed_steps(
        &self,
        dispatch_id: &DispatchId,
    ) -> CollaboratorResult<Vec<DispatchStepRecord>>;
    async fn record(&self, record: DispatchStepRecord) -> CollaboratorResult<()>;
}

/// Every collaborator the engine needs, shared behind `Arc`.
#[derive(Clone)]
pub struct Collaborators {
    pub leads: Arc<dyn LeadStore>,
    pub quotes: Arc<dyn QuoteStore>,
    pub pricing_templates: Arc<dyn PricingTemplateStore>,
    pub message_templates: Arc<dyn MessageTemplateStore>,
    pub statuses: Arc<dyn StatusStore>,
    pub variables: Arc<dyn VariableStore>,
    pub sms: Arc<dyn SmsChannel>,
    pub email: Arc<dyn EmailChannel>,
    pub plan: Arc<dyn PlanProvider>,
    pub ledger: Arc<dyn DispatchLedger>,
}

#[cfg(test)]
mod tests {
    use super::{CollaboratorError, CollaboratorErrorKind};
    use crate::errors::ApplicationError;

    #[test]
    fn collaborator_error_becomes_integration_failure() {
        let error = CollaboratorError::unavailable("sms", "gateway timed out");
        assert_eq!(error.kind, CollaboratorErrorKind::Unavailable);
        assert_eq!(
            ApplicationError::from(error),
            ApplicationError::Integration("sms: gateway timed out".to_owned())
        );
    }
}
