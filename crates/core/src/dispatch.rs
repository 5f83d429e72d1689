//! Sends a quote to its customer: optional status change, then SMS, then
//! email. Steps run in that order and stop at the first failure. Completed
//! steps are never rolled back; each one leaves a record in the dispatch
//! ledger so a retry under the same [`DispatchId`] picks up where the last
//! attempt stopped.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::dispatch::{DispatchId, DispatchStep, DispatchStepRecord};
use crate::domain::lead::Lead;
use crate::domain::quote::{Quote, QuoteId};
use crate::domain::status::StatusId;
use crate::domain::template::MessageTemplateId;
use crate::domain::variable::VariableSet;
use crate::lifecycle::QuoteLifecycle;
use crate::ports::{
    AttachmentRef, Collaborators, DispatchLedger, EmailChannel, EmailSend, LeadStore,
    PlanProvider, QuoteStore, SmsChannel, SmsSend, VariableStore,
};
use crate::sms::{SmsSegmentation, SmsSegmenter};
use crate::templating::{ResolutionContext, TemplateVariableResolver};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsIntent {
    /// Falls back to the lead's phone number.
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub template_id: Option<MessageTemplateId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailIntent {
    /// Falls back to the lead's email address.
    #[serde(default)]
    pub recipient_email: Option<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default)]
    pub template_id: Option<MessageTemplateId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Reuse the id of a failed attempt to resume it.
    #[serde(default)]
    pub dispatch_id: Option<DispatchId>,
    pub quote_id: QuoteId,
    #[serde(default)]
    pub status_id: Option<StatusId>,
    #[serde(default)]
    pub sms: Option<SmsIntent>,
    #[serde(default)]
    pub email: Option<EmailIntent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogDirective {
    Close,
    KeepOpen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    /// Already in effect, either from an earlier attempt or because the quote
    /// already had the requested status.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: DispatchStep,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl StepOutcome {
    fn completed(step: DispatchStep, provider_id: Option<String>) -> Self {
        Self { step, status: StepStatus::Completed, provider_id }
    }

    fn skipped(step: DispatchStep) -> Self {
        Self { step, status: StepStatus::Skipped, provider_id: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatch_id: DispatchId,
    pub steps: Vec<StepOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_segmentation: Option<SmsSegmentation>,
    pub updated_quote: Quote,
    pub dialog: DialogDirective,
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("invalid dispatch request: {message}")]
    Validation { message: String },
    #[error("could not prepare dispatch: {message}")]
    Preparation { message: String },
    #[error("{step} step failed: {message}")]
    StepFailed { step: DispatchStep, message: String },
}

impl DispatchError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    fn preparation(message: impl ToString) -> Self {
        Self::Preparation { message: message.to_string() }
    }

    pub fn failed_step(&self) -> Option<DispatchStep> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Dispatch stopped early. `completed` lists the steps that took effect and
/// stay in effect.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("dispatch {dispatch_id} failed: {error}")]
pub struct DispatchFailure {
    pub dispatch_id: DispatchId,
    pub error: DispatchError,
    pub completed: Vec<StepOutcome>,
    pub dialog: DialogDirective,
}

enum StepAction {
    Status(StatusId),
    Sms(SmsSend),
    Email(EmailSend),
}

impl StepAction {
    fn step(&self) -> DispatchStep {
        match self {
            Self::Status(_) => DispatchStep::StatusUpdate,
            Self::Sms(_) => DispatchStep::Sms,
            Self::Email(_) => DispatchStep::Email,
        }
    }

    fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Status(status_id) => serde_json::to_string(status_id),
            Self::Sms(sms) => serde_json::to_string(sms),
            Self::Email(email) => serde_json::to_string(email),
        }
    }
}

struct PlannedStep {
    action: StepAction,
    payload_hash: String,
}

struct Prepared {
    quote: Quote,
    steps: Vec<PlannedStep>,
    sms_segmentation: Option<SmsSegmentation>,
    previously_completed: Vec<DispatchStepRecord>,
}

pub fn hash_payload(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct MultiChannelDispatcher {
    quotes: Arc<dyn QuoteStore>,
    leads: Arc<dyn LeadStore>,
    variables: Arc<dyn VariableStore>,
    sms: Arc<dyn SmsChannel>,
    email: Arc<dyn EmailChannel>,
    plan: Arc<dyn PlanProvider>,
    ledger: Arc<dyn DispatchLedger>,
    lifecycle: Arc<QuoteLifecycle>,
    resolver: TemplateVariableResolver,
    segmenter: SmsSegmenter,
    default_sender_name: String,
    audit: Arc<dyn AuditSink>,
}

impl MultiChannelDispatcher {
    pub fn new(
        collaborators: &Collaborators,
        lifecycle: Arc<QuoteLifecycle>,
        default_sender_name: impl Into<String>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            quotes: collaborators.quotes.clone(),
            leads: collaborators.leads.clone(),
            variables: collaborators.variables.clone(),
            sms: collaborators.sms.clone(),
            email: collaborators.email.clone(),
            plan: collaborators.plan.clone(),
            ledger: collaborators.ledger.clone(),
            lifecycle,
            resolver: TemplateVariableResolver,
            segmenter: SmsSegmenter,
            default_sender_name: default_sender_name.into(),
            audit,
        }
    }

    pub async fn dispatch(
        &self,
        request: DispatchRequest,
        context: &AuditContext,
    ) -> Result<DispatchReport, DispatchFailure> {
        let dispatch_id = request.dispatch_id.clone().unwrap_or_else(DispatchId::generate);
        let context = context.for_quote(request.quote_id);

        info!(
            event_name = "dispatch.started",
            correlation_id = %context.correlation_id,
            quote_id = %request.quote_id,
            dispatch_id = %dispatch_id,
            "quote dispatch started"
        );

        let prepared = match self.prepare(&dispatch_id, &request).await {
            Ok(prepared) => prepared,
            Err(error) => return Err(self.fail(&context, dispatch_id, error, Vec::new())),
        };

        let mut quote = prepared.quote;
        let mut outcomes = Vec::with_capacity(prepared.steps.len());

        for planned in prepared.steps {
            let step = planned.action.step();
            // The status step follows the quote's current status, never the ledger.
            let skip = match &planned.action {
                StepAction::Status(id) => *id == quote.status_id,
                _ => prepared.previously_completed.iter().any(|record| {
                    record.quote_id == quote.id
                        && record.step == step
                        && record.payload_hash == planned.payload_hash
                }),
            };

            if skip {
                self.note_skipped(&context, &dispatch_id, step);
                outcomes.push(StepOutcome::skipped(step));
                continue;
            }

            let result = match planned.action {
                StepAction::Status(status_id) => {
                    let changed =
                        self.lifecycle.change_status_of(&quote, status_id, &context).await;
                    match changed {
                        Ok(updated) => {
                            quote = updated;
                            Ok(None)
                        }
                        Err(error) => Err(error.to_string()),
                    }
                }
                StepAction::Sms(sms) => {
                    self.sms.send(sms).await.map(|ack| ack.provider_id).map_err(|e| e.to_string())
                }
                StepAction::Email(email) => self
                    .email
                    .send(email)
                    .await
                    .map(|ack| ack.provider_id)
                    .map_err(|e| e.to_string()),
            };

            match result {
                Ok(provider_id) => {
                    self.record_completion(
                        &context,
                        &dispatch_id,
                        quote.id,
                        step,
                        planned.payload_hash,
                    )
                    .await;
                    outcomes.push(StepOutcome::completed(step, provider_id));
                }
                Err(message) => {
                    let error = DispatchError::StepFailed { step, message };
                    return Err(self.fail(&context, dispatch_id, error, outcomes));
                }
            }
        }

        if let Err(error) = self.plan.refresh().await {
            warn!(
                event_name = "dispatch.plan_refresh_failed",
                correlation_id = %context.correlation_id,
                quote_id = %quote.id,
                error = %error,
                "plan usage refresh failed after dispatch"
            );
        }

        info!(
            event_name = "dispatch.completed",
            correlation_id = %context.correlation_id,
            quote_id = %quote.id,
            dispatch_id = %dispatch_id,
            steps = outcomes.len(),
            "quote dispatch completed"
        );
        self.audit.emit(
            context
                .event("dispatch.completed", AuditCategory::Dispatch, AuditOutcome::Success)
                .with_metadata("dispatch_id", dispatch_id.to_string()),
        );

        Ok(DispatchReport {
            dispatch_id,
            steps: outcomes,
            sms_segmentation: prepared.sms_segmentation,
            updated_quote: quote,
            dialog: DialogDirective::Close,
        })
    }

    /// Everything that can be checked or fetched before the first step runs.
    async fn prepare(
        &self,
        dispatch_id: &DispatchId,
        request: &DispatchRequest,
    ) -> Result<Prepared, DispatchError> {
        validate_request(request)?;

        let quote = self.quotes.get(request.quote_id).await.map_err(DispatchError::preparation)?;

        let needs_lead = request.sms.as_ref().is_some_and(|sms| blank(&sms.recipient_phone))
            || request.email.as_ref().is_some_and(|email| blank(&email.recipient_email));
        let lead = if needs_lead {
            Some(self.leads.get(quote.lead_id).await.map_err(DispatchError::preparation)?)
        } else {
            None
        };

        let variables = VariableSet::from_variables(
            self.variables.list().await.map_err(DispatchError::preparation)?,
        );
        let resolution = ResolutionContext::for_quote(quote.id);

        let mut actions = Vec::new();
        if let Some(status_id) = request.status_id {
            actions.push(StepAction::Status(status_id));
        }

        let mut sms_segmentation = None;
        if let Some(intent) = &request.sms {
            let sms = self.build_sms(intent, &quote, lead.as_ref(), &variables, resolution)?;
            sms_segmentation = Some(self.segmenter.segment(&sms.message));
            actions.push(StepAction::Sms(sms));
        }
        if let Some(intent) = &request.email {
            let email = self.build_email(intent, &quote, lead.as_ref(), &variables, resolution)?;
            actions.push(StepAction::Email(email));
        }

        let mut steps = Vec::with_capacity(actions.len());
        for action in actions {
            let payload = action.payload().map_err(DispatchError::preparation)?;
            steps.push(PlannedStep { payload_hash: hash_payload(&payload), action });
        }

        let previously_completed =
            self.ledger.completed_steps(dispatch_id).await.map_err(DispatchError::preparation)?;

        Ok(Prepared { quote, steps, sms_segmentation, previously_completed })
    }

    fn build_sms(
        &self,
        intent: &SmsIntent,
        quote: &Quote,
        lead: Option<&Lead>,
        variables: &VariableSet,
        resolution: ResolutionContext,
    ) -> Result<SmsSend, DispatchError> {
        let recipient = non_blank(&intent.recipient_phone)
            .or_else(|| lead.and_then(|lead| non_blank(&lead.phone)))
            .ok_or_else(|| DispatchError::validation("no phone number available for the SMS"))?;
        let sender_name = non_blank(&intent.sender_name)
            .unwrap_or_else(|| self.default_sender_name.clone());

        Ok(SmsSend {
            quote_id: quote.id,
            recipient_phone: self.resolver.resolve(&recipient, variables, resolution),
            sender_name,
            message: self.resolver.resolve(&intent.message, variables, resolution),
            template_id: intent.template_id,
        })
    }

    fn build_email(
        &self,
        intent: &EmailIntent,
        quote: &Quote,
        lead: Option<&Lead>,
        variables: &VariableSet,
        resolution: ResolutionContext,
    ) -> Result<EmailSend, DispatchError> {
        let recipient = non_blank(&intent.recipient_email)
            .or_else(|| lead.and_then(|lead| non_blank(&lead.email)))
            .ok_or_else(|| DispatchError::validation("no email address available"))?;
        let recipient = self.resolver.resolve(&recipient, variables, resolution);
        if !recipient.contains('@') {
            return Err(DispatchError::validation(format!(
                "`{recipient}` is not a valid email address"
            )));
        }

        Ok(EmailSend {
            quote_id: quote.id,
            recipient_email: recipient,
            subject: self.resolver.resolve(&intent.subject, variables, resolution),
            body: self.resolver.resolve(&intent.body, variables, resolution),
            attachments: intent.attachments.clone(),
            template_id: intent.template_id,
        })
    }

    async fn record_completion(
        &self,
        context: &AuditContext,
        dispatch_id: &DispatchId,
        quote_id: QuoteId,
        step: DispatchStep,
        payload_hash: String,
    ) {
        let record = DispatchStepRecord {
            dispatch_id: dispatch_id.clone(),
            quote_id,
            step,
            payload_hash,
            completed_at: Utc::now(),
        };
        // The step already took effect; a lost record only means a retry
        // would repeat it.
        if let Err(error) = self.ledger.record(record).await {
            warn!(
                event_name = "dispatch.ledger_write_failed",
                correlation_id = %context.correlation_id,
                quote_id = %quote_id,
                dispatch_id = %dispatch_id,
                step = step.as_str(),
                error = %error,
                "could not record completed dispatch step"
            );
        }

        info!(
            event_name = "dispatch.step_completed",
            correlation_id = %context.correlation_id,
            quote_id = %quote_id,
            dispatch_id = %dispatch_id,
            step = step.as_str(),
            "dispatch step completed"
        );
        self.audit.emit(
            context
                .event("dispatch.step_completed", AuditCategory::Dispatch, AuditOutcome::Success)
                .with_metadata("dispatch_id", dispatch_id.to_string())
                .with_metadata("step", step.as_str()),
        );
    }

    fn note_skipped(&self, context: &AuditContext, dispatch_id: &DispatchId, step: DispatchStep) {
        info!(
            event_name = "dispatch.step_skipped",
            correlation_id = %context.correlation_id,
            dispatch_id = %dispatch_id,
            step = step.as_str(),
            "dispatch step already in effect"
        );
        self.audit.emit(
            context
                .event("dispatch.step_skipped", AuditCategory::Dispatch, AuditOutcome::Skipped)
                .with_metadata("dispatch_id", dispatch_id.to_string())
                .with_metadata("step", step.as_str()),
        );
    }

    fn fail(
        &self,
        context: &AuditContext,
        dispatch_id: DispatchId,
        error: DispatchError,
        completed: Vec<StepOutcome>,
    ) -> DispatchFailure {
        let step = error.failed_step().map(|step| step.as_str()).unwrap_or("none");
        warn!(
            event_name = "dispatch.failed",
            correlation_id = %context.correlation_id,
            dispatch_id = %dispatch_id,
            failed_step = step,
            completed_steps = completed.len(),
            error = %error,
            "quote dispatch failed"
        );
        self.audit.emit(
            context
                .event("dispatch.failed", AuditCategory::Dispatch, AuditOutcome::Failed)
                .with_metadata("dispatch_id", dispatch_id.to_string())
                .with_metadata("failed_step", step)
                .with_metadata("error", error.to_string()),
        );
        DispatchFailure { dispatch_id, error, completed, dialog: DialogDirective::KeepOpen }
    }
}

fn validate_request(request: &DispatchRequest) -> Result<(), DispatchError> {
    if request.status_id.is_none() && request.sms.is_none() && request.email.is_none() {
        return Err(DispatchError::validation("nothing to dispatch"));
    }
    if let Some(sms) = &request.sms {
        if sms.message.trim().is_empty() {
            return Err(DispatchError::validation("SMS message is empty"));
        }
    }
    if let Some(email) = &request.email {
        if email.subject.trim().is_empty() {
            return Err(DispatchError::validation("email subject is empty"));
        }
        if email.body.trim().is_empty() {
            return Err(DispatchError::validation("email body is empty"));
        }
    }
    Ok(())
}

fn blank(value: &Option<String>) -> bool {
    non_blank(value).is_none()
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{
        hash_payload, validate_request, DispatchError, DispatchRequest, EmailIntent, SmsIntent,
        StepAction,
    };
    use crate::domain::quote::QuoteId;
    use crate::domain::status::StatusId;
    use crate::ports::SmsSend;

    fn sms(message: &str) -> SmsSend {
        SmsSend {
            quote_id: QuoteId(1),
            recipient_phone: "+15550100".to_owned(),
            sender_name: "Acme".to_owned(),
            message: message.to_owned(),
            template_id: None,
        }
    }

    fn request() -> DispatchRequest {
        DispatchRequest {
            dispatch_id: None,
            quote_id: QuoteId(1),
            status_id: None,
            sms: None,
            email: None,
        }
    }

    #[test]
    fn payload_hash_tracks_the_resolved_payload() {
        let original = StepAction::Sms(sms("Your quote is ready")).payload().expect("payload");
        let same = StepAction::Sms(sms("Your quote is ready")).payload().expect("payload");
        let edited = StepAction::Sms(sms("Your quote is ready!")).payload().expect("payload");

        assert_eq!(hash_payload(&original), hash_payload(&same));
        assert_ne!(hash_payload(&original), hash_payload(&edited));
        assert_eq!(hash_payload(&original).len(), 64);
    }

    #[test]
    fn empty_request_is_rejected() {
        assert_eq!(
            validate_request(&request()),
            Err(DispatchError::Validation { message: "nothing to dispatch".to_owned() })
        );
        let status_only = DispatchRequest { status_id: Some(StatusId(2)), ..request() };
        assert!(validate_request(&status_only).is_ok());
    }

    #[test]
    fn blank_message_bodies_are_rejected_before_any_step() {
        let blank_sms = DispatchRequest {
            sms: Some(SmsIntent { message: "  ".to_owned(), ..SmsIntent::default() }),
            ..request()
        };
        assert!(matches!(validate_request(&blank_sms), Err(DispatchError::Validation { .. })));

        let blank_subject = DispatchRequest {
            email: Some(EmailIntent { body: "Hello".to_owned(), ..EmailIntent::default() }),
            ..request()
        };
        assert_eq!(
            validate_request(&blank_subject),
            Err(DispatchError::Validation { message: "email subject is empty".to_owned() })
        );
    }

    #[test]
    fn dispatch_failure_serializes_error_kind_and_dialog() {
        let failure = super::DispatchFailure {
            dispatch_id: super::DispatchId("d-1".to_owned()),
            error: DispatchError::StepFailed {
                step: crate::domain::dispatch::DispatchStep::Email,
                message: "smtp relay down".to_owned(),
            },
            completed: Vec::new(),
            dialog: super::DialogDirective::KeepOpen,
        };
        let json = serde_json::to_value(&failure).expect("serialize failure");
        assert_eq!(json["error"]["kind"], "step_failed");
        assert_eq!(json["error"]["step"], "email");
        assert_eq!(json["dialog"], "keep_open");
    }
}
