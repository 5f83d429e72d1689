//! In-memory collaborators for tests, the CLI and local runs without a
//! backend. Each store can be told to fail so callers can exercise their
//! error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use leadquote_core::domain::dispatch::{DispatchId, DispatchStepRecord};
use leadquote_core::domain::lead::{Lead, LeadId, LeadPatch};
use leadquote_core::domain::plan::Plan;
use leadquote_core::domain::quote::{NewQuote, Quote, QuoteId, QuotePatch};
use leadquote_core::domain::status::{EntityKind, Status};
use leadquote_core::domain::template::{MessageTemplate, PricingTemplate};
use leadquote_core::domain::variable::Variable;
use leadquote_core::ports::{
    Ack, CollaboratorError, CollaboratorResult, Collaborators, DispatchLedger, EmailChannel,
    EmailSend, LeadStore, MessageTemplateStore, PlanProvider, PricingTemplateStore, QuoteStore,
    SmsChannel, SmsSend, StatusStore, VariableStore,
};

/// Armed failure returned by every call until cleared.
#[derive(Default)]
struct FailureSwitch {
    armed: RwLock<Option<CollaboratorError>>,
}

impl FailureSwitch {
    async fn arm(&self, error: CollaboratorError) {
        *self.armed.write().await = Some(error);
    }

    async fn clear(&self) {
        *self.armed.write().await = None;
    }

    async fn check(&self) -> CollaboratorResult<()> {
        match self.armed.read().await.as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Quote and lead labels used when nothing else is seeded.
pub fn default_statuses() -> Vec<Status> {
    vec![
        Status::new(1, "Not sent", EntityKind::Quote),
        Status::new(2, "Sent", EntityKind::Quote),
        Status::new(3, "Accepted", EntityKind::Quote),
        Status::new(4, "Declined", EntityKind::Quote),
        Status::new(10, "New", EntityKind::Lead),
        Status::new(11, "Contacted", EntityKind::Lead),
        Status::new(12, "Won", EntityKind::Lead),
    ]
}

#[derive(Default)]
pub struct InMemoryLeadStore {
    leads: RwLock<HashMap<LeadId, Lead>>,
    failure: FailureSwitch,
}

impl InMemoryLeadStore {
    pub async fn insert(&self, lead: Lead) {
        self.leads.write().await.insert(lead.id, lead);
    }

    pub async fn fail_with(&self, error: CollaboratorError) {
        self.failure.arm(error).await;
    }

    pub async fn clear_failure(&self) {
        self.failure.clear().await;
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn get(&self, id: LeadId) -> CollaboratorResult<Lead> {
        self.failure.check().await?;
        let leads = self.leads.read().await;
        leads
            .get(&id)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found("leads", format!("lead {id} not found")))
    }

    async fn update(&self, id: LeadId, patch: LeadPatch) -> CollaboratorResult<Lead> {
        self.failure.check().await?;
        let mut leads = self.leads.write().await;
        let lead = leads
            .get_mut(&id)
            .ok_or_else(|| CollaboratorError::not_found("leads", format!("lead {id} not found")))?;
        lead.apply_patch(patch);
        Ok(lead.clone())
    }
}

pub struct InMemoryQuoteStore {
    quotes: RwLock<HashMap<QuoteId, Quote>>,
    next_id: AtomicI64,
    failure: FailureSwitch,
}

impl Default for InMemoryQuoteStore {
    fn default() -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            failure: FailureSwitch::default(),
        }
    }
}

impl InMemoryQuoteStore {
    /// Stores an existing quote as-is, keeping its id and timestamps.
    pub async fn insert(&self, quote: Quote) {
        self.next_id.fetch_max(quote.id.0 + 1, Ordering::SeqCst);
        self.quotes.write().await.insert(quote.id, quote);
    }

    pub async fn all(&self) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self.quotes.read().await.values().cloned().collect();
        quotes.sort_by_key(|quote| quote.id);
        quotes
    }

    pub async fn fail_with(&self, error: CollaboratorError) {
        self.failure.arm(error).await;
    }

    pub async fn clear_failure(&self) {
        self.failure.clear().await;
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn list(&self, lead_id: Option<LeadId>) -> CollaboratorResult<Vec<Quote>> {
        self.failure.check().await?;
        let quotes = self.all().await;
        Ok(quotes
            .into_iter()
            .filter(|quote| lead_id.map_or(true, |lead_id| quote.lead_id == lead_id))
            .collect())
    }

    async fn get(&self, id: QuoteId) -> CollaboratorResult<Quote> {
        self.failure.check().await?;
        let quotes = self.quotes.read().await;
        quotes
            .get(&id)
            .cloned()
            .ok_or_else(|| CollaboratorError::not_found("quotes", format!("quote {id} not found")))
    }

    async fn create(&self, quote: NewQuote) -> CollaboratorResult<Quote> {
        self.failure.check().await?;
        let now = Utc::now();
        let id = QuoteId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let draft = quote.draft;
        let created = Quote {
            id,
            lead_id: draft.lead_id,
            user_id: quote.user_id,
            title: draft.title,
            description: draft.description,
            valid_days: draft.valid_days,
            overall_discount_percent: draft.overall_discount_percent,
            terms: draft.terms,
            services: draft.services,
            pricing_template_id: draft.pricing_template_id,
            status_id: quote.status_id,
            total: quote.total,
            created_at: now,
            updated_at: now,
        };
        self.quotes.write().await.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, id: QuoteId, patch: QuotePatch) -> CollaboratorResult<Quote> {
        self.failure.check().await?;
        let mut quotes = self.quotes.write().await;
        let quote = quotes.get_mut(&id).ok_or_else(|| {
            CollaboratorError::not_found("quotes", format!("quote {id} not found"))
        })?;
        quote.apply_patch(patch, Utc::now());
        Ok(quote.clone())
    }
}

#[derive(Default)]
pub struct InMemoryPricingTemplateStore {
    templates: RwLock<Vec<PricingTemplate>>,
}

impl InMemoryPricingTemplateStore {
    pub async fn insert(&self, template: PricingTemplate) {
        self.templates.write().await.push(template);
    }
}

#[async_trait]
impl PricingTemplateStore for InMemoryPricingTemplateStore {
    async fn list(&self) -> CollaboratorResult<Vec<PricingTemplate>> {
        Ok(self.templates.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemoryMessageTemplateStore {
    templates: RwLock<Vec<MessageTemplate>>,
}

impl InMemoryMessageTemplateStore {
    pub async fn insert(&self, template: MessageTemplate) {
        self.templates.write().await.push(template);
    }
}

#[async_trait]
impl MessageTemplateStore for InMemoryMessageTemplateStore {
    async fn list(&self) -> CollaboratorResult<Vec<MessageTemplate>> {
        Ok(self.templates.read().await.clone())
    }
}

pub struct InMemoryStatusStore {
    statuses: RwLock<Vec<Status>>,
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::with_statuses(default_statuses())
    }
}

impl InMemoryStatusStore {
    pub fn with_statuses(statuses: Vec<Status>) -> Self {
        Self { statuses: RwLock::new(statuses) }
    }

    pub async fn replace(&self, statuses: Vec<Status>) {
        *self.statuses.write().await = statuses;
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn list(&self) -> CollaboratorResult<Vec<Status>> {
        Ok(self.statuses.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemoryVariableStore {
    variables: RwLock<Vec<Variable>>,
}

impl InMemoryVariableStore {
    pub async fn set(&self, name: &str, value: &str) {
        let mut variables = self.variables.write().await;
        variables.retain(|variable| variable.variable_name != name);
        variables.push(Variable::new(name, value));
    }
}

#[async_trait]
impl VariableStore for InMemoryVariableStore {
    async fn list(&self) -> CollaboratorResult<Vec<Variable>> {
        Ok(self.variables.read().await.clone())
    }
}

/// Records every accepted SMS. Provider ids count up from `sms-1`.
#[derive(Default)]
pub struct InMemorySmsChannel {
    sent: RwLock<Vec<SmsSend>>,
    counter: AtomicU64,
    failure: FailureSwitch,
}

impl InMemorySmsChannel {
    pub async fn sent(&self) -> Vec<SmsSend> {
        self.sent.read().await.clone()
    }

    pub async fn fail_with(&self, error: CollaboratorError) {
        self.failure.arm(error).await;
    }

    pub async fn clear_failure(&self) {
        self.failure.clear().await;
    }
}

#[async_trait]
impl SmsChannel for InMemorySmsChannel {
    async fn send(&self, sms: SmsSend) -> CollaboratorResult<Ack> {
        self.failure.check().await?;
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.write().await.push(sms);
        Ok(Ack { provider_id: Some(format!("sms-{sequence}")) })
    }
}

#[derive(Default)]
pub struct InMemoryEmailChannel {
    sent: RwLock<Vec<EmailSend>>,
    counter: AtomicU64,
    failure: FailureSwitch,
}

impl InMemoryEmailChannel {
    pub async fn sent(&self) -> Vec<EmailSend> {
        self.sent.read().await.clone()
    }

    pub async fn fail_with(&self, error: CollaboratorError) {
        self.failure.arm(error).await;
    }

    pub async fn clear_failure(&self) {
        self.failure.clear().await;
    }
}

#[async_trait]
impl EmailChannel for InMemoryEmailChannel {
    async fn send(&self, email: EmailSend) -> CollaboratorResult<Ack> {
        self.failure.check().await?;
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.write().await.push(email);
        Ok(Ack { provider_id: Some(format!("email-{sequence}")) })
    }
}

#[derive(Default)]
pub struct InMemoryPlanProvider {
    plan: RwLock<Plan>,
    refreshes: AtomicU64,
    failure: FailureSwitch,
}

impl InMemoryPlanProvider {
    pub fn with_plan(plan: Plan) -> Self {
        Self { plan: RwLock::new(plan), ..Self::default() }
    }

    pub async fn set_plan(&self, plan: Plan) {
        *self.plan.write().await = plan;
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub async fn fail_with(&self, error: CollaboratorError) {
        self.failure.arm(error).await;
    }

    pub async fn clear_failure(&self) {
        self.failure.clear().await;
    }
}

#[async_trait]
impl PlanProvider for InMemoryPlanProvider {
    async fn current_plan(&self) -> CollaboratorResult<Plan> {
        self.failure.check().await?;
        Ok(self.plan.read().await.clone())
    }

    async fn refresh(&self) -> CollaboratorResult<()> {
        self.failure.check().await?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDispatchLedger {
    records: RwLock<HashMap<DispatchId, Vec<DispatchStepRecord>>>,
}

impl InMemoryDispatchLedger {
    pub async fn all(&self) -> Vec<DispatchStepRecord> {
        self.records.read().await.values().flatten().cloned().collect()
    }
}

#[async_trait]
impl DispatchLedger for InMemoryDispatchLedger {
    async fn completed_steps(
        &self,
        dispatch_id: &DispatchId,
    ) -> CollaboratorResult<Vec<DispatchStepRecord>> {
        let records = self.records.read().await;
        Ok(records.get(dispatch_id).cloned().unwrap_or_default())
    }

    async fn record(&self, record: DispatchStepRecord) -> CollaboratorResult<()> {
        let mut records = self.records.write().await;
        let steps = records.entry(record.dispatch_id.clone()).or_default();
        steps.retain(|existing| existing.step != record.step);
        steps.push(record);
        Ok(())
    }
}

/// One of each in-memory collaborator, with typed handles kept so tests can
/// seed data and inspect what was sent.
#[derive(Clone, Default)]
pub struct MemoryCollaborators {
    pub leads: Arc<InMemoryLeadStore>,
    pub quotes: Arc<InMemoryQuoteStore>,
    pub pricing_templates: Arc<InMemoryPricingTemplateStore>,
    pub message_templates: Arc<InMemoryMessageTemplateStore>,
    pub statuses: Arc<InMemoryStatusStore>,
    pub variables: Arc<InMemoryVariableStore>,
    pub sms: Arc<InMemorySmsChannel>,
    pub email: Arc<InMemoryEmailChannel>,
    pub plan: Arc<InMemoryPlanProvider>,
    pub ledger: Arc<InMemoryDispatchLedger>,
}

impl MemoryCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(plan: Plan) -> Self {
        Self { plan: Arc::new(InMemoryPlanProvider::with_plan(plan)), ..Self::default() }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            leads: self.leads.clone(),
            quotes: self.quotes.clone(),
            pricing_templates: self.pricing_templates.clone(),
            message_templates: self.message_templates.clone(),
            statuses: self.statuses.clone(),
            variables: self.variables.clone(),
            sms: self.sms.clone(),
            email: self.email.clone(),
            plan: self.plan.clone(),
            ledger: self.ledger.clone(),
        }
    }

    /// Same as [`collaborators`](Self::collaborators) but with the ledger
    /// swapped, e.g. for the sqlite-backed one.
    pub fn collaborators_with_ledger(&self, ledger: Arc<dyn DispatchLedger>) -> Collaborators {
        Collaborators { ledger, ..self.collaborators() }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use leadquote_core::domain::dispatch::{DispatchId, DispatchStep, DispatchStepRecord};
    use leadquote_core::domain::lead::{Lead, LeadId, LeadPatch};
    use leadquote_core::domain::quote::{NewQuote, QuoteDraft, QuoteId, QuotePatch, UserId};
    use leadquote_core::domain::status::StatusId;
    use leadquote_core::ports::{
        CollaboratorError, CollaboratorErrorKind, DispatchLedger, LeadStore, QuoteStore,
        SmsChannel, SmsSend,
    };

    use super::{InMemoryDispatchLedger, InMemoryLeadStore, InMemoryQuoteStore, InMemorySmsChannel};

    fn new_quote(lead_id: i64, title: &str) -> NewQuote {
        NewQuote {
            user_id: UserId(1),
            draft: QuoteDraft {
                lead_id: LeadId(lead_id),
                title: title.to_string(),
                description: String::new(),
                valid_days: 30,
                overall_discount_percent: Decimal::ZERO,
                terms: String::new(),
                services: Vec::new(),
                pricing_template_id: None,
            },
            status_id: StatusId(1),
            total: Decimal::from(90),
        }
    }

    #[tokio::test]
    async fn quote_store_assigns_ids_and_filters_by_lead() {
        let store = InMemoryQuoteStore::default();
        let first = store.create(new_quote(5, "First")).await.expect("create first");
        let second = store.create(new_quote(6, "Second")).await.expect("create second");

        assert_eq!(first.id, QuoteId(1));
        assert_eq!(second.id, QuoteId(2));
        assert_eq!(store.list(None).await.expect("list all").len(), 2);

        let for_lead = store.list(Some(LeadId(6))).await.expect("list for lead");
        assert_eq!(for_lead, vec![second]);
    }

    #[tokio::test]
    async fn quote_store_update_applies_patch_and_reports_missing_quotes() {
        let store = InMemoryQuoteStore::default();
        let created = store.create(new_quote(5, "First")).await.expect("create");

        let updated =
            store.update(created.id, QuotePatch::status(StatusId(2))).await.expect("update");
        assert_eq!(updated.status_id, StatusId(2));
        assert_eq!(updated.title, "First");

        let error = store.get(QuoteId(99)).await.expect_err("missing quote");
        assert_eq!(error.kind, CollaboratorErrorKind::NotFound);
    }

    #[tokio::test]
    async fn lead_store_patches_contact_fields() {
        let store = InMemoryLeadStore::default();
        store
            .insert(Lead {
                id: LeadId(3),
                user_id: UserId(1),
                name: "Ada".to_string(),
                email: None,
                phone: Some("+4512345678".to_string()),
                status_id: None,
                created_at: Utc::now(),
            })
            .await;

        let patch = LeadPatch { status_id: Some(StatusId(11)), ..LeadPatch::default() };
        let lead = store.update(LeadId(3), patch).await.expect("update lead");

        assert_eq!(lead.status_id, Some(StatusId(11)));
        assert_eq!(lead.phone.as_deref(), Some("+4512345678"));
    }

    #[tokio::test]
    async fn armed_failure_is_returned_until_cleared() {
        let channel = InMemorySmsChannel::default();
        let sms = SmsSend {
            quote_id: QuoteId(1),
            recipient_phone: "+4512345678".to_string(),
            sender_name: "Leadquote".to_string(),
            message: "Hi".to_string(),
            template_id: None,
        };

        channel.fail_with(CollaboratorError::unavailable("sms", "gateway down")).await;
        let error = channel.send(sms.clone()).await.expect_err("armed failure");
        assert_eq!(error.message, "gateway down");
        assert!(channel.sent().await.is_empty());

        channel.clear_failure().await;
        let ack = channel.send(sms).await.expect("send after clear");
        assert_eq!(ack.provider_id.as_deref(), Some("sms-1"));
        assert_eq!(channel.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn ledger_keeps_one_record_per_step() {
        let ledger = InMemoryDispatchLedger::default();
        let dispatch_id = DispatchId("dsp-1".to_string());
        for hash in ["v1", "v2"] {
            ledger
                .record(DispatchStepRecord {
                    dispatch_id: dispatch_id.clone(),
                    quote_id: QuoteId(1),
                    step: DispatchStep::Sms,
                    payload_hash: hash.to_string(),
                    completed_at: Utc::now(),
                })
                .await
                .expect("record");
        }

        let steps = ledger.completed_steps(&dispatch_id).await.expect("steps");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].payload_hash, "v2");
    }
}
