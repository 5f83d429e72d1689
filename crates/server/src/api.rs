//! HTTP surface over the quote engine.
//!
//! Callers identify the acting account with `x-leadquote-user` and may pass
//! `x-correlation-id`; one is generated otherwise and echoed in error bodies.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{post, put},
    Router,
};
use leadquote_core::audit::{AuditContext, AuditSink};
use leadquote_core::config::AppConfig;
use leadquote_core::dispatch::{
    DispatchError, DispatchRequest, EmailIntent, MultiChannelDispatcher, SmsIntent,
};
use leadquote_core::domain::dispatch::DispatchId;
use leadquote_core::domain::lead::LeadId;
use leadquote_core::domain::quote::{QuoteDraft, QuoteId, ServiceLineItem, UserId};
use leadquote_core::domain::status::StatusId;
use leadquote_core::domain::template::{MessageTemplateId, PricingTemplateId};
use leadquote_core::domain::variable::VariableSet;
use leadquote_core::errors::{ApplicationError, DomainError, InterfaceError};
use leadquote_core::lifecycle::{
    LifecycleError, QuoteCreation, QuoteLifecycle, DEFAULT_VALID_DAYS,
};
use leadquote_core::ports::{
    CollaboratorError, CollaboratorErrorKind, Collaborators, MessageTemplateStore, VariableStore,
};
use leadquote_core::pricing::{LivePreview, LivePricing};
use leadquote_core::quota::BlockReason;
use leadquote_core::sms::{SmsSegmentation, SmsSegmenter};
use leadquote_core::templating::{ResolutionContext, TemplateVariableResolver};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

pub const USER_HEADER: &str = "x-leadquote-user";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    lifecycle: Arc<QuoteLifecycle>,
    dispatcher: Arc<MultiChannelDispatcher>,
    variables: Arc<dyn VariableStore>,
    message_templates: Arc<dyn MessageTemplateStore>,
}

impl ApiState {
    pub fn new(
        collaborators: &Collaborators,
        config: &AppConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let lifecycle = Arc::new(
            QuoteLifecycle::new(collaborators, audit.clone())
                .with_copy_title_prefix(config.quotes.copy_title_prefix.clone()),
        );
        let dispatcher = Arc::new(MultiChannelDispatcher::new(
            collaborators,
            lifecycle.clone(),
            config.messaging.default_sender_name.clone(),
            audit,
        ));
        Self {
            lifecycle,
            dispatcher,
            variables: collaborators.variables.clone(),
            message_templates: collaborators.message_templates.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Serialize)]
struct QuotaBlocked {
    usage: u32,
    total_allowed: u32,
    reason: BlockReason,
}

#[derive(Debug, Deserialize)]
struct PricingPreviewRequest {
    #[serde(default)]
    services: Vec<ServiceLineItem>,
    /// Line still being edited; priced only once it is valid.
    #[serde(default)]
    pending: Option<ServiceLineItem>,
    #[serde(default)]
    overall_discount_percent: Decimal,
}

#[derive(Debug, Deserialize)]
struct MessagePreviewRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    template_id: Option<MessageTemplateId>,
    #[serde(default)]
    quote_id: Option<QuoteId>,
}

#[derive(Debug, Serialize)]
struct MessagePreview {
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    text: String,
    unresolved: Vec<String>,
    segmentation: SmsSegmentation,
}

/// Quote form without the lead, which comes from the path.
#[derive(Debug, Deserialize)]
struct QuoteForm {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_valid_days")]
    valid_days: u32,
    #[serde(default)]
    overall_discount_percent: Decimal,
    #[serde(default)]
    terms: String,
    #[serde(default)]
    services: Vec<ServiceLineItem>,
    #[serde(default)]
    pricing_template_id: Option<PricingTemplateId>,
}

fn default_valid_days() -> u32 {
    DEFAULT_VALID_DAYS
}

impl QuoteForm {
    fn into_draft(self, lead_id: LeadId) -> QuoteDraft {
        QuoteDraft {
            lead_id,
            title: self.title,
            description: self.description,
            valid_days: self.valid_days,
            overall_discount_percent: self.overall_discount_percent,
            terms: self.terms,
            services: self.services,
            pricing_template_id: self.pricing_template_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateQuoteRequest {
    #[serde(default)]
    quote: Option<QuoteForm>,
    /// Used to seed the quote when no form is given.
    #[serde(default)]
    from_template: Option<PricingTemplateId>,
}

#[derive(Debug, Deserialize)]
struct StatusChangeRequest {
    status_id: StatusId,
}

#[derive(Debug, Deserialize)]
struct DispatchBody {
    #[serde(default)]
    dispatch_id: Option<DispatchId>,
    #[serde(default)]
    status_id: Option<StatusId>,
    #[serde(default)]
    sms: Option<SmsIntent>,
    #[serde(default)]
    email: Option<EmailIntent>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/pricing/preview", post(pricing_preview))
        .route("/api/v1/messages/preview", post(message_preview))
        .route("/api/v1/leads/{lead_id}/quotes", post(create_quote))
        .route("/api/v1/quotes/{quote_id}", put(update_quote))
        .route("/api/v1/quotes/{quote_id}/copy", post(copy_quote))
        .route("/api/v1/quotes/{quote_id}/status", put(change_status))
        .route("/api/v1/quotes/{quote_id}/dispatch", post(dispatch_quote))
        .with_state(state)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

fn acting_user(headers: &HeaderMap, correlation_id: &str) -> ApiResult<UserId> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .map(UserId)
        .ok_or_else(|| {
            let message = format!("`{USER_HEADER}` header must carry a numeric user id");
            bad_request(message, correlation_id)
        })
}

fn audit_context(correlation_id: &str, user: Option<UserId>) -> AuditContext {
    let actor = user.map_or_else(|| "api".to_string(), |user| format!("user:{user}"));
    AuditContext::new(None, correlation_id, actor)
}

fn bad_request(message: String, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    interface_error(InterfaceError::BadRequest {
        message,
        correlation_id: correlation_id.to_string(),
    })
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let status = match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: error.user_message().to_string(),
            message: error.message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}

fn lifecycle_error(error: LifecycleError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    warn!(
        event_name = "api.request_failed",
        correlation_id = %correlation_id,
        error = %error,
        "request failed"
    );
    if let LifecycleError::Collaborator(CollaboratorError {
        kind: CollaboratorErrorKind::NotFound,
        message,
        ..
    }) = &error
    {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "The requested record does not exist.".to_string(),
                message: message.clone(),
                correlation_id: correlation_id.to_string(),
            }),
        );
    }
    interface_error(ApplicationError::from(error).into_interface(correlation_id))
}

fn creation_response(outcome: QuoteCreation) -> Response {
    match outcome {
        QuoteCreation::Created { quote } => (StatusCode::CREATED, Json(quote)).into_response(),
        QuoteCreation::QuotaExceeded { usage, total_allowed, reason } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(QuotaBlocked { usage, total_allowed, reason }),
        )
            .into_response(),
    }
}

async fn pricing_preview(
    headers: HeaderMap,
    Json(request): Json<PricingPreviewRequest>,
) -> ApiResult<Json<LivePreview>> {
    let correlation_id = correlation_id(&headers);
    let preview = LivePricing::new(request.services, request.overall_discount_percent)
        .and_then(|mut pricing| pricing.set_pending(request.pending))
        .map_err(|error| {
            let error = ApplicationError::from(DomainError::from(error));
            interface_error(error.into_interface(&correlation_id))
        })?;
    Ok(Json(preview))
}

async fn message_preview(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<MessagePreviewRequest>,
) -> ApiResult<Json<MessagePreview>> {
    let correlation_id = correlation_id(&headers);
    let collaborator_error =
        |error: CollaboratorError| lifecycle_error(error.into(), &correlation_id);

    let (subject, body) = match (request.text, request.template_id) {
        (Some(text), _) => (None, text),
        (None, Some(template_id)) => {
            let templates = state.message_templates.list().await.map_err(collaborator_error)?;
            let template = templates
                .into_iter()
                .find(|template| template.id == template_id)
                .ok_or_else(|| {
                    collaborator_error(CollaboratorError::not_found(
                        "message_templates",
                        format!("message template {} does not exist", template_id.0),
                    ))
                })?;
            (template.subject, template.body)
        }
        (None, None) => {
            let message = "either `text` or `template_id` is required".to_string();
            return Err(bad_request(message, &correlation_id));
        }
    };

    let variables =
        VariableSet::from_variables(state.variables.list().await.map_err(collaborator_error)?);
    let context = ResolutionContext { quote_id: request.quote_id };
    let resolver = TemplateVariableResolver;
    let resolved = resolver.resolve_detailed(&body, &variables, context);

    Ok(Json(MessagePreview {
        subject: subject.map(|subject| resolver.resolve(&subject, &variables, context)),
        segmentation: SmsSegmenter.segment(&resolved.text),
        text: resolved.text,
        unresolved: resolved.unresolved,
    }))
}

async fn create_quote(
    State(state): State<ApiState>,
    Path(lead_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<CreateQuoteRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_id(&headers);
    let user = acting_user(&headers, &correlation_id)?;
    let lead_id = LeadId(lead_id);

    let draft = match (request.quote, request.from_template) {
        (Some(form), _) => form.into_draft(lead_id),
        (None, Some(template_id)) => state
            .lifecycle
            .draft_from_template_id(lead_id, template_id)
            .await
            .map_err(|error| lifecycle_error(error, &correlation_id))?,
        (None, None) => {
            let message = "either `quote` or `from_template` is required".to_string();
            return Err(bad_request(message, &correlation_id));
        }
    };

    let outcome = state
        .lifecycle
        .create_quote(user, draft, &audit_context(&correlation_id, Some(user)))
        .await
        .map_err(|error| lifecycle_error(error, &correlation_id))?;
    Ok(creation_response(outcome))
}

async fn copy_quote(
    State(state): State<ApiState>,
    Path(quote_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let correlation_id = correlation_id(&headers);
    let user = acting_user(&headers, &correlation_id)?;

    let outcome = state
        .lifecycle
        .copy_quote(user, QuoteId(quote_id), &audit_context(&correlation_id, Some(user)))
        .await
        .map_err(|error| lifecycle_error(error, &correlation_id))?;
    Ok(creation_response(outcome))
}

async fn update_quote(
    State(state): State<ApiState>,
    Path(quote_id): Path<i64>,
    headers: HeaderMap,
    Json(draft): Json<QuoteDraft>,
) -> ApiResult<Response> {
    let correlation_id = correlation_id(&headers);
    let user = acting_user(&headers, &correlation_id).ok();

    let quote = state
        .lifecycle
        .update_quote(QuoteId(quote_id), draft, &audit_context(&correlation_id, user))
        .await
        .map_err(|error| lifecycle_error(error, &correlation_id))?;
    Ok(Json(quote).into_response())
}

async fn change_status(
    State(state): State<ApiState>,
    Path(quote_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_id(&headers);
    let user = acting_user(&headers, &correlation_id).ok();

    let context = audit_context(&correlation_id, user);
    let quote = state
        .lifecycle
        .change_status(QuoteId(quote_id), request.status_id, &context)
        .await
        .map_err(|error| lifecycle_error(error, &correlation_id))?;
    Ok(Json(quote).into_response())
}

async fn dispatch_quote(
    State(state): State<ApiState>,
    Path(quote_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<DispatchBody>,
) -> Response {
    let correlation_id = correlation_id(&headers);
    let user = acting_user(&headers, &correlation_id).ok();
    let request = DispatchRequest {
        dispatch_id: body.dispatch_id,
        quote_id: QuoteId(quote_id),
        status_id: body.status_id,
        sms: body.sms,
        email: body.email,
    };

    match state.dispatcher.dispatch(request, &audit_context(&correlation_id, user)).await {
        Ok(report) => Json(report).into_response(),
        Err(failure) => {
            let status = match failure.error {
                DispatchError::Validation { .. } => StatusCode::BAD_REQUEST,
                DispatchError::Preparation { .. } | DispatchError::StepFailed { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            };
            (status, Json(failure)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use chrono::{Duration, Utc};
    use leadquote_core::audit::InMemoryAuditSink;
    use leadquote_core::config::AppConfig;
    use leadquote_core::domain::lead::{Lead, LeadId};
    use leadquote_core::domain::plan::{Plan, ResourceKind};
    use leadquote_core::domain::quote::{Quote, QuoteId, ServiceLineItem, UserId};
    use leadquote_core::domain::status::StatusId;
    use leadquote_core::ports::CollaboratorError;
    use leadquote_db::repositories::MemoryCollaborators;
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState, USER_HEADER};

    async fn setup(limit: u32) -> (MemoryCollaborators, Router) {
        let start = Utc::now() - Duration::days(10);
        let memory = MemoryCollaborators::with_plan(
            Plan::new(Some(start)).with_limit(ResourceKind::Offers, limit),
        );
        memory
            .leads
            .insert(Lead {
                id: LeadId(7),
                user_id: UserId(1),
                name: "Ada Larsen".to_string(),
                email: Some("ada@example.com".to_string()),
                phone: Some("+4512345678".to_string()),
                status_id: None,
                created_at: start,
            })
            .await;
        memory
            .quotes
            .insert(Quote {
                id: QuoteId(1),
                lead_id: LeadId(7),
                user_id: UserId(1),
                title: "Roof repair".to_string(),
                description: String::new(),
                valid_days: 30,
                overall_discount_percent: Decimal::from(10),
                terms: String::new(),
                services: vec![ServiceLineItem::new(
                    "Visit",
                    Decimal::from(2),
                    Decimal::from(50),
                    Decimal::ZERO,
                )],
                pricing_template_id: None,
                status_id: StatusId(1),
                total: Decimal::from(90),
                created_at: start + Duration::days(1),
                updated_at: start + Duration::days(1),
            })
            .await;
        memory.variables.set("company", "Acme Roofing").await;

        let state = ApiState::new(
            &memory.collaborators(),
            &AppConfig::default(),
            Arc::new(InMemoryAuditSink::default()),
        );
        (memory, router(state))
    }

    async fn call(
        app: Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-correlation-id", "req-test");
        if let Some(user) = user {
            request = request.header(USER_HEADER, user);
        }
        let request = request.body(Body::from(body.to_string())).expect("request");

        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn decimal(value: &Value) -> Decimal {
        value.as_str().expect("decimal as string").parse().expect("decimal")
    }

    #[tokio::test]
    async fn pricing_preview_applies_line_and_overall_discounts() {
        let (_, app) = setup(5).await;
        let line = json!({ "name": "Crew hour", "quantity": "3", "unit_price": "100",
                           "discount_percent": "10" });

        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/pricing/preview",
            None,
            json!({ "services": [line.clone()], "pending": line, "overall_discount_percent": "5" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending_included"], true);
        assert_eq!(decimal(&body["breakdown"]["subtotal"]), Decimal::from(540));
        assert_eq!(decimal(&body["breakdown"]["total"]), Decimal::from(513));
    }

    #[tokio::test]
    async fn message_preview_resolves_tokens_and_counts_segments() {
        let (_, app) = setup(5).await;

        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/messages/preview",
            None,
            json!({ "text": "{{company}} sent quote :quoteId {{unknown}}", "quote_id": 1 }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "Acme Roofing sent quote 1 {{unknown}}");
        assert_eq!(body["unresolved"], json!(["{{unknown}}"]));
        assert_eq!(body["segmentation"]["segments"], 1);
    }

    #[tokio::test]
    async fn copy_returns_created_quote_with_prefixed_title() {
        let (memory, app) = setup(5).await;

        let (status, body) =
            call(app, Method::POST, "/api/v1/quotes/1/copy", Some("1"), Value::Null).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["title"], "Copy of Roof repair");
        assert_eq!(decimal(&body["total"]), Decimal::from(90));
        assert_eq!(memory.quotes.all().await.len(), 2);
    }

    #[tokio::test]
    async fn creation_at_the_limit_answers_payment_required() {
        let (memory, app) = setup(1).await;

        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/leads/7/quotes",
            Some("1"),
            json!({ "quote": { "title": "Gutter cleaning" } }),
        )
        .await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body, json!({ "usage": 1, "total_allowed": 1, "reason": "limit_reached" }));
        assert_eq!(memory.quotes.all().await.len(), 1);
    }

    #[tokio::test]
    async fn creation_requires_the_acting_user() {
        let (_, app) = setup(5).await;

        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/leads/7/quotes",
            None,
            json!({ "quote": { "title": "Gutter cleaning" } }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["correlation_id"], "req-test");
    }

    #[tokio::test]
    async fn invalid_form_and_unknown_status_are_bad_requests() {
        let (_, app) = setup(5).await;

        let (status, body) = call(
            app.clone(),
            Method::POST,
            "/api/v1/leads/7/quotes",
            Some("1"),
            json!({ "quote": { "title": "  " } }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "quote title is required");

        let (status, _) = call(
            app,
            Method::PUT,
            "/api/v1/quotes/1/status",
            Some("1"),
            json!({ "status_id": 10 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_quote_is_not_found() {
        let (_, app) = setup(5).await;

        let (status, _) =
            call(app, Method::POST, "/api/v1/quotes/99/copy", Some("1"), Value::Null).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_dispatch_answers_bad_gateway_with_completed_steps() {
        let (memory, app) = setup(5).await;
        memory.email.fail_with(CollaboratorError::unavailable("email", "relay down")).await;

        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/quotes/1/dispatch",
            Some("1"),
            json!({
                "dispatch_id": "dsp-api",
                "status_id": 2,
                "sms": { "message": "Your quote :quoteId is ready" },
                "email": { "subject": "Quote :quoteId", "body": "Regards, {{company}}" }
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["dialog"], "keep_open");
        assert_eq!(body["error"]["kind"], "step_failed");
        assert_eq!(body["error"]["step"], "email");
        assert_eq!(body["completed"].as_array().map(Vec::len), Some(2));
        assert_eq!(memory.sms.sent().await.len(), 1);
    }
}
