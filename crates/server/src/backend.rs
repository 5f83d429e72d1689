//! REST client for the backend that owns leads, quotes, templates, statuses,
//! account variables and the subscription plan. Payloads use the same JSON
//! shape as the core domain types.

use std::time::Duration;

use async_trait::async_trait;
use leadquote_core::config::BackendConfig;
use leadquote_core::domain::lead::{Lead, LeadId, LeadPatch};
use leadquote_core::domain::plan::Plan;
use leadquote_core::domain::quote::{NewQuote, Quote, QuoteId, QuotePatch};
use leadquote_core::domain::status::Status;
use leadquote_core::domain::template::{MessageTemplate, PricingTemplate};
use leadquote_core::domain::variable::Variable;
use leadquote_core::ports::{
    CollaboratorError, CollaboratorResult, LeadStore, MessageTemplateStore, PlanProvider,
    PricingTemplateStore, QuoteStore, StatusStore, VariableStore,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::warn;

pub struct BackendClient {
    client: Client,
    base_url: String,
    api_token: Option<SecretString>,
    /// Plan figures are fetched once and kept until `refresh`.
    plan_cache: RwLock<Option<Plan>>,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &BackendConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            plan_cache: RwLock::new(None),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        collaborator: &'static str,
        builder: RequestBuilder,
    ) -> CollaboratorResult<T> {
        let response = builder.send().await.map_err(|error| {
            warn!(
                event_name = "backend.request_failed",
                collaborator,
                error = %error,
                "backend request could not be sent"
            );
            CollaboratorError::unavailable(collaborator, format!("request failed: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "backend.request_rejected",
                collaborator,
                status = %status,
                "backend returned an error status"
            );
            return Err(status_error(collaborator, status, &body));
        }

        response.json::<T>().await.map_err(|error| {
            CollaboratorError::unavailable(
                collaborator,
                format!("could not decode response: {error}"),
            )
        })
    }
}

fn status_error(collaborator: &'static str, status: StatusCode, body: &str) -> CollaboratorError {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("backend returned {status}")
    } else {
        format!("backend returned {status}: {body}")
    };
    if status == StatusCode::NOT_FOUND {
        CollaboratorError::not_found(collaborator, message)
    } else if status.is_client_error() {
        CollaboratorError::rejected(collaborator, message)
    } else {
        CollaboratorError::unavailable(collaborator, message)
    }
}

#[async_trait]
impl LeadStore for BackendClient {
    async fn get(&self, id: LeadId) -> CollaboratorResult<Lead> {
        self.fetch("leads", self.request(Method::GET, &format!("leads/{id}"))).await
    }

    async fn update(&self, id: LeadId, patch: LeadPatch) -> CollaboratorResult<Lead> {
        let builder = self.request(Method::PATCH, &format!("leads/{id}")).json(&patch);
        self.fetch("leads", builder).await
    }
}

#[async_trait]
impl QuoteStore for BackendClient {
    async fn list(&self, lead_id: Option<LeadId>) -> CollaboratorResult<Vec<Quote>> {
        let mut builder = self.request(Method::GET, "quotes");
        if let Some(lead_id) = lead_id {
            builder = builder.query(&[("lead_id", lead_id.0)]);
        }
        self.fetch("quotes", builder).await
    }

    async fn get(&self, id: QuoteId) -> CollaboratorResult<Quote> {
        self.fetch("quotes", self.request(Method::GET, &format!("quotes/{id}"))).await
    }

    async fn create(&self, quote: NewQuote) -> CollaboratorResult<Quote> {
        self.fetch("quotes", self.request(Method::POST, "quotes").json(&quote)).await
    }

    async fn update(&self, id: QuoteId, patch: QuotePatch) -> CollaboratorResult<Quote> {
        let builder = self.request(Method::PATCH, &format!("quotes/{id}")).json(&patch);
        self.fetch("quotes", builder).await
    }
}

#[async_trait]
impl PricingTemplateStore for BackendClient {
    async fn list(&self) -> CollaboratorResult<Vec<PricingTemplate>> {
        self.fetch("pricing_templates", self.request(Method::GET, "pricing-templates")).await
    }
}

#[async_trait]
impl MessageTemplateStore for BackendClient {
    async fn list(&self) -> CollaboratorResult<Vec<MessageTemplate>> {
        self.fetch("message_templates", self.request(Method::GET, "message-templates")).await
    }
}

#[async_trait]
impl StatusStore for BackendClient {
    async fn list(&self) -> CollaboratorResult<Vec<Status>> {
        self.fetch("statuses", self.request(Method::GET, "statuses")).await
    }
}

#[async_trait]
impl VariableStore for BackendClient {
    async fn list(&self) -> CollaboratorResult<Vec<Variable>> {
        self.fetch("variables", self.request(Method::GET, "variables")).await
    }
}

#[async_trait]
impl PlanProvider for BackendClient {
    async fn current_plan(&self) -> CollaboratorResult<Plan> {
        if let Some(plan) = self.plan_cache.read().await.as_ref() {
            return Ok(plan.clone());
        }
        let plan: Plan = self.fetch("plan", self.request(Method::GET, "plan")).await?;
        *self.plan_cache.write().await = Some(plan.clone());
        Ok(plan)
    }

    async fn refresh(&self) -> CollaboratorResult<()> {
        *self.plan_cache.write().await = None;
        Ok(())
    }
}
