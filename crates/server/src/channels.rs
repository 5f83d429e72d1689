//! HTTP gateways behind the SMS and email channels.

use std::time::Duration;

use async_trait::async_trait;
use leadquote_core::config::MessagingConfig;
use leadquote_core::ports::{
    Ack, AttachmentRef, CollaboratorError, CollaboratorResult, EmailChannel, EmailSend,
    SmsChannel, SmsSend,
};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize)]
struct SmsGatewayRequest<'a> {
    to: String,
    from: &'a str,
    message: &'a str,
    reference: String,
}

#[derive(Debug, Serialize)]
struct EmailGatewayRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    attachments: &'a [AttachmentRef],
    reference: String,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Endpoint plus credentials shared by both gateways.
#[derive(Clone)]
struct Gateway {
    client: Client,
    url: Option<String>,
    api_key: Option<SecretString>,
}

impl Gateway {
    async fn post<T: Serialize>(
        &self,
        collaborator: &'static str,
        payload: &T,
    ) -> CollaboratorResult<Ack> {
        let url = self.url.as_deref().ok_or_else(|| {
            CollaboratorError::rejected(collaborator, "no gateway url is configured")
        })?;

        let mut builder = self.client.post(url).json(payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            CollaboratorError::unavailable(collaborator, format!("gateway unreachable: {error}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("gateway returned {status}: {}", body.trim());
            return Err(if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                CollaboratorError::rejected(collaborator, message)
            } else {
                CollaboratorError::unavailable(collaborator, message)
            });
        }

        // Some gateways answer 202 with an empty body.
        let body = response.text().await.unwrap_or_default();
        let parsed = if body.trim().is_empty() {
            GatewayResponse::default()
        } else {
            serde_json::from_str::<GatewayResponse>(&body).map_err(|error| {
                CollaboratorError::unavailable(
                    collaborator,
                    format!("could not decode gateway response: {error}"),
                )
            })?
        };
        Ok(Ack { provider_id: parsed.id })
    }
}

fn gateway_client(config: &MessagingConfig) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()
}

/// Keeps digits and a leading `+`. Returns `None` when no digit is left.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(char::is_ascii_digit));

    if normalized.trim_start_matches('+').is_empty() {
        None
    } else {
        Some(normalized)
    }
}

#[derive(Clone)]
pub struct HttpSmsGateway {
    gateway: Gateway,
}

impl HttpSmsGateway {
    pub fn new(config: &MessagingConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(gateway_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &MessagingConfig) -> Self {
        Self {
            gateway: Gateway {
                client,
                url: config.sms_gateway_url.clone(),
                api_key: config.gateway_api_key.clone(),
            },
        }
    }
}

#[async_trait]
impl SmsChannel for HttpSmsGateway {
    async fn send(&self, sms: SmsSend) -> CollaboratorResult<Ack> {
        let to = normalize_phone(&sms.recipient_phone).ok_or_else(|| {
            CollaboratorError::rejected(
                "sms",
                format!("`{}` is not a usable phone number", sms.recipient_phone),
            )
        })?;

        let payload = SmsGatewayRequest {
            to,
            from: &sms.sender_name,
            message: &sms.message,
            reference: format!("quote-{}", sms.quote_id),
        };
        let ack = self.gateway.post("sms", &payload).await?;

        info!(
            event_name = "messaging.sms_sent",
            quote_id = %sms.quote_id,
            provider_id = ack.provider_id.as_deref().unwrap_or("none"),
            "sms accepted by gateway"
        );
        Ok(ack)
    }
}

#[derive(Clone)]
pub struct HttpEmailGateway {
    gateway: Gateway,
}

impl HttpEmailGateway {
    pub fn new(config: &MessagingConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(gateway_client(config)?, config))
    }

    pub fn with_client(client: Client, config: &MessagingConfig) -> Self {
        Self {
            gateway: Gateway {
                client,
                url: config.email_gateway_url.clone(),
                api_key: config.gateway_api_key.clone(),
            },
        }
    }
}

#[async_trait]
impl EmailChannel for HttpEmailGateway {
    async fn send(&self, email: EmailSend) -> CollaboratorResult<Ack> {
        let payload = EmailGatewayRequest {
            to: email.recipient_email.trim(),
            subject: &email.subject,
            body: &email.body,
            attachments: &email.attachments,
            reference: format!("quote-{}", email.quote_id),
        };
        let ack = self.gateway.post("email", &payload).await?;

        info!(
            event_name = "messaging.email_sent",
            quote_id = %email.quote_id,
            provider_id = ack.provider_id.as_deref().unwrap_or("none"),
            attachments = email.attachments.len(),
            "email accepted by gateway"
        );
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use leadquote_core::config::MessagingConfig;
    use leadquote_core::domain::quote::QuoteId;
    use leadquote_core::ports::{
        CollaboratorErrorKind, EmailChannel, EmailSend, SmsChannel, SmsSend,
    };
    use serde_json::{json, Value};

    use super::{normalize_phone, HttpEmailGateway, HttpSmsGateway};

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn accept(State(received): State<Received>, Json(body): Json<Value>) -> Json<Value> {
        received.lock().expect("lock").push(body);
        Json(json!({ "id": "gw-1" }))
    }

    async fn fail() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "relay down")
    }

    async fn spawn_gateway(received: Received) -> String {
        let router = Router::new()
            .route("/sms", post(accept))
            .route("/email", post(fail))
            .with_state(received);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("fake gateway");
        });
        format!("http://{address}")
    }

    fn messaging(base: Option<&str>) -> MessagingConfig {
        MessagingConfig {
            sms_gateway_url: base.map(|base| format!("{base}/sms")),
            email_gateway_url: base.map(|base| format!("{base}/email")),
            gateway_api_key: Some("gw-key".to_string().into()),
            default_sender_name: "Leadquote".to_string(),
            timeout_secs: 5,
        }
    }

    fn sms(phone: &str) -> SmsSend {
        SmsSend {
            quote_id: QuoteId(12),
            recipient_phone: phone.to_string(),
            sender_name: "Acme".to_string(),
            message: "Your quote is ready".to_string(),
            template_id: None,
        }
    }

    #[test]
    fn phone_numbers_are_reduced_to_digits_and_leading_plus() {
        assert_eq!(normalize_phone(" +45 12-34 56 78 ").as_deref(), Some("+4512345678"));
        assert_eq!(normalize_phone("(030) 1234").as_deref(), Some("0301234"));
        assert_eq!(normalize_phone("12+34").as_deref(), Some("1234"));
        assert_eq!(normalize_phone("+"), None);
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[tokio::test]
    async fn sms_is_posted_with_normalized_recipient() {
        let received = Received::default();
        let base = spawn_gateway(received.clone()).await;
        let gateway = HttpSmsGateway::new(&messaging(Some(&base))).expect("gateway");

        let ack = gateway.send(sms("+45 1234 5678")).await.expect("sent");

        assert_eq!(ack.provider_id.as_deref(), Some("gw-1"));
        let bodies = received.lock().expect("lock").clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["to"], "+4512345678");
        assert_eq!(bodies[0]["from"], "Acme");
        assert_eq!(bodies[0]["reference"], "quote-12");
    }

    #[tokio::test]
    async fn unusable_phone_is_rejected_before_any_request() {
        let gateway =
            HttpSmsGateway::new(&messaging(Some("http://127.0.0.1:9"))).expect("gateway");

        let error = gateway.send(sms("unknown")).await.expect_err("no digits");

        assert_eq!(error.kind, CollaboratorErrorKind::Rejected);
    }

    #[tokio::test]
    async fn unconfigured_gateway_rejects_sends() {
        let gateway = HttpSmsGateway::new(&messaging(None)).expect("gateway");

        let error = gateway.send(sms("+4512345678")).await.expect_err("no url");

        assert_eq!(error.kind, CollaboratorErrorKind::Rejected);
        assert!(error.message.contains("no gateway url"));
    }

    #[tokio::test]
    async fn server_errors_from_the_gateway_are_retryable_failures() {
        let base = spawn_gateway(Received::default()).await;
        let gateway = HttpEmailGateway::new(&messaging(Some(&base))).expect("gateway");

        let error = gateway
            .send(EmailSend {
                quote_id: QuoteId(12),
                recipient_email: "ada@example.com".to_string(),
                subject: "Quote 12".to_string(),
                body: "See attached".to_string(),
                attachments: Vec::new(),
                template_id: None,
            })
            .await
            .expect_err("gateway fails");

        assert_eq!(error.kind, CollaboratorErrorKind::Unavailable);
        assert!(error.message.contains("relay down"));
    }
}
