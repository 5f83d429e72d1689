use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadquote_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use secrecy::SecretString;
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let database = &config.database;
    let backend = &config.backend;
    let messaging = &config.messaging;
    let server = &config.server;

    vec![
        Field::new("database.url", "LEADQUOTE_DATABASE_URL", database.url.as_str()),
        Field::new(
            "database.max_connections",
            "LEADQUOTE_DATABASE_MAX_CONNECTIONS",
            database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            "LEADQUOTE_DATABASE_TIMEOUT_SECS",
            database.timeout_secs.to_string(),
        ),
        Field::new("backend.base_url", "LEADQUOTE_BACKEND_BASE_URL", backend.base_url.as_str()),
        Field::new(
            "backend.api_token",
            "LEADQUOTE_BACKEND_API_TOKEN",
            redact_secret(backend.api_token.as_ref()),
        ),
        Field::new(
            "backend.timeout_secs",
            "LEADQUOTE_BACKEND_TIMEOUT_SECS",
            backend.timeout_secs.to_string(),
        ),
        Field::new(
            "messaging.sms_gateway_url",
            "LEADQUOTE_MESSAGING_SMS_GATEWAY_URL",
            messaging.sms_gateway_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "messaging.email_gateway_url",
            "LEADQUOTE_MESSAGING_EMAIL_GATEWAY_URL",
            messaging.email_gateway_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "messaging.gateway_api_key",
            "LEADQUOTE_MESSAGING_GATEWAY_API_KEY",
            redact_secret(messaging.gateway_api_key.as_ref()),
        ),
        Field::new(
            "messaging.default_sender_name",
            "LEADQUOTE_MESSAGING_DEFAULT_SENDER_NAME",
            messaging.default_sender_name.as_str(),
        ),
        Field::new(
            "quotes.copy_title_prefix",
            "LEADQUOTE_QUOTES_COPY_TITLE_PREFIX",
            format!("{:?}", config.quotes.copy_title_prefix),
        ),
        Field::new(
            "server.bind_address",
            "LEADQUOTE_SERVER_BIND_ADDRESS",
            server.bind_address.as_str(),
        ),
        Field::new("server.port", "LEADQUOTE_SERVER_PORT", server.port.to_string()),
        Field::new(
            "server.graceful_shutdown_secs",
            "LEADQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS",
            server.graceful_shutdown_secs.to_string(),
        ),
        Field::new("logging.level", "LEADQUOTE_LOGGING_LEVEL", config.logging.level.as_str()),
        Field::new("logging.format", "LEADQUOTE_LOGGING_FORMAT", config.logging.format.as_str()),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}
