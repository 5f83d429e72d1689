use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use leadquote_cli::commands::{config, doctor, migrate, preview, price, quota};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("LEADQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("LEADQUOTE_DATABASE_URL", "postgres://localhost/leadquote")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_reports_missing_gateways() {
    with_env(&[("LEADQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");

        assert_eq!(report["overall_status"], "fail");
        let checks = report["checks"].as_array().expect("checks");
        let gateways = checks
            .iter()
            .find(|check| check["name"] == "messaging_gateways")
            .expect("gateway check");
        assert_eq!(gateways["status"], "fail");
        assert!(gateways["details"].as_str().unwrap_or("").contains("sms_gateway_url"));
    });
}

#[test]
fn doctor_passes_with_gateways_and_reachable_ledger() {
    with_env(
        &[
            ("LEADQUOTE_DATABASE_URL", "sqlite::memory:"),
            ("LEADQUOTE_MESSAGING_SMS_GATEWAY_URL", "https://sms.example.test/send"),
            ("LEADQUOTE_MESSAGING_EMAIL_GATEWAY_URL", "https://mail.example.test/send"),
        ],
        || {
            let report: Value =
                serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");
            assert_eq!(report["overall_status"], "pass");

            let human = doctor::run(false);
            assert!(human.contains("- [ok] dispatch_ledger"));
        },
    );
}

#[test]
fn config_attributes_env_sources_and_redacts_secrets() {
    with_env(
        &[
            ("LEADQUOTE_DATABASE_URL", "sqlite::memory:"),
            ("LEADQUOTE_BACKEND_API_TOKEN", "live-backend-token"),
        ],
        || {
            let output = config::run();

            let database_line =
                "- database.url = sqlite::memory: (source: env (LEADQUOTE_DATABASE_URL))";
            assert!(output.contains(database_line));
            assert!(output.contains("- backend.api_token = <redacted>"));
            assert!(!output.contains("live-backend-token"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
        },
    );
}

#[test]
fn price_includes_a_valid_pending_line() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_input(
        &dir,
        "quote.json",
        r#"{
            "services": [
                { "name": "Visit", "quantity": "2", "unit_price": "50", "discount_percent": "10" }
            ],
            "overall_discount_percent": "10",
            "pending": { "name": "Gutter", "quantity": "1", "unit_price": "10" }
        }"#,
    );

    let result = price::run(&path);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["pending_included"], true);
    assert_eq!(decimal(&payload["details"]["breakdown"]["subtotal"]), Decimal::from(100));
    assert_eq!(decimal(&payload["details"]["snapshot_total"]), Decimal::from(90));
}

#[test]
fn price_ignores_an_invalid_pending_line() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_input(
        &dir,
        "quote.json",
        r#"{
            "services": [{ "name": "Visit", "quantity": "1", "unit_price": "80" }],
            "pending": { "name": "Typing", "quantity": "0", "unit_price": "10" }
        }"#,
    );

    let payload = parse_payload(&price::run(&path).output);

    assert_eq!(payload["details"]["pending_included"], false);
    assert_eq!(decimal(&payload["details"]["snapshot_total"]), Decimal::from(80));
    assert!(payload["message"].as_str().unwrap_or("").contains("pending line ignored"));
}

#[test]
fn price_rejects_an_out_of_range_overall_discount() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_input(
        &dir,
        "quote.json",
        r#"{ "services": [], "overall_discount_percent": "120" }"#,
    );

    let result = price::run(&path);

    assert_eq!(result.exit_code, 3);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["error_class"], "pricing_validation");
}

#[test]
fn price_reports_unreadable_input() {
    let dir = TempDir::new().expect("temp dir");

    let missing = price::run(&dir.path().join("absent.json"));
    assert_eq!(missing.exit_code, 2);
    assert_eq!(parse_payload(&missing.output)["error_class"], "input_read");

    let garbled = write_input(&dir, "garbled.json", "{ services: ");
    let result = price::run(&garbled);
    assert_eq!(result.exit_code, 2);
    assert_eq!(parse_payload(&result.output)["error_class"], "input_parse");
}

#[test]
fn preview_resolves_tokens_and_counts_sms_parts() {
    let dir = TempDir::new().expect("temp dir");
    let path = write_input(
        &dir,
        "message.json",
        r#"{
            "message": "Hi from {{company}}, quote :quoteId is ready. {{signoff}}",
            "variables": { "company": "Acme Roofing" },
            "quote_id": 12
        }"#,
    );

    let result = preview::run(&path);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    let details = &payload["details"];
    assert_eq!(details["text"], "Hi from Acme Roofing, quote 12 is ready. {{signoff}}");
    assert_eq!(details["unresolved"], serde_json::json!(["{{signoff}}"]));
    assert_eq!(details["sms"]["segments"], 1);
}

#[test]
fn quota_allows_below_the_limit() {
    let result = quota::run(Some(10), 9, true);

    assert_eq!(result.exit_code, 0);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["details"]["decision"], "allowed");
}

#[test]
fn quota_blocks_at_the_limit_and_without_plan_start() {
    let at_limit = parse_payload(&quota::run(Some(10), 10, true).output);
    assert_eq!(at_limit["error_class"], "quota_blocked");
    assert_eq!(at_limit["details"]["reason"], "limit_reached");
    assert_eq!(at_limit["details"]["total_allowed"], 10);

    let no_start = quota::run(Some(10), 0, false);
    assert_eq!(no_start.exit_code, 1);
    assert_eq!(parse_payload(&no_start.output)["details"]["reason"], "missing_plan_start");

    let no_limit = parse_payload(&quota::run(None, 0, true).output);
    assert_eq!(no_limit["details"]["reason"], "missing_limit");
}

fn write_input(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write input");
    path
}

fn decimal(value: &Value) -> Decimal {
    value.as_str().expect("decimal string").parse().expect("decimal")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADQUOTE_DATABASE_URL",
        "LEADQUOTE_DATABASE_MAX_CONNECTIONS",
        "LEADQUOTE_DATABASE_TIMEOUT_SECS",
        "LEADQUOTE_BACKEND_BASE_URL",
        "LEADQUOTE_BACKEND_API_TOKEN",
        "LEADQUOTE_BACKEND_TIMEOUT_SECS",
        "LEADQUOTE_MESSAGING_SMS_GATEWAY_URL",
        "LEADQUOTE_MESSAGING_EMAIL_GATEWAY_URL",
        "LEADQUOTE_MESSAGING_GATEWAY_API_KEY",
        "LEADQUOTE_MESSAGING_DEFAULT_SENDER_NAME",
        "LEADQUOTE_MESSAGING_TIMEOUT_SECS",
        "LEADQUOTE_QUOTES_COPY_TITLE_PREFIX",
        "LEADQUOTE_SERVER_BIND_ADDRESS",
        "LEADQUOTE_SERVER_PORT",
        "LEADQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEADQUOTE_LOGGING_LEVEL",
        "LEADQUOTE_LOGGING_FORMAT",
        "LEADQUOTE_LOG_LEVEL",
        "LEADQUOTE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
