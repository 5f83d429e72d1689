pub mod config;
pub mod doctor;
pub mod migrate;
pub mod preview;
pub mod price;
pub mod quota;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::outcome(command, "ok", None, message.into(), None, 0)
    }

    pub fn success_with(
        command: &str,
        message: impl Into<String>,
        details: &impl Serialize,
    ) -> Self {
        Self::outcome(command, "ok", None, message.into(), to_details(details), 0)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::outcome(command, "error", Some(error_class), message.into(), None, exit_code)
    }

    pub fn failure_with(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        details: &impl Serialize,
        exit_code: u8,
    ) -> Self {
        Self::outcome(
            command,
            "error",
            Some(error_class),
            message.into(),
            to_details(details),
            exit_code,
        )
    }

    fn outcome(
        command: &str,
        status: &str,
        error_class: Option<&str>,
        message: String,
        details: Option<Value>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: status.to_string(),
            error_class: error_class.map(str::to_string),
            message,
            details,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn to_details(details: &impl Serialize) -> Option<Value> {
    serde_json::to_value(details).ok()
}

/// Reads and decodes a JSON input document. Failures come back as a ready
/// `CommandResult` with exit code 2.
pub(crate) fn read_input<T: DeserializeOwned>(
    command: &str,
    path: &Path,
) -> Result<T, CommandResult> {
    let raw = fs::read_to_string(path).map_err(|error| {
        CommandResult::failure(
            command,
            "input_read",
            format!("could not read `{}`: {error}", path.display()),
            2,
        )
    })?;
    serde_json::from_str(&raw).map_err(|error| {
        CommandResult::failure(
            command,
            "input_parse",
            format!("`{}` is not a valid input document: {error}", path.display()),
            2,
        )
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
