//! Recognizing "your token is no longer valid" in provider error responses.
//!
//! Providers report a revoked or reset session in different shapes: a bare
//! 401, a 400 with a single error object, or a 400 with a list of error
//! objects. [`ErrorBody`] normalizes those shapes so the predicate below
//! never has to know which HTTP client produced them.

use serde_json::Value;

/// Session-error codes recognized for any provider.
pub const KNOWN_SESSION_CODES: &[&str] = &[
    "INVALID_SESSION_ID",
    "INVALID_AUTH_HEADER",
    "EXPIRED_AUTHENTICATION",
    "INVALID_AUTHENTICATION",
];

/// Message fragments that mark a 400 as token related.
const SESSION_MESSAGE_SIGNALS: &[&str] = &["session expired", "invalid", "token", "unauthorized"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorEntry {
    pub message: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub entries: Vec<ErrorEntry>,
}

impl ErrorBody {
    /// Parse a raw response body. Non-JSON bodies become a single entry
    /// carrying the text as its message.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self {
                entries: vec![ErrorEntry {
                    message: Some(trimmed.to_string()),
                    code: None,
                }],
            },
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let mut entries = Vec::new();
        collect_entries(value, &mut entries);
        Self { entries }
    }
}

fn collect_entries(value: &Value, out: &mut Vec<ErrorEntry>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_entries(item, out);
            }
        }
        Value::Object(map) => {
            let message = ["message", "error_description"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string);
            // HubSpot OAuth rejections carry the code in "status"; its API
            // errors use the literal "error" there.
            let code = ["errorCode", "error_code", "category", "error", "code"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .or_else(|| {
                    map.get("status")
                        .and_then(Value::as_str)
                        .filter(|s| !s.eq_ignore_ascii_case("error"))
                })
                .map(str::to_string);
            if message.is_some() || code.is_some() {
                out.push(ErrorEntry { message, code });
            }
            // HubSpot nests per-field failures under "errors".
            if let Some(nested) = map.get("errors") {
                collect_entries(nested, out);
            }
        }
        Value::String(s) => out.push(ErrorEntry {
            message: Some(s.clone()),
            code: None,
        }),
        _ => {}
    }
}

/// True when a failed provider response means the access token itself was
/// rejected, recognizing every code in [`KNOWN_SESSION_CODES`].
pub fn is_session_error(status: u16, body: &ErrorBody) -> bool {
    is_session_error_with(status, body, KNOWN_SESSION_CODES)
}

/// Same as [`is_session_error`] with an explicit list of session-error codes.
pub fn is_session_error_with(status: u16, body: &ErrorBody, codes: &[&str]) -> bool {
    match status {
        401 => true,
        400 => body.entries.iter().any(|entry| entry_signals_session(entry, codes)),
        _ => false,
    }
}

fn entry_signals_session(entry: &ErrorEntry, codes: &[&str]) -> bool {
    let code_hit = entry
        .code
        .as_deref()
        .is_some_and(|code| codes.iter().any(|c| c.eq_ignore_ascii_case(code)));
    if code_hit {
        return true;
    }
    entry.message.as_deref().is_some_and(|message| {
        let lowered = message.to_lowercase();
        SESSION_MESSAGE_SIGNALS.iter().any(|s| lowered.contains(s))
    })
}
