//! Inbound requests and outbound events carried in frames.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vidcap_frame::FrameError;

pub const ACTION_DOWNLOAD: &str = "DOWNLOAD";
pub const ACTION_PING: &str = "PING";

/// A decoded inbound message, routed by its `action` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Download(Map<String, Value>),
    Ping,
    /// Missing, non-string, or unknown `action`.
    Unrecognized(Option<String>),
}

impl Request {
    /// Classify a decoded payload. Anything but a JSON object is a protocol error.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let fields = match value {
            Value::Object(fields) => fields,
            other => return Err(ProtocolError::NotAnObject(json_kind(&other))),
        };

        let request = match fields.get("action").and_then(Value::as_str) {
            Some(ACTION_DOWNLOAD) => Request::Download(fields),
            Some(ACTION_PING) => Request::Ping,
            Some(other) => Request::Unrecognized(Some(other.to_string())),
            None => Request::Unrecognized(None),
        };
        Ok(request)
    }
}

/// Parameters of a `DOWNLOAD` request, before sanitizing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, Value>>,
}

impl DownloadRequest {
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, InvalidRequest> {
        let request: DownloadRequest = serde_json::from_value(Value::Object(fields))?;
        if request.url.trim().is_empty() {
            return Err(InvalidRequest::EmptyUrl);
        }
        Ok(request)
    }

    /// Look up a header by its exact name, ignoring non-string and empty values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .get(name)?
            .as_str()
            .filter(|value| !value.is_empty())
    }
}

/// A `DOWNLOAD` request that cannot become a job.
#[derive(Debug, thiserror::Error)]
pub enum InvalidRequest {
    #[error("invalid DOWNLOAD request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid DOWNLOAD request: url must not be empty")]
    EmptyUrl,
}

/// Errors that leave the inbound channel untrustworthy.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Per-job and per-request status reported to the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusEvent {
    Starting { file: String },
    Complete { file: String },
    Error { error: String },
    Pong,
}

/// Top-level payload sent once before shutting down on a protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelError {
    pub error: String,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
