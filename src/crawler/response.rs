//! Fetch results
//!
//! A [`FetchResponse`] is produced for every logical request, whether or not
//! any attempt reached the server. It serializes to the snapshot entry format.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Why the final attempt of a request did not produce a clean response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FetchFailure {
    /// The attempt exceeded the per-attempt timeout
    Timeout,
    /// The connection could not be established
    Connect,
    /// Any other transport-level failure
    Request,
    /// A proxy client could not be built
    Proxy,
    /// The body did not match its declared JSON content type
    Decode,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "Timeout",
            Self::Connect => "Connect",
            Self::Request => "Request",
            Self::Proxy => "Proxy",
            Self::Decode => "Decode",
        };
        f.write_str(name)
    }
}

impl From<&reqwest::Error> for FetchFailure {
    fn from(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else {
            Self::Request
        }
    }
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

/// Outcome of one logical GET, after retries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    /// Requested URL with query parameters applied
    pub url: String,

    pub request_params: BTreeMap<String, String>,

    pub request_headers: BTreeMap<String, String>,

    /// Start of the final attempt
    pub requested_at: DateTime<Utc>,

    /// Seconds taken by the final attempt, when it got a response
    pub response_time: Option<f64>,

    /// Response headers with sensitive entries removed
    pub response_headers: BTreeMap<String, String>,

    /// `None` when no attempt got an HTTP response
    pub status_code: Option<u16>,

    #[serde(rename = "exception")]
    pub failure: Option<FetchFailure>,

    pub body: Option<ResponseBody>,
}

impl FetchResponse {
    /// True for HTTP 200 only
    pub fn is_success(&self) -> bool {
        self.status_code == Some(200)
    }

    /// The body, when it decoded as JSON
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            Some(ResponseBody::Json(value)) => Some(value),
            _ => None,
        }
    }

    /// Short status description for log lines
    pub fn status_label(&self) -> String {
        match (self.status_code, self.failure) {
            (Some(status), _) => status.to_string(),
            (None, Some(failure)) => failure.to_string(),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Whether a lowercase Content-Type value declares JSON
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence == "application/json" || essence.ends_with("+json")
}

/// Decodes a body according to its declared content type
///
/// JSON content types are parsed; anything else is kept as text. A JSON body
/// that fails to parse is kept as text and reported as [`FetchFailure::Decode`].
pub fn decode_body(content_type: &str, bytes: &[u8]) -> (ResponseBody, Option<FetchFailure>) {
    if is_json_content_type(content_type) {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => (ResponseBody::Json(value), None),
            Err(_) => (
                ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()),
                Some(FetchFailure::Decode),
            ),
        }
    } else {
        (
            ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()),
            None,
        )
    }
}

/// Drops headers whose lowercase name is in `sensitive`
pub fn sanitize_headers(
    headers: BTreeMap<String, String>,
    sensitive: &HashSet<String>,
) -> BTreeMap<String, String> {
    headers
        .into_iter()
        .filter(|(name, _)| !sensitive.contains(&name.to_lowercase()))
        .collect()
}
