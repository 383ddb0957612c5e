use std::fmt;

use serde_json::{Map, Value};

pub const FAIL_CODE_RELOGIN: i64 = 305;
pub const FAIL_CODE_RATE_LIMIT: i64 = 407;
pub const RELOGIN_MESSAGE: &str = "USER_MUST_RELOGIN";
pub const RATE_LIMIT_MESSAGE: &str = "ACCESS_FREQUENCY_IS_TOO_HIGH";

const SUMMARY_CHARS: usize = 600;

/// Business-level response body: `{success, failCode?, message?, data}`.
///
/// Deployments disagree on field types (numbers vs strings), so the body is
/// kept as raw JSON and read through tolerant accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEnvelope(Value);

impl ApiEnvelope {
    pub fn new(body: Value) -> Self {
        Self(body)
    }

    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn is_success(&self) -> bool {
        match self.0.get("success") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn fail_code(&self) -> Option<i64> {
        match self.0.get("failCode")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Value> {
        self.0.get("data").filter(|v| !v.is_null())
    }

    /// Vendor says the session is gone and a fresh login is needed.
    pub fn requires_relogin(&self) -> bool {
        self.fail_code() == Some(FAIL_CODE_RELOGIN) || self.message() == Some(RELOGIN_MESSAGE)
    }

    /// Vendor rejected the call for exceeding its per-client request budget.
    pub fn is_rate_limited(&self) -> bool {
        self.fail_code() == Some(FAIL_CODE_RATE_LIMIT)
            || self.data().and_then(Value::as_str) == Some(RATE_LIMIT_MESSAGE)
            || self.message() == Some(RATE_LIMIT_MESSAGE)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Compact, length-capped rendering for log lines.
    pub fn summary(&self) -> String {
        let rendered = self.0.to_string();
        if rendered.chars().count() <= SUMMARY_CHARS {
            return rendered;
        }
        let mut cut: String = rendered.chars().take(SUMMARY_CHARS).collect();
        cut.push('…');
        cut
    }
}

impl fmt::Display for ApiEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
