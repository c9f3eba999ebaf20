//! What one environment did for one scenario

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Which server an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Legacy,
    Candidate,
}

impl Side {
    /// Lower-case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP status, or the timeout sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservedStatus {
    Code(u16),
    Timeout,
}

impl ObservedStatus {
    /// 2xx
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Code(c) if (200..300).contains(c))
    }

    /// 4xx or 5xx
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Code(c) if *c >= 400)
    }

    /// Status class digit (`4` for 404); `None` for timeouts
    #[inline]
    #[must_use]
    pub fn class(&self) -> Option<u16> {
        match self {
            Self::Code(c) => Some(c / 100),
            Self::Timeout => None,
        }
    }

    /// JSON form used in reports
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Code(c) => Value::from(*c),
            Self::Timeout => Value::String("TIMEOUT".into()),
        }
    }
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => write!(f, "{c}"),
            Self::Timeout => f.write_str("TIMEOUT"),
        }
    }
}

impl Serialize for ObservedStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Code(c) => serializer.serialize_u16(*c),
            Self::Timeout => serializer.serialize_str("TIMEOUT"),
        }
    }
}

impl<'de> Deserialize<'de> for ObservedStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|c| u16::try_from(c).ok())
                .map(Self::Code)
                .ok_or_else(|| serde::de::Error::custom("status out of range")),
            Value::String(s) if s == "TIMEOUT" => Ok(Self::Timeout),
            other => Err(serde::de::Error::custom(format!("invalid status: {other}"))),
        }
    }
}

/// Response payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// JSON view; text bodies become JSON strings
    #[must_use]
    pub fn as_value(&self) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Text(t) => Value::String(t.clone()),
            Self::Empty => Value::Null,
        }
    }
}

/// Response captured from one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub status: ObservedStatus,
    pub body: ResponseBody,
    pub content_type: Option<String>,
}

impl Observation {
    /// Timeout sentinel observation
    #[must_use]
    pub fn timeout() -> Self {
        Self {
            status: ObservedStatus::Timeout,
            body: ResponseBody::Empty,
            content_type: None,
        }
    }
}

/// Everything captured in one environment for one scenario
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvCapture {
    /// Response of the last delivery
    pub response: Option<Observation>,
    pub counts_before: BTreeMap<String, i64>,
    pub counts_after: BTreeMap<String, i64>,
    /// Counts after the first delivery of a repeat scenario
    pub counts_after_first: Option<BTreeMap<String, i64>>,
    pub row_before: Option<Map<String, Value>>,
    pub row_after: Option<Map<String, Value>>,
    /// Request as sent, kept for verbose reports
    pub request: Option<Value>,
}
