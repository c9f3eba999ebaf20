//! Name-sniffing rule tables
//!
//! Every heuristic that looks at a field or column name lives here as data.
//! Names are split into lower-case words first (`startTime` → `start time`,
//! `client_id` → `client id`), and rules match on whole words, so `paid`
//! does not match `unpaid` and `id` does not match `video`.

use serde_json::Value;

/// Fixed representative identifier
pub const SAMPLE_ID: &str = "00000000-0000-4000-8000-000000000001";
/// Sample email address
pub const SAMPLE_EMAIL: &str = "parity.sample@example.com";
/// Sample password accepted by common strength rules
pub const SAMPLE_PASSWORD: &str = "Parity-Sample-Passw0rd!";
/// Start of the sample time range
pub const SAMPLE_START: &str = "2030-01-01T10:00:00.000Z";
/// End of the sample time range
pub const SAMPLE_END: &str = "2030-01-01T11:00:00.000Z";
/// Sample calendar date
pub const SAMPLE_DATE: &str = "2030-01-01";
/// Sample E.164 phone number
pub const SAMPLE_PHONE: &str = "+15555550100";
/// Sample URL
pub const SAMPLE_URL: &str = "https://example.com/parity";
/// Fallback for untyped string leaves
pub const SAMPLE_TEXT: &str = "Test";
/// Non-identifier written over identifier fields
pub const INVALID_ID: &str = "not-a-valid-id";

/// How a rule matches a tokenized name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    /// Any word equals
    Word(&'static str),
    /// Last word equals
    LastWord(&'static str),
    /// Whole name equals (case-insensitive)
    Exact(&'static str),
}

impl NameMatch {
    /// Check a name against this matcher
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let words = words(name);
        match self {
            Self::Word(w) => words.iter().any(|x| x == w),
            Self::LastWord(w) => words.last().is_some_and(|x| x == w),
            Self::Exact(w) => name.eq_ignore_ascii_case(w),
        }
    }
}

/// Placeholder kinds for untyped leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Email,
    Password,
    Identifier,
    Start,
    End,
    Date,
    Phone,
    Url,
    Text,
}

impl Placeholder {
    /// Concrete sample value
    #[must_use]
    pub fn value(self) -> Value {
        let s = match self {
            Self::Email => SAMPLE_EMAIL,
            Self::Password => SAMPLE_PASSWORD,
            Self::Identifier => SAMPLE_ID,
            Self::Start => SAMPLE_START,
            Self::End => SAMPLE_END,
            Self::Date => SAMPLE_DATE,
            Self::Phone => SAMPLE_PHONE,
            Self::Url => SAMPLE_URL,
            Self::Text => SAMPLE_TEXT,
        };
        Value::String(s.to_string())
    }
}

/// Placeholder rules, first match wins
pub const PLACEHOLDER_RULES: &[(NameMatch, Placeholder)] = &[
    (NameMatch::Word("email"), Placeholder::Email),
    (NameMatch::Word("password"), Placeholder::Password),
    (NameMatch::LastWord("id"), Placeholder::Identifier),
    (NameMatch::Exact("uuid"), Placeholder::Identifier),
    (NameMatch::Word("start"), Placeholder::Start),
    (NameMatch::Word("starts"), Placeholder::Start),
    (NameMatch::Word("from"), Placeholder::Start),
    (NameMatch::Word("begin"), Placeholder::Start),
    (NameMatch::Word("end"), Placeholder::End),
    (NameMatch::Word("ends"), Placeholder::End),
    (NameMatch::Word("until"), Placeholder::End),
    (NameMatch::LastWord("date"), Placeholder::Date),
    (NameMatch::Word("phone"), Placeholder::Phone),
    (NameMatch::Word("url"), Placeholder::Url),
];

/// Placeholder for an untyped leaf named `name`
#[must_use]
pub fn placeholder_for(name: &str) -> Placeholder {
    PLACEHOLDER_RULES
        .iter()
        .find(|(m, _)| m.matches(name))
        .map_or(Placeholder::Text, |(_, p)| *p)
}

/// Words marking a numeric field
const NUMERIC_WORDS: &[&str] = &[
    "amount", "price", "cost", "quantity", "qty", "count", "total", "duration", "minutes",
    "hours", "days", "capacity", "limit", "offset", "page", "size", "age", "weight", "height",
    "percent", "percentage", "discount", "tax", "fee", "rate", "cents", "max", "min",
];

/// Words marking pagination and sorting query fields
const PAGINATION_WORDS: &[&str] = &["limit", "page", "offset", "sort", "order", "skip", "take"];

const START_WORDS: &[&str] = &["start", "starts", "from", "begin", "since"];
const END_WORDS: &[&str] = &["end", "ends", "to", "until", "through"];

/// Words marking a column as resource state
const STATE_WORDS: &[&str] = &[
    "status", "state", "type", "phase", "active", "enabled", "paid", "cancelled", "canceled",
    "archived", "deleted", "published", "visible", "completed", "confirmed", "approved", "expired",
    "verified", "locked", "blocked", "refunded", "accepted", "revoked", "used", "expires",
    "ends", "trial", "scheduled", "suspended",
];

/// Columns never touched by generated variants
pub const PROTECTED_COLUMNS: &[&str] = &[
    "id",
    "organization_id",
    "created_at",
    "updated_at",
    "password_hash",
];

/// Split a name into lower-case words at `_`, `-`, `.`, spaces and
/// camelCase boundaries
#[must_use]
pub fn words(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        current.push(ch.to_ascii_lowercase());
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// True for `id`, `clientId`, `session_id`, `uuid`, `bookingIds`
#[must_use]
pub fn is_identifier_name(name: &str) -> bool {
    let words = words(name);
    matches!(words.last().map(String::as_str), Some("id" | "ids" | "uuid"))
}

/// True when the name suggests a number
#[must_use]
pub fn is_numeric_name(name: &str) -> bool {
    words(name).iter().any(|w| NUMERIC_WORDS.contains(&w.as_str()))
}

/// True for limit/page/offset/sort/order-named fields
#[must_use]
pub fn is_pagination_name(name: &str) -> bool {
    words(name)
        .iter()
        .any(|w| PAGINATION_WORDS.contains(&w.as_str()))
}

/// True when a column name carries resource state
#[must_use]
pub fn is_state_name(name: &str) -> bool {
    words(name).iter().any(|w| STATE_WORDS.contains(&w.as_str()))
}

/// Which end of a range a name denotes, with the remaining words
fn range_side(name: &str) -> Option<(bool, Vec<String>)> {
    let words = words(name);
    let is_start = words.iter().any(|w| START_WORDS.contains(&w.as_str()));
    let is_end = words.iter().any(|w| END_WORDS.contains(&w.as_str()));
    if is_start == is_end {
        return None;
    }
    let rest = words
        .into_iter()
        .filter(|w| !START_WORDS.contains(&w.as_str()) && !END_WORDS.contains(&w.as_str()))
        .collect();
    Some((is_start, rest))
}

/// Pair start/end sibling keys (`startTime`/`endTime`, `from`/`to`)
///
/// Keys pair when their words match once the start/end word is removed.
/// Each key joins at most one pair.
#[must_use]
pub fn time_range_pairs<'k>(keys: &[&'k str]) -> Vec<(&'k str, &'k str)> {
    let mut pairs = Vec::new();
    let mut used = vec![false; keys.len()];
    for (i, start) in keys.iter().enumerate() {
        let Some((true, rest)) = range_side(start) else {
            continue;
        };
        let partner = keys.iter().enumerate().find(|(j, end)| {
            !used[*j] && matches!(range_side(end), Some((false, ref r)) if *r == rest)
        });
        if let Some((j, end)) = partner {
            used[i] = true;
            used[j] = true;
            pairs.push((*start, *end));
        }
    }
    pairs
}

/// Webhook providers, distinguished by signature scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookProvider {
    /// `t=<ts>,v1=<hmac-sha256("ts.payload")>`
    Stripe,
    /// base64 HMAC-SHA1 over the URL plus sorted form fields
    Twilio,
    /// hex HMAC-SHA256 over the raw payload
    Generic,
}

impl WebhookProvider {
    /// Provider for a webhook path
    #[must_use]
    pub fn detect(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.contains("stripe") || lower.contains("payment") {
            Self::Stripe
        } else if lower.contains("twilio") || lower.contains("sms") {
            Self::Twilio
        } else {
            Self::Generic
        }
    }

    /// True when the signature embeds a timestamp the server checks
    #[inline]
    #[must_use]
    pub fn checks_timestamp(&self) -> bool {
        matches!(self, Self::Stripe)
    }

    /// True when the payload is form-encoded rather than JSON
    #[inline]
    #[must_use]
    pub fn is_form_encoded(&self) -> bool {
        matches!(self, Self::Twilio)
    }

    /// Short lower-case name used in configuration keys
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Twilio => "twilio",
            Self::Generic => "generic",
        }
    }
}
