//! Source record types parsed from raw platform payloads
//!
//! Call rows come from the telephony statistics endpoint and activity rows
//! from the CRM activity list. Both arrive as loosely-shaped JSON with
//! portal-dependent field names, so parsing is tolerant: every field is read
//! through a prioritized fallback list, the way the portal actually returns
//! them.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Call/activity direction as exposed by the platform.
///
/// Telephony `CALL_TYPE`: 1 = outbound, 2 = inbound, 3 = inbound redirected.
/// Activity `DIRECTION`: 1 = outbound, 2 = inbound. Anything else is Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
    InboundRedirected,
    Unknown,
}

impl Direction {
    pub fn from_call_type(raw: Option<i64>) -> Self {
        match raw {
            Some(1) => Self::Outbound,
            Some(2) => Self::Inbound,
            Some(3) => Self::InboundRedirected,
            _ => Self::Unknown,
        }
    }

    pub fn from_activity_code(raw: Option<i64>) -> Self {
        match raw {
            Some(1) => Self::Outbound,
            Some(2) => Self::Inbound,
            _ => Self::Unknown,
        }
    }

    /// Direction compatibility for candidate filtering: Unknown on either
    /// side matches everything; a redirected inbound call folds into Inbound.
    pub fn compatible(self, other: Self) -> bool {
        if self == Self::Unknown || other == Self::Unknown {
            return true;
        }
        self.folded() == other.folded()
    }

    fn folded(self) -> Self {
        if self == Self::InboundRedirected {
            Self::Inbound
        } else {
            self
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::Outbound => "OUTBOUND",
            Self::Inbound => "INBOUND",
            Self::InboundRedirected => "INBOUND_REDIRECTED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Telephony call log row. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub started_at: Option<NaiveDateTime>,
    pub duration_secs: i64,
    pub direction: Direction,
    pub phone_raw: String,
    /// Digits and leading `+` only.
    pub phone: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub status_code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("call row carries neither CALL_ID nor ID")]
    MissingCallId,
}

impl CallRecord {
    pub fn from_raw(raw: &Value) -> Result<Self, RecordError> {
        let call_id = first_str(raw, &["CALL_ID", "ID"]).ok_or(RecordError::MissingCallId)?;
        let started_at = first_str(
            raw,
            &[
                "CALL_START_DATE",
                "CALL_START_DATE_FORMATTED",
                "CALL_START_DATE_SHORT",
            ],
        )
        .and_then(|s| parse_local_ts(&s));
        let phone_raw = first_str(
            raw,
            &["PHONE_NUMBER", "CALL_PHONE_NUMBER", "PHONE", "CALL_FROM", "CALL_TO"],
        )
        .unwrap_or_default();

        Ok(Self {
            call_id,
            started_at,
            duration_secs: first_int(raw, &["CALL_DURATION"]).unwrap_or(0),
            direction: Direction::from_call_type(first_int(raw, &["CALL_TYPE"])),
            phone: normalize_phone(&phone_raw),
            phone_raw,
            user_id: first_str(raw, &["PORTAL_USER_ID"]),
            user_name: first_str(raw, &["PORTAL_USER_NAME"]),
            status_code: first_str(raw, &["CALL_STATUS_CODE", "CALL_FAILED_CODE"])
                .unwrap_or_default(),
        })
    }

    pub fn answered(&self) -> bool {
        self.duration_secs > 0
    }
}

/// CRM activity row of call type. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub timestamp: Option<NaiveDateTime>,
    pub user_id: Option<String>,
    pub direction: Direction,
    /// Normalized; empty when the row carries no usable communication value.
    pub phone: String,
    pub description: String,
    pub owner_type_id: Option<String>,
    pub owner_id: Option<String>,
}

impl ActivityRecord {
    /// Returns None when the row has no id at all.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let id = first_str(raw, &["ID"])?;
        let timestamp = first_str(raw, &["START_TIME", "CREATED", "LAST_UPDATED", "END_TIME"])
            .and_then(|s| parse_local_ts(&s));

        Some(Self {
            id,
            timestamp,
            user_id: first_str(raw, &["RESPONSIBLE_ID"]),
            direction: Direction::from_activity_code(first_int(raw, &["DIRECTION"])),
            phone: normalize_phone(&activity_phone(raw)),
            description: first_str(raw, &["DESCRIPTION", "RESULT"]).unwrap_or_default(),
            owner_type_id: first_str(raw, &["OWNER_TYPE_ID"]),
            owner_id: first_str(raw, &["OWNER_ID"]),
        })
    }
}

/// The communication value rarely sits in one place: prefer the first
/// COMMUNICATIONS entry, then the flat phone-ish fields.
fn activity_phone(raw: &Value) -> String {
    if let Some(first) = raw
        .get("COMMUNICATIONS")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    {
        if let Some(v) = first_str(first, &["VALUE", "VALUE_ORIGINAL"]) {
            return v;
        }
    }
    first_str(
        raw,
        &["PHONE_NUMBER", "CALL_PHONE_NUMBER", "CALL_FROM", "CALL_TO", "COMMUNICATION"],
    )
    .unwrap_or_default()
}

/// First non-empty string among `keys`, accepting numbers as their decimal
/// rendering (ids frequently arrive as either).
pub(crate) fn first_str(raw: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match raw.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

pub(crate) fn first_int(raw: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match raw.get(key) {
            Some(Value::Number(n)) => return n.as_i64(),
            Some(Value::String(s)) => {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strips everything but digits and `+` from a raw phone value.
pub fn normalize_phone(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

/// Parses the platform's local timestamps. Accepts `YYYY-MM-DD HH:MM:SS`,
/// the same with a `T` separator, full RFC 3339, and bare dates.
pub fn parse_local_ts(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replacen(' ', "T", 1);
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.naive_local())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

pub fn ts_millis(ts: NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

/// `YYYY-MM-DD HH:MM:SS`, the form list filters expect.
pub fn fmt_space(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `YYYY-MM-DDTHH:MM:SS`, the form written into datetime fields.
pub fn fmt_iso(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
