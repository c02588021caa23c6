//! Backend-neutral search criteria.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Search criteria shared by both backends.
///
/// An absent field imposes no constraint and unknown keys are ignored. Each
/// field can still be switched off by [`FeatureFlags`](crate::FeatureFlags).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Exact sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Subject substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Body substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Read state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen: Option<bool>,
    /// Lower bound on the receipt instant.
    ///
    /// Accepts RFC 3339, a zone-less ISO timestamp or a plain `YYYY-MM-DD`
    /// date; the last two are read as UTC.
    #[serde(
        default,
        deserialize_with = "deserialize_since",
        skip_serializing_if = "Option::is_none"
    )]
    pub since: Option<DateTime<Utc>>,
}

/// Parses a `since` value; `None` for anything that is not a date.
#[must_use]
pub fn parse_since(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(at.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

fn deserialize_since<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_since(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}")))
}

impl SearchCriteria {
    /// Creates empty criteria.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses criteria from loosely typed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a field has the wrong type or the
    /// value is not an object.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid search criteria: {e}")))
    }

    /// Sets the sender.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Sets the subject substring.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the body substring.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the read state.
    #[must_use]
    pub const fn with_seen(mut self, seen: bool) -> Self {
        self.seen = Some(seen);
        self
    }

    /// Sets the lower bound on receipt time.
    #[must_use]
    pub const fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Returns true if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.from.is_none()
            && self.subject.is_none()
            && self.body.is_none()
            && self.seen.is_none()
            && self.since.is_none()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let criteria = SearchCriteria::from_value(json!({
            "from": "a@x.com",
            "subject": "invoice",
            "since": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(criteria.from.as_deref(), Some("a@x.com"));
        assert_eq!(criteria.since.unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert!(criteria.body.is_none());
    }

    #[test]
    fn test_wrong_type_is_config_error() {
        let err = SearchCriteria::from_value(json!({ "seen": "yes" })).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = SearchCriteria::from_value(json!({ "from": 42 })).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = SearchCriteria::from_value(json!({ "since": "yesterday" })).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_since_accepts_plain_dates() {
        let criteria = SearchCriteria::from_value(json!({ "since": "2024-01-01" })).unwrap();
        assert_eq!(criteria.since.unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let criteria =
            SearchCriteria::from_value(json!({ "since": "2024-01-01T08:30:00" })).unwrap();
        assert_eq!(criteria.since.unwrap().to_rfc3339(), "2024-01-01T08:30:00+00:00");

        let criteria =
            SearchCriteria::from_value(json!({ "since": "2024-01-01T08:30:00+02:00" })).unwrap();
        assert_eq!(criteria.since.unwrap().to_rfc3339(), "2024-01-01T06:30:00+00:00");

        let err = SearchCriteria::from_value(json!({ "since": "2024-13-01" })).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("invalid date")));
    }

    #[test]
    fn test_null_fields_impose_nothing() {
        let criteria = SearchCriteria::from_value(json!({ "from": null, "seen": null })).unwrap();
        assert!(criteria.is_empty());
    }

    #[test]
    fn test_builder() {
        let criteria = SearchCriteria::new().with_from("a@x.com").with_seen(false);
        assert!(!criteria.is_empty());
        assert_eq!(criteria.seen, Some(false));
    }
}
