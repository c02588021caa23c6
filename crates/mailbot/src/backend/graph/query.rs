//! OData `$filter` expressions built from [`SearchCriteria`].

use std::fmt;

use chrono::{Duration, SecondsFormat};
use tracing::warn;

use crate::config::FeatureFlags;
use crate::criteria::SearchCriteria;

/// Width of the receipt window opened by `since`.
pub const SINCE_WINDOW: Duration = Duration::hours(48);

/// Conjunction of OData clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpression {
    clauses: Vec<String>,
}

impl FilterExpression {
    /// Translates criteria, dropping every clause whose filter is disabled.
    #[must_use]
    pub fn build(criteria: &SearchCriteria, flags: &FeatureFlags) -> Self {
        let mut clauses = Vec::new();

        if let Some(from) = &criteria.from {
            if flags.from_filter {
                clauses.push(format!("from/emailAddress/address eq '{}'", escape(from)));
            } else {
                warn!("from filter is disabled");
            }
        }
        if let Some(subject) = &criteria.subject {
            if flags.subject_filter {
                clauses.push(format!("contains(subject,'{}')", escape(subject)));
            } else {
                warn!("subject filter is disabled");
            }
        }
        if let Some(body) = &criteria.body {
            if flags.body_filter {
                clauses.push(format!("contains(body/content,'{}')", escape(body)));
            } else {
                warn!("body filter is disabled");
            }
        }
        if let Some(seen) = criteria.seen {
            if flags.seen_filter {
                clauses.push(format!("isRead eq {seen}"));
            } else {
                warn!("seen filter is disabled");
            }
        }
        if let Some(since) = criteria.since {
            if flags.since_filter {
                let end = since + SINCE_WINDOW;
                clauses.push(format!(
                    "receivedDateTime ge {} and receivedDateTime lt {}",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true),
                    end.to_rfc3339_opts(SecondsFormat::Secs, true)
                ));
            } else {
                warn!("since filter is disabled");
            }
        }

        Self { clauses }
    }

    /// The clauses in order.
    #[must_use]
    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    /// Returns true if no clause was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clauses.join(" and "))
    }
}

/// OData string literal escaping.
fn escape(value: &str) -> String {
    value.replace('\'', "''")
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
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_sender_subject_and_window() {
        let criteria = SearchCriteria::new()
            .with_from("a@x.com")
            .with_subject("invoice")
            .with_since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let filter = FilterExpression::build(&criteria, &FeatureFlags::default());

        assert_eq!(
            filter.to_string(),
            "from/emailAddress/address eq 'a@x.com' and contains(subject,'invoice') and \
             receivedDateTime ge 2024-01-01T00:00:00Z and receivedDateTime lt 2024-01-03T00:00:00Z"
        );
    }

    #[test]
    fn test_seen_and_body() {
        let criteria = SearchCriteria::new().with_body("total").with_seen(true);
        let filter = FilterExpression::build(&criteria, &FeatureFlags::default());
        assert_eq!(filter.clauses(), ["contains(body/content,'total')", "isRead eq true"]);
    }

    #[test]
    fn test_quotes_are_doubled() {
        let criteria = SearchCriteria::new().with_subject("O'Brien's order");
        let filter = FilterExpression::build(&criteria, &FeatureFlags::default());
        assert_eq!(filter.to_string(), "contains(subject,'O''Brien''s order')");
    }

    #[test]
    fn test_disabled_filters_are_omitted() {
        let criteria = SearchCriteria::new().with_from("a@x.com").with_body("total");
        let flags = FeatureFlags::default().without_from_filter().without_body_filter();
        let filter = FilterExpression::build(&criteria, &flags);
        assert!(filter.is_empty());
        assert_eq!(filter.to_string(), "");
    }
}
