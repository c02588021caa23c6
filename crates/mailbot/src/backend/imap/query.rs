//! IMAP SEARCH keys built from [`SearchCriteria`].

use std::fmt;

use chrono::NaiveDate;
use tracing::warn;

use crate::config::FeatureFlags;
use crate::criteria::SearchCriteria;

/// One SEARCH key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// `FROM <string>`.
    From(String),
    /// `SUBJECT <string>`.
    Subject(String),
    /// `BODY <string>`.
    Body(String),
    /// `SEEN`.
    Seen,
    /// `UNSEEN`.
    Unseen,
    /// `SINCE <date>`.
    Since(NaiveDate),
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From(s) => write!(f, "FROM {}", astring(s)),
            Self::Subject(s) => write!(f, "SUBJECT {}", astring(s)),
            Self::Body(s) => write!(f, "BODY {}", astring(s)),
            Self::Seen => f.write_str("SEEN"),
            Self::Unseen => f.write_str("UNSEEN"),
            Self::Since(date) => write!(f, "SINCE {}", date.format("%d-%b-%Y")),
        }
    }
}

/// Conjunction of SEARCH keys; renders `ALL` when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImapQuery {
    keys: Vec<SearchKey>,
}

impl ImapQuery {
    /// Translates criteria, dropping every key whose filter is disabled.
    #[must_use]
    pub fn build(criteria: &SearchCriteria, flags: &FeatureFlags) -> Self {
        let mut keys = Vec::new();

        if let Some(from) = &criteria.from {
            if flags.from_filter {
                keys.push(SearchKey::From(from.clone()));
            } else {
                warn!("from filter is disabled");
            }
        }
        if let Some(subject) = &criteria.subject {
            if flags.subject_filter {
                keys.push(SearchKey::Subject(subject.clone()));
            } else {
                warn!("subject filter is disabled");
            }
        }
        if let Some(body) = &criteria.body {
            if flags.body_filter {
                keys.push(SearchKey::Body(body.clone()));
            } else {
                warn!("body filter is disabled");
            }
        }
        if let Some(seen) = criteria.seen {
            if flags.seen_filter {
                keys.push(if seen { SearchKey::Seen } else { SearchKey::Unseen });
            } else {
                warn!("seen filter is disabled");
            }
        }
        if let Some(since) = criteria.since {
            if flags.since_filter {
                keys.push(SearchKey::Since(since.date_naive()));
            } else {
                warn!("since filter is disabled");
            }
        }

        Self { keys }
    }

    /// The keys in order.
    #[must_use]
    pub fn keys(&self) -> &[SearchKey] {
        &self.keys
    }

    /// Returns true if the query matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Display for ImapQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.keys.is_empty() {
            return f.write_str("ALL");
        }
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Quotes `s` when it is not a valid atom.
fn astring(s: &str) -> String {
    if !s.is_empty() && !s.bytes().any(needs_quoting) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*') || b < 0x20 || b == 0x7F
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
    use proptest::prelude::*;

    fn full() -> SearchCriteria {
        SearchCriteria::new()
            .with_from("a@x.com")
            .with_subject("monthly invoice")
            .with_body("total due")
            .with_seen(false)
            .with_since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_render_all_keys() {
        let query = ImapQuery::build(&full(), &FeatureFlags::default());
        assert_eq!(
            query.to_string(),
            "FROM a@x.com SUBJECT \"monthly invoice\" BODY \"total due\" UNSEEN SINCE 01-Jan-2024"
        );
    }

    #[test]
    fn test_empty_is_all() {
        let query = ImapQuery::build(&SearchCriteria::new(), &FeatureFlags::default());
        assert!(query.is_empty());
        assert_eq!(query.to_string(), "ALL");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(astring("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(astring(""), "\"\"");
    }

    #[test]
    fn test_disabled_body_filter_is_stripped() {
        let flags = FeatureFlags::default().without_body_filter();
        let query = ImapQuery::build(&full(), &flags);
        assert!(!query.keys().iter().any(|k| matches!(k, SearchKey::Body(_))));
        assert!(!query.to_string().contains("BODY"));
    }

    proptest! {
        #[test]
        fn disabled_filters_never_render(
            from in proptest::option::of("[a-z]{1,8}@[a-z]{1,8}\\.com"),
            body in proptest::option::of("[a-z ]{1,12}"),
            from_on in any::<bool>(),
            body_on in any::<bool>(),
        ) {
            let criteria = SearchCriteria { from: from.clone(), body: body.clone(), ..SearchCriteria::default() };
            let flags = FeatureFlags { from_filter: from_on, body_filter: body_on, ..FeatureFlags::default() };
            let query = ImapQuery::build(&criteria, &flags);

            let has_from = query.keys().iter().any(|k| matches!(k, SearchKey::From(_)));
            let has_body = query.keys().iter().any(|k| matches!(k, SearchKey::Body(_)));
            prop_assert_eq!(has_from, from.is_some() && from_on);
            prop_assert_eq!(has_body, body.is_some() && body_on);
        }
    }
}
