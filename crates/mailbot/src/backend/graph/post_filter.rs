//! Local re-check of Graph search results.
//!
//! Graph text filtering is case-sensitive for some fields and misses
//! matches inside HTML bodies, so `from` and `body` are evaluated again
//! on every returned message.

use mailbot_mime::html_to_text;
use tracing::debug;

use super::api::GraphMessage;
use crate::config::FeatureFlags;
use crate::criteria::SearchCriteria;
use crate::message::normalize_whitespace;

/// Criteria re-evaluated after the native query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    from: Option<String>,
    body: Option<String>,
}

impl PostFilter {
    /// Keeps the `from` and `body` criteria whose filters are enabled.
    #[must_use]
    pub fn new(criteria: &SearchCriteria, flags: &FeatureFlags) -> Self {
        Self {
            from: criteria.from.clone().filter(|_| flags.from_filter),
            body: criteria
                .body
                .as_deref()
                .filter(|_| flags.body_filter)
                .map(|body| normalize_whitespace(body).to_lowercase()),
        }
    }

    /// Returns true if nothing is re-checked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.from.is_none() && self.body.is_none()
    }

    /// Returns true if `message` satisfies every kept criterion.
    #[must_use]
    pub fn accepts(&self, message: &GraphMessage) -> bool {
        if let Some(from) = &self.from {
            if message.from_address() != Some(from.as_str()) {
                return false;
            }
        }
        if let Some(body) = &self.body {
            let text = match &message.body {
                Some(b) if b.is_html() => html_to_text(&b.content),
                Some(b) => b.content.clone(),
                None => String::new(),
            };
            if !normalize_whitespace(&text).to_lowercase().contains(body.as_str()) {
                return false;
            }
        }
        true
    }

    /// Drops rejected messages, logging each one.
    #[must_use]
    pub fn apply(&self, messages: Vec<GraphMessage>) -> Vec<GraphMessage> {
        if self.is_empty() {
            return messages;
        }
        messages
            .into_iter()
            .filter(|message| {
                let keep = self.accepts(message);
                if !keep {
                    debug!(
                        id = %message.id,
                        from = ?message.from_address(),
                        subject = ?message.subject,
                        received = ?message.received_date_time,
                        body = %message.body_content(),
                        "message rejected by post-filter"
                    );
                }
                keep
            })
            .collect()
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
    use crate::backend::graph::api::{EmailAddress, ItemBody, Recipient};

    fn message(id: &str, from: &str, body: &str, html: bool) -> GraphMessage {
        GraphMessage {
            id: id.into(),
            from: Some(Recipient {
                email_address: EmailAddress {
                    address: Some(from.into()),
                    name: None,
                },
            }),
            body: Some(ItemBody {
                content_type: if html { "html" } else { "text" }.into(),
                content: body.into(),
            }),
            ..GraphMessage::default()
        }
    }

    #[test]
    fn test_sender_must_match_exactly() {
        let filter = PostFilter::new(
            &SearchCriteria::new().with_from("a@x.com"),
            &FeatureFlags::default(),
        );
        let kept = filter.apply(vec![
            message("1", "a@x.com", "", false),
            message("2", "b@x.com", "", false),
            message("3", "a@x.com.evil", "", false),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "1");
    }

    #[test]
    fn test_body_is_case_and_whitespace_insensitive() {
        let filter = PostFilter::new(
            &SearchCriteria::new().with_body("Total   DUE"),
            &FeatureFlags::default(),
        );
        assert!(filter.accepts(&message("1", "a@x.com", "the total\n due is 5", false)));
        assert!(filter.accepts(&message("2", "a@x.com", "<p>Total <b>due</b></p>", true)));
        assert!(!filter.accepts(&message("3", "a@x.com", "nothing here", false)));
    }

    #[test]
    fn test_regex_characters_are_literal() {
        let filter = PostFilter::new(
            &SearchCriteria::new().with_body("a.c"),
            &FeatureFlags::default(),
        );
        assert!(!filter.accepts(&message("1", "a@x.com", "abc", false)));
        assert!(filter.accepts(&message("2", "a@x.com", "a.c", false)));
    }

    #[test]
    fn test_disabled_flags_skip_the_check() {
        let criteria = SearchCriteria::new().with_from("a@x.com").with_body("total");
        let flags = FeatureFlags::default().without_from_filter().without_body_filter();
        let filter = PostFilter::new(&criteria, &flags);
        assert!(filter.is_empty());
        assert!(filter.accepts(&message("1", "b@x.com", "other", false)));
    }
}
