//! Effective message timestamp under configurable timezone rules.
//!
//! Two independent choices are resolved as explicit option, then
//! [`FeatureFlags`], then the compiled-in default:
//!
//! - which timestamp to trust: the `Date` header (default) or the most
//!   recent `Received` hop
//! - whether the embedded offset is trusted (default) or the wall-clock
//!   numbers are reinterpreted in the target zone

use chrono::{DateTime, FixedOffset, LocalResult, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureFlags;

/// Zone used when neither the caller nor the flags name one.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Argentina::Buenos_Aires;

/// Which timestamp a message date comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateSource {
    /// The message's own `Date` (sent) header.
    Sent,
    /// The date recorded by the most recent `Received` hop.
    Received,
}

impl DateSource {
    /// Lowercase name for logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }
}

/// Per-call overrides for [`Message::parsed_date`](crate::Message::parsed_date).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateOptions {
    /// Timestamp source.
    pub source: Option<DateSource>,
    /// Reinterpret wall-clock numbers in the target zone.
    pub ignore_timezone: Option<bool>,
    /// Target zone.
    pub timezone: Option<Tz>,
}

impl DateOptions {
    /// Uses the `Received` timestamp.
    #[must_use]
    pub const fn received() -> Self {
        Self {
            source: Some(DateSource::Received),
            ignore_timezone: None,
            timezone: None,
        }
    }

    /// Sets the timezone handling.
    #[must_use]
    pub const fn with_ignore_timezone(mut self, ignore: bool) -> Self {
        self.ignore_timezone = Some(ignore);
        self
    }

    /// Sets the target zone.
    #[must_use]
    pub const fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }
}

/// Fully resolved date policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePolicy {
    /// Timestamp source.
    pub source: DateSource,
    /// Reinterpret wall-clock numbers in `timezone`.
    pub ignore_timezone: bool,
    /// Target zone.
    pub timezone: Tz,
}

impl DatePolicy {
    /// Resolves options against flags and defaults.
    #[must_use]
    pub fn resolve(options: &DateOptions, flags: &FeatureFlags) -> Self {
        Self {
            source: options
                .source
                .or(flags.date_source)
                .unwrap_or(DateSource::Sent),
            ignore_timezone: options
                .ignore_timezone
                .or(flags.ignore_timezone)
                .unwrap_or(false),
            timezone: options
                .timezone
                .or(flags.timezone)
                .unwrap_or(DEFAULT_TIMEZONE),
        }
    }

    /// Applies the timezone rule to a timestamp.
    #[must_use]
    pub fn apply(&self, date: DateTime<FixedOffset>) -> DateTime<Tz> {
        if self.ignore_timezone {
            debug!(timezone = %self.timezone, "ignoring message timezone");
            reinterpret_in_zone(date, self.timezone)
        } else {
            debug!(timezone = %self.timezone, "using message timezone");
            date.with_timezone(&self.timezone)
        }
    }
}

/// Keeps the wall-clock numbers of `date` and attaches `tz` instead of the
/// embedded offset.
///
/// Ambiguous local times take the earlier instant. Times that fall in a
/// zone gap keep their instant and are only re-expressed.
#[must_use]
pub fn reinterpret_in_zone(date: DateTime<FixedOffset>, tz: Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&date.naive_local()) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => date.with_timezone(&tz),
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
    use proptest::prelude::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_defaults() {
        let policy = DatePolicy::resolve(&DateOptions::default(), &FeatureFlags::default());
        assert_eq!(policy.source, DateSource::Sent);
        assert!(!policy.ignore_timezone);
        assert_eq!(policy.timezone, DEFAULT_TIMEZONE);
    }

    #[test]
    fn test_option_beats_flag() {
        let flags = FeatureFlags {
            date_source: Some(DateSource::Received),
            ignore_timezone: Some(true),
            ..FeatureFlags::default()
        };

        let from_flags = DatePolicy::resolve(&DateOptions::default(), &flags);
        assert_eq!(from_flags.source, DateSource::Received);
        assert!(from_flags.ignore_timezone);

        let options = DateOptions {
            source: Some(DateSource::Sent),
            ignore_timezone: Some(false),
            timezone: Some(chrono_tz::UTC),
        };
        let explicit = DatePolicy::resolve(&options, &flags);
        assert_eq!(explicit.source, DateSource::Sent);
        assert!(!explicit.ignore_timezone);
        assert_eq!(explicit.timezone, chrono_tz::UTC);
    }

    #[test]
    fn test_ignore_timezone_keeps_wall_clock() {
        let policy = DatePolicy {
            source: DateSource::Sent,
            ignore_timezone: true,
            timezone: DEFAULT_TIMEZONE,
        };
        let out = policy.apply(at("2024-03-10T12:30:00+02:00"));
        assert_eq!(out.to_rfc3339(), "2024-03-10T12:30:00-03:00");
    }

    #[test]
    fn test_trust_timezone_converts() {
        let policy = DatePolicy {
            source: DateSource::Sent,
            ignore_timezone: false,
            timezone: DEFAULT_TIMEZONE,
        };
        let original = at("2024-03-10T12:30:00+02:00");
        let out = policy.apply(original);
        assert_eq!(out.to_rfc3339(), "2024-03-10T07:30:00-03:00");
        assert_eq!(out.with_timezone(original.offset()), original);
    }

    #[test]
    fn test_reinterpret_in_gap() {
        // 02:30 does not exist in Madrid on 2024-03-31.
        let out = reinterpret_in_zone(at("2024-03-31T02:30:00+00:00"), chrono_tz::Europe::Madrid);
        assert_eq!(out.timestamp(), at("2024-03-31T02:30:00+00:00").timestamp());
    }

    proptest! {
        #[test]
        fn converting_round_trips(secs in 0i64..4_000_000_000, offset_h in -12i32..=14) {
            let offset = FixedOffset::east_opt(offset_h * 3600).unwrap();
            let original = DateTime::from_timestamp(secs, 0).unwrap().with_timezone(&offset);
            let policy = DatePolicy {
                source: DateSource::Sent,
                ignore_timezone: false,
                timezone: DEFAULT_TIMEZONE,
            };
            let converted = policy.apply(original);
            prop_assert_eq!(converted.with_timezone(&offset), original);
        }
    }
}
