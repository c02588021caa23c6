//! # mailbot
//!
//! Unified mailbox for mail automation.
//!
//! One interface over two structurally different backends:
//! - **IMAP**: stateful folder store with a single folder lock
//! - **Microsoft Graph**: stateless query service with a local post-filter
//!
//! Both return [`Message`]s with identical search, date resolution,
//! attachment extraction (including TNEF envelopes) and body-link
//! harvesting.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailbot::{FeatureFlags, Mailbox, MailboxConfig, SearchCriteria};
//!
//! let config = MailboxConfig::from_file("mailbot.json")?;
//! let mut mailbox = Mailbox::from_config(&config, FeatureFlags::from_env())?;
//! mailbox.connect(Some("INBOX")).await?;
//!
//! let criteria = SearchCriteria::new().with_from("billing@example.org").with_seen(false);
//! for message in mailbox.search_messages(Some(&criteria)).await? {
//!     for attachment in message.search_attachments(None).await? {
//!         println!("{} {}", attachment.filename, attachment.checksum);
//!     }
//! }
//! mailbox.disconnect().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attachments;
pub mod backend;
pub mod config;
pub mod criteria;
pub mod date;
mod error;
pub mod links;
mod mailbox;
pub mod message;

pub use attachments::{AllowList, Attachment};
pub use backend::{BackendKind, ConnectionInfo, MailboxBackend};
pub use config::{FeatureFlags, GraphSettings, ImapSettings, MailboxConfig};
pub use criteria::SearchCriteria;
pub use date::{DateOptions, DateSource};
pub use error::{Error, Result};
pub use links::{LinkDownload, LinkHarvester, LinkRule, UrlPattern};
pub use mailbox::Mailbox;
pub use message::{BodyFormat, BodyRule, HeaderRule, Message, MessageId, MessageMeta};
