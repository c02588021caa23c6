//! # mailbot-mime
//!
//! Attachment primitives for mailbox automation.
//!
//! ## Features
//!
//! - **Message parsing**: owned text/HTML bodies, ordered header lines,
//!   attachments and dates from raw RFC 5322 bytes
//! - **TNEF**: decoding of `winmail.dat` envelopes
//! - **Header values**: `Content-Disposition` / `Content-Type` parameters
//! - **Content types**: inference from file names
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailbot_mime::{ParsedMail, TNEF_CONTENT_TYPE, tnef};
//!
//! let mail = ParsedMail::parse(&raw)?;
//! for attachment in &mail.attachments {
//!     if attachment.content_type == TNEF_CONTENT_TYPE {
//!         let file = tnef::decode(&attachment.content)?.into_single_file()?;
//!         println!("{} ({})", file.title, file.content_type());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod message;

pub mod tnef;

pub use content_type::{
    HeaderValue, OCTET_STREAM, TNEF_CONTENT_TYPE, content_type_for, extension_of,
};
pub use error::{Error, Result};
pub use message::{Attachment, HeaderLine, ParsedMail, html_to_text, received_timestamp};
