//! # mailbot-oauth
//!
//! Credential resolution for mailbox connections.
//!
//! ## Features
//!
//! - **Auth descriptors**: password, static bearer token, Microsoft client
//!   credentials, Google refresh token
//! - **Token model**: expiry from `expires_in` or the JWT `exp` claim
//! - **SASL**: XOAUTH2 initial response
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailbot_oauth::{AuthDescriptor, Resolver, Secret};
//!
//! let auth: AuthDescriptor = serde_json::from_str(r#"{"user":"bot@example.com","pass":"pw"}"#)?;
//! let credential = Resolver::new().resolve(&auth).await?;
//! assert!(matches!(credential.secret, Secret::Password(_)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod credential;
pub mod error;
pub mod flow;
pub mod provider;
pub mod sasl;
pub mod token;

pub use credential::{AuthDescriptor, Credential, GoogleRefresh, MsClientCredentials, Resolver, Secret};
pub use error::{Error, Result};
pub use flow::OAuthClient;
pub use provider::{GRAPH_DEFAULT_SCOPE, MICROSOFT_AUTHORITY, OUTLOOK_DEFAULT_SCOPE, Provider};
pub use token::{Token, TokenResponse, jwt_expiry};
