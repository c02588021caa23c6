//! Example: search a mailbox and list what each message carries.
//!
//! ```bash
//! cargo run --package mailbot --example inspect -- mailbot.json INBOX
//! ```
//!
//! The configuration file selects IMAP or Microsoft Graph. Feature flags
//! come from the `USE_MAIL_*` / `MAILBOT_TIMEZONE` environment variables.

use anyhow::Context;
use mailbot::{
    DateOptions, FeatureFlags, HeaderRule, Mailbox, MailboxConfig, SearchCriteria,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "mailbot.json".to_string());
    let folder = args.next().unwrap_or_else(|| "INBOX".to_string());

    let config = MailboxConfig::from_file(&path)
        .with_context(|| format!("failed to load configuration from {path}"))?;
    let mut mailbox = Mailbox::from_config(&config, FeatureFlags::from_env())?;
    info!(backend = %mailbox.backend(), %folder, "connecting");

    mailbox.connect(Some(&folder)).await?;
    let criteria = config
        .default_criteria()?
        .unwrap_or_else(|| SearchCriteria::new().with_seen(false));
    let messages = mailbox.search_messages(Some(&criteria)).await?;

    let headers = HeaderRule {
        select: vec!["message-id".to_string()],
    };
    for message in &messages {
        let date = message.parsed_date(&DateOptions::default()).await?;
        let attachments = message.search_attachments(None).await?;
        let message_ids = message.search_headers(&headers).await?;

        println!(
            "{} | {} | {} | {}",
            message.id(),
            date.to_rfc3339(),
            message.from().unwrap_or("-"),
            message.subject().unwrap_or("-"),
        );
        for line in message_ids {
            println!("    {}", line.line);
        }
        for attachment in attachments {
            println!(
                "    {} ({}, {} bytes, sha256 {})",
                attachment.filename,
                attachment.content_type,
                attachment.content.len(),
                attachment.checksum
            );
        }
    }

    println!("{:#?}", mailbox.connection_info());
    mailbox.disconnect().await?;
    Ok(())
}
