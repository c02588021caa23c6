//! IMAP adapter driven through the mailbox facade against an in-memory store.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use common::FakeStore;
use mailbot::backend::imap::ImapBackend;
use mailbot::message::MessageContext;
use mailbot::{
    AllowList, DateOptions, DateSource, Error, FeatureFlags, HeaderRule, ImapSettings, Mailbox,
    SearchCriteria,
};

const INVOICE: &str = "Received: from relay.example.net\r\n\
    \tby mx.example.com; Tue, 02 Jan 2024 10:00:05 +0000\r\n\
    From: Billing <billing@example.org>\r\n\
    Subject: Invoice 42\r\n\
    Date: Tue, 02 Jan 2024 11:59:00 +0200\r\n\
    Message-ID: <42@example.org>\r\n\
    MIME-Version: 1.0\r\n\
    Content-Type: multipart/mixed; boundary=\"B\"\r\n\
    \r\n\
    --B\r\n\
    Content-Type: text/plain; charset=utf-8\r\n\
    \r\n\
    Total   due:\r\n  100 EUR\r\n\
    --B\r\n\
    Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
    Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
    Content-Transfer-Encoding: base64\r\n\
    \r\n\
    JVBERi0xLjQ=\r\n\
    --B\r\n\
    Content-Type: image/png; name=\"logo.png\"\r\n\
    Content-Disposition: inline; filename=\"logo.png\"\r\n\
    Content-Transfer-Encoding: base64\r\n\
    \r\n\
    iVBORw0KGgo=\r\n\
    --B--\r\n";

fn settings() -> ImapSettings {
    ImapSettings {
        host: "imap.example.com".into(),
        port: 993,
        secure: true,
        user: Some("bot@example.com".into()),
        password: Some("secret".into()),
        ..ImapSettings::default()
    }
}

fn mailbox(store: &FakeStore, context: MessageContext) -> Mailbox {
    let backend = ImapBackend::new(settings(), None, Arc::new(context))
        .with_connector(Arc::new(store.clone()));
    Mailbox::with_backend(Box::new(backend))
}

#[tokio::test]
async fn selecting_the_same_folder_twice_is_a_no_op() {
    let store = FakeStore::default();
    let mut mailbox = mailbox(&store, MessageContext::default());

    mailbox.connect(Some("INBOX")).await.unwrap();
    mailbox.select_folder("INBOX").await.unwrap();
    mailbox.select_folder("Archive").await.unwrap();
    mailbox.disconnect().await.unwrap();

    assert_eq!(
        store.events(),
        [
            "connect bot@example.com",
            "lock INBOX",
            "release INBOX",
            "lock Archive",
            "release Archive",
            "logout",
        ]
    );
}

#[tokio::test]
async fn every_lock_is_released_exactly_once() {
    let store = FakeStore::default();
    let mut mailbox = mailbox(&store, MessageContext::default());

    mailbox.connect(None).await.unwrap();
    mailbox.select_folder("INBOX").await.unwrap();
    mailbox.release_folder().await.unwrap();
    mailbox.release_folder().await.unwrap();
    mailbox.select_folder("Archive").await.unwrap();
    mailbox.disconnect().await.unwrap();
    mailbox.disconnect().await.unwrap();

    let mut released = store.released();
    assert_eq!(released.len(), 2);
    released.dedup();
    assert_eq!(released.len(), 2);
    assert!(!mailbox.connection_info().authenticated);
}

#[tokio::test]
async fn failed_release_still_logs_out() {
    let store = FakeStore {
        fail_release: true,
        ..FakeStore::default()
    };
    let mut mailbox = mailbox(&store, MessageContext::default());
    mailbox.connect(Some("INBOX")).await.unwrap();

    let err = mailbox.disconnect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(msg) if msg == "CLOSE failed"));
    assert_eq!(store.events().last().map(String::as_str), Some("logout"));

    let info = mailbox.connection_info();
    assert!(!info.authenticated);
    assert_eq!(info.connected_at, None);
    assert_eq!(info.folder, None);
    mailbox.disconnect().await.unwrap();
}

#[tokio::test]
async fn protocol_violations_are_reported() {
    let store = FakeStore::default();
    let mut mailbox = mailbox(&store, MessageContext::default());

    assert!(matches!(mailbox.search_messages(None).await, Err(Error::NotConnected)));
    mailbox.connect(None).await.unwrap();
    assert!(matches!(mailbox.search_messages(None).await, Err(Error::NoFolderSelected)));

    let info = mailbox.connection_info();
    assert!(info.authenticated);
    assert_eq!(info.user.as_deref(), Some("bot@example.com"));
    assert_eq!(info.folder, None);
}

#[tokio::test]
async fn rejected_query_is_a_search_error() {
    let store = FakeStore {
        reject_search: true,
        ..FakeStore::default()
    };
    let mut mailbox = mailbox(&store, MessageContext::default());
    mailbox.connect(Some("INBOX")).await.unwrap();

    let criteria = SearchCriteria::new().with_subject("invoice");
    let err = mailbox.search_messages(Some(&criteria)).await.unwrap_err();
    assert!(matches!(err, Error::Search(query) if query.contains("SUBJECT")));
}

#[tokio::test]
async fn disabled_body_filter_is_left_out_of_the_query() {
    let store = FakeStore::default();
    let context = MessageContext {
        flags: FeatureFlags::default().without_body_filter(),
        ..MessageContext::default()
    };
    let mut mailbox = mailbox(&store, context);
    mailbox.connect(Some("INBOX")).await.unwrap();

    let criteria = SearchCriteria::new()
        .with_from("billing@example.org")
        .with_body("total")
        .with_since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    mailbox.search_messages(Some(&criteria)).await.unwrap();

    let search = store
        .events()
        .into_iter()
        .find(|e| e.starts_with("search "))
        .unwrap();
    assert_eq!(search, "search FROM billing@example.org SINCE 01-Jan-2024");
}

#[tokio::test]
async fn message_content_is_fetched_once_and_extracted() {
    let store = FakeStore::with_messages([(7, INVOICE.as_bytes().to_vec())]);
    let mut mailbox = mailbox(&store, MessageContext::default());
    mailbox.connect(Some("INBOX")).await.unwrap();

    let messages = mailbox.search_messages(None).await.unwrap();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];

    let attachments = message
        .search_attachments(Some(&AllowList::new(["attachment"], ["pdf"])))
        .await
        .unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].filename, "invoice.pdf");
    assert_eq!(attachments[0].content_type, "application/pdf");

    let ids = message
        .search_headers(&HeaderRule {
            select: vec!["Message-ID".into()],
        })
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0].line, "Message-ID: <42@example.org>");

    let sent = message.parsed_date(&DateOptions::default()).await.unwrap();
    assert_eq!(sent.to_rfc3339(), "2024-01-02T06:59:00-03:00");
    let received = message
        .parsed_date(&DateOptions::received())
        .await
        .unwrap();
    assert_eq!(received.to_rfc3339(), "2024-01-02T07:00:05-03:00");
    assert_eq!(DateOptions::received().source, Some(DateSource::Received));

    assert_eq!(message.from(), Some("billing@example.org"));
    let fetches = store.events().iter().filter(|e| e.starts_with("fetch")).count();
    assert_eq!(fetches, 1);
}

#[tokio::test]
async fn manual_body_filter_matches_normalized_text() {
    let store = FakeStore::with_messages([(7, INVOICE.as_bytes().to_vec())]);
    let context = MessageContext {
        flags: FeatureFlags::default().with_manual_body_filter(),
        ..MessageContext::default()
    };
    let mut mailbox = mailbox(&store, context);
    mailbox.connect(Some("INBOX")).await.unwrap();
    let message = mailbox.search_messages(None).await.unwrap().remove(0);

    assert!(message.satisfy_body_filter(Some("Total due: 100")).await.unwrap());
    assert!(!message.satisfy_body_filter(Some("total due")).await.unwrap());
    assert!(message.satisfy_body_filter(Some("")).await.unwrap());
}

#[tokio::test]
async fn processed_messages_move_to_the_configured_folder() {
    let store = FakeStore::with_messages([(7, INVOICE.as_bytes().to_vec())]);
    let context = MessageContext {
        move_processed: true,
        processed_folder: Some("Processed".into()),
        ..MessageContext::default()
    };
    let mut mailbox = mailbox(&store, context);
    mailbox.connect(Some("INBOX")).await.unwrap();
    let message = mailbox.search_messages(None).await.unwrap().remove(0);

    assert!(message.move_to(None).await.unwrap());
    assert!(message.move_to(Some("Done")).await.unwrap());
    let moves: Vec<String> = store
        .events()
        .into_iter()
        .filter(|e| e.starts_with("move"))
        .collect();
    assert_eq!(moves, ["move 7 Processed", "move 7 Done"]);
}

#[tokio::test]
async fn moving_is_a_no_op_when_disabled() {
    let store = FakeStore::with_messages([(7, INVOICE.as_bytes().to_vec())]);
    let mut mailbox = mailbox(&store, MessageContext::default());
    mailbox.connect(Some("INBOX")).await.unwrap();
    let message = mailbox.search_messages(None).await.unwrap().remove(0);

    assert!(!message.move_to(Some("Processed")).await.unwrap());
    assert!(!store.events().iter().any(|e| e.starts_with("move")));
}

#[tokio::test]
async fn uids_resolve_against_the_folder_selected_at_fetch_time() {
    let store = FakeStore::with_messages([(7, INVOICE.as_bytes().to_vec())]);
    let mut mailbox = mailbox(&store, MessageContext::default());
    mailbox.connect(Some("INBOX")).await.unwrap();
    let message = mailbox.search_messages(None).await.unwrap().remove(0);

    mailbox.select_folder("Archive").await.unwrap();
    message.get_content().await.unwrap();

    let events = store.events();
    let locked = events.iter().position(|e| e == "lock Archive").unwrap();
    let fetched = events.iter().position(|e| e == "fetch 7").unwrap();
    assert!(locked < fetched);
}

#[tokio::test]
async fn empty_payload_is_reported() {
    let store = FakeStore::with_messages([(9, Vec::new())]);
    let mut mailbox = mailbox(&store, MessageContext::default());
    mailbox.connect(Some("INBOX")).await.unwrap();
    let message = mailbox.search_messages(None).await.unwrap().remove(0);

    assert!(matches!(message.get_content().await, Err(Error::EmptyContent(id)) if id == "9"));
}
