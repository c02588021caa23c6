//! Graph adapter driven through the mailbox facade against a fake service.

#![allow(clippy::unwrap_used)]

mod common;

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{FakeGraph, jwt};
use mailbot::backend::graph::{CachedToken, GraphBackend, TokenCache};
use mailbot::message::MessageContext;
use mailbot::{Error, FeatureFlags, GraphSettings, Mailbox, MailboxConfig, SearchCriteria};
use serde_json::json;

fn settings(cache: Option<&Path>) -> GraphSettings {
    let config: MailboxConfig = serde_json::from_value(json!({
        "msGraph": {
            "auth": {
                "tenantId": "tenant",
                "clientId": "client",
                "clientSecret": "secret",
                "user": "bot@x.com"
            },
            "tokenCachePath": cache
        }
    }))
    .unwrap();
    config.ms_graph.unwrap()
}

fn mailbox(api: &Arc<FakeGraph>, cache: Option<&Path>, flags: FeatureFlags) -> Mailbox {
    let context = Arc::new(MessageContext {
        flags,
        ..MessageContext::default()
    });
    let backend = GraphBackend::with_api(settings(cache), None, context, Arc::clone(api) as _);
    Mailbox::with_backend(Box::new(backend))
}

fn message(id: &str, from: &str, body: &str) -> serde_json::Value {
    json!({
        "id": id,
        "subject": "Invoice",
        "from": { "emailAddress": { "address": from } },
        "body": { "contentType": "text", "content": body },
        "receivedDateTime": "2024-01-01T10:00:00Z",
        "sentDateTime": "2024-01-01T09:59:00Z",
        "isRead": false
    })
}

#[tokio::test]
async fn native_filter_and_post_filter_agree_on_sender() {
    let api = Arc::new(FakeGraph::with_messages(vec![
        message("M1", "a@x.com", "invoice attached"),
        message("M2", "A@x.com.evil", "invoice attached"),
        message("M3", "b@x.com", "invoice attached"),
    ]));
    let mut mailbox = mailbox(&api, None, FeatureFlags::default());
    mailbox.connect(Some("INBOX")).await.unwrap();

    let criteria = SearchCriteria::new()
        .with_from("a@x.com")
        .with_subject("invoice")
        .with_since(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let messages = mailbox.search_messages(Some(&criteria)).await.unwrap();

    assert_eq!(
        api.filter(0).unwrap(),
        "from/emailAddress/address eq 'a@x.com' and contains(subject,'invoice') and \
         receivedDateTime ge 2024-01-01T00:00:00Z and receivedDateTime lt 2024-01-03T00:00:00Z"
    );
    let ids: Vec<String> = messages.iter().map(|m| m.id().to_string()).collect();
    assert_eq!(ids, ["M1"]);
    assert_eq!(messages[0].meta().seen, Some(false));
}

#[tokio::test]
async fn disabled_body_filter_skips_query_and_post_filter() {
    let api = Arc::new(FakeGraph::with_messages(vec![message("M1", "a@x.com", "other")]));
    let mut mailbox = mailbox(&api, None, FeatureFlags::default().without_body_filter());
    mailbox.connect(Some("inbox")).await.unwrap();

    let criteria = SearchCriteria::new().with_body("total");
    let messages = mailbox.search_messages(Some(&criteria)).await.unwrap();

    assert_eq!(api.filter(0), None);
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn body_post_filter_drops_non_matching_messages() {
    let api = Arc::new(FakeGraph::with_messages(vec![
        message("M1", "a@x.com", "Total\n\n  DUE 100"),
        message("M2", "a@x.com", "nothing to pay"),
    ]));
    let mut mailbox = mailbox(&api, None, FeatureFlags::default());
    mailbox.connect(Some("inbox")).await.unwrap();

    let criteria = SearchCriteria::new().with_body("total due");
    let messages = mailbox.search_messages(Some(&criteria)).await.unwrap();

    assert!(api.filter(0).unwrap().contains("contains(body/content,'total due')"));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id().to_string(), "M1");
}

#[tokio::test]
async fn valid_cached_token_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    TokenCache::new(Some(path.clone()))
        .store(&CachedToken::new(jwt(Utc::now() + Duration::hours(1))))
        .await
        .unwrap();

    let api = Arc::new(FakeGraph::default());
    let mut mailbox = mailbox(&api, Some(&path), FeatureFlags::default());
    mailbox.connect(Some("inbox")).await.unwrap();
    mailbox.search_messages(None).await.unwrap();

    assert_eq!(api.acquired(), 0);
    assert!(mailbox.connection_info().authenticated);
}

#[tokio::test]
async fn expiring_cached_token_is_refreshed_once_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("token.json");
    let stale = CachedToken::new(jwt(Utc::now() + Duration::minutes(2)));
    TokenCache::new(Some(path.clone())).store(&stale).await.unwrap();

    let api = Arc::new(FakeGraph::default());
    let mut mailbox = mailbox(&api, Some(&path), FeatureFlags::default());
    mailbox.connect(Some("inbox")).await.unwrap();
    mailbox.search_messages(None).await.unwrap();
    mailbox.search_messages(None).await.unwrap();

    assert_eq!(api.acquired(), 1);
    let stored = TokenCache::new(Some(path)).load().await.unwrap();
    assert_ne!(stored.access_token, stale.access_token);
}

#[tokio::test]
async fn short_lived_token_is_refreshed_before_use() {
    let api = Arc::new(FakeGraph {
        token_lifetime: Duration::minutes(1),
        ..FakeGraph::default()
    });
    let mut mailbox = mailbox(&api, None, FeatureFlags::default());
    mailbox.connect(Some("inbox")).await.unwrap();
    assert_eq!(api.acquired(), 1);

    mailbox.search_messages(None).await.unwrap();
    assert_eq!(api.acquired(), 2);
}

#[tokio::test]
async fn failed_token_request_is_an_authentication_error() {
    let api = Arc::new(FakeGraph {
        fail_auth: true,
        ..FakeGraph::default()
    });
    let mut mailbox = mailbox(&api, None, FeatureFlags::default());
    assert!(matches!(
        mailbox.connect(None).await,
        Err(Error::Authentication(_))
    ));
    assert!(!mailbox.connection_info().authenticated);
}

#[tokio::test]
async fn search_requires_token_then_folder() {
    let api = Arc::new(FakeGraph::default());
    let mut mailbox = mailbox(&api, None, FeatureFlags::default());

    assert!(matches!(mailbox.search_messages(None).await, Err(Error::NotConnected)));
    mailbox.connect(None).await.unwrap();
    assert!(matches!(mailbox.search_messages(None).await, Err(Error::NoFolderSelected)));

    mailbox.select_folder("Sent").await.unwrap();
    mailbox.search_messages(None).await.unwrap();
    assert!(api.urls()[0].contains("mailFolders('sentitems')"));
    assert_eq!(mailbox.connection_info().folder.as_deref(), Some("sentitems"));

    mailbox.disconnect().await.unwrap();
    assert!(matches!(mailbox.search_messages(None).await, Err(Error::NotConnected)));
}
