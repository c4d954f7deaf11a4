//! Session lifecycle against a scripted backend: connection retry, release on
//! failure and the background fetch handoff.

mod common;

use common::{message, Call, ScriptedBackend};
use kobo_mail::{DevicePaths, Error, MailSession, SearchPredicate};
use std::time::Duration;

fn config() -> kobo_mail::Config {
    common::config("auto", &["epub"], DevicePaths::default())
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_succeeds() {
    let (backend, log) = ScriptedBackend::new();
    let backend = backend.failing_connects(3);

    let started = tokio::time::Instant::now();
    let session = MailSession::open(backend, &config()).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(log.count(|c| *c == Call::Connect), 4);
    assert_eq!(
        log.calls()[4..],
        [
            Call::Authenticate("reader@example.com".into()),
            Call::Select("INBOX".into())
        ]
    );
    assert_eq!(session.mailbox().name, "INBOX");
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_after_four_attempts() {
    let (backend, log) = ScriptedBackend::new();
    let backend = backend.failing_connects(4);

    let result = MailSession::open(backend, &config()).await;

    assert!(matches!(
        result,
        Err(Error::ConnectRetriesExhausted { attempts: 4, .. })
    ));
    assert_eq!(log.count(|c| *c == Call::Connect), 4);
    assert_eq!(log.count(|c| matches!(c, Call::Authenticate(_))), 0);
}

#[tokio::test]
async fn test_login_failure_releases_connection() {
    let (backend, log) = ScriptedBackend::new();
    let backend = backend.rejecting_login();

    let result = MailSession::open(backend, &config()).await;

    assert!(matches!(result, Err(Error::AuthTimeout { .. })));
    assert_eq!(
        log.calls(),
        vec![
            Call::Connect,
            Call::Authenticate("reader@example.com".into()),
            Call::Logout
        ]
    );
}

#[tokio::test]
async fn test_select_failure_releases_connection() {
    let (backend, log) = ScriptedBackend::new();
    let backend = backend.rejecting_select();

    let result = MailSession::open(backend, &config()).await;

    assert!(matches!(result, Err(Error::SelectTimeout { .. })));
    assert_eq!(
        log.calls(),
        vec![
            Call::Connect,
            Call::Authenticate("reader@example.com".into()),
            Call::Select("INBOX".into()),
            Call::Logout
        ]
    );
}

#[tokio::test]
async fn test_search_renders_predicate() {
    let (backend, log) = ScriptedBackend::new();
    let mut session = MailSession::open(backend, &config()).await.unwrap();

    let predicate = SearchPredicate::from_config(&config());
    let found = session.search(&predicate).await.unwrap();
    session.release().await;

    assert!(found.is_empty());
    assert!(log
        .calls()
        .contains(&Call::Search(r#"UNSEEN TO "reader+kobo@example.com""#.into())));
    assert_eq!(log.calls().last(), Some(&Call::Logout));
}

#[tokio::test]
async fn test_fetch_streams_in_order_and_returns_session() {
    let messages: Vec<_> = (1..=6)
        .map(|seq| message(seq, "reader+kobo@example.com", &[]))
        .collect();
    let (backend, log) = ScriptedBackend::new();
    let backend = backend.with_messages(messages);

    let session = MailSession::open(backend, &config()).await.unwrap();
    let mut stream = session.fetch(vec![1, 2, 3, 4, 5, 6]);

    let mut seen = Vec::new();
    while let Some(message) = stream.next().await {
        seen.push(message.seq);
    }
    let (session, produced) = stream.finish().await;

    assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
    assert!(produced.is_ok());
    session.unwrap().release().await;
    assert_eq!(log.calls().last(), Some(&Call::Logout));
}

#[tokio::test]
async fn test_finishing_early_stops_the_producer() {
    let messages: Vec<_> = (1..=20)
        .map(|seq| message(seq, "reader+kobo@example.com", &[]))
        .collect();
    let (backend, _log) = ScriptedBackend::new();
    let backend = backend.with_messages(messages);

    let session = MailSession::open(backend, &config()).await.unwrap();
    let mut stream = session.fetch((1..=20).collect());

    assert_eq!(stream.next().await.map(|m| m.seq), Some(1));
    let (session, produced) = stream.finish().await;

    assert!(produced.is_ok());
    assert!(session.is_some());
}
