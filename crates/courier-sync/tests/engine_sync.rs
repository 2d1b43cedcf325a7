mod common;

use std::time::Duration;

use courier_shared::{ConnectionStatus, ConversationTarget, MessageId, PushEvent};
use courier_sync::SyncEvent;

use common::{at, drain, ids, msg, other, page, settle, Harness};

#[tokio::test(start_paused = true)]
async fn test_initial_load_then_polling_while_disconnected() {
    let h = Harness::new(ConnectionStatus::Disconnected, false);
    h.api.set_page(
        ConversationTarget::Own,
        1,
        page(vec![msg("m1", 1), msg("m2", 2)], false),
    );

    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    assert_eq!(ids(&h.sync), vec!["m1", "m2"]);
    assert!(h.sync.is_polling());
    assert!(!h.sync.is_loading());
    assert_eq!(h.sync.last_message_timestamp(), Some(at(2)));
    assert!(h.push.subscriptions().is_empty());

    h.api.queue_poll(vec![msg("m3", 3)]);
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(ids(&h.sync), vec!["m1", "m2", "m3"]);
    let poll = h.api.queries().pop().unwrap();
    assert_eq!(poll.after, Some(at(2)));
    assert_eq!(h.sync.last_message_timestamp(), Some(at(3)));
}

#[tokio::test(start_paused = true)]
async fn test_connected_subscribes_without_polling() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    assert!(h.push.is_subscribed(&Harness::own_channel()));
    assert!(!h.sync.is_polling());

    tokio::time::sleep(Duration::from_secs(30)).await;
    // Only the initial fetch.
    assert_eq!(h.api.list_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_changes_switch_transport() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    let mut events = h.sync.events();
    h.sync.start(ConversationTarget::Own).await;
    settle().await;
    drain(&mut events);

    h.push.set_status(ConnectionStatus::Disconnected);
    settle().await;
    assert!(h.sync.is_polling());
    assert!(!h.push.is_subscribed(&Harness::own_channel()));
    assert_eq!(h.sync.connection_status(), ConnectionStatus::Disconnected);
    let seen = drain(&mut events);
    assert!(seen.contains(&SyncEvent::ConnectionChanged(ConnectionStatus::Disconnected)));
    assert!(seen.contains(&SyncEvent::PollingChanged(true)));

    h.push.set_status(ConnectionStatus::Connected);
    settle().await;
    assert!(!h.sync.is_polling());
    assert!(h.push.is_subscribed(&Harness::own_channel()));

    // The poller was stopped, so no fetch happens any more.
    let before = h.api.list_count();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.api.list_count(), before);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_is_exposed() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    h.push
        .set_state(courier_shared::ConnectionState::failed("socket closed"));
    settle().await;

    assert_eq!(h.sync.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(h.sync.connection_error().as_deref(), Some("socket closed"));
    assert!(h.sync.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_message_from_poll_and_push_is_stored_once() {
    let h = Harness::new(ConnectionStatus::Disconnected, false);
    let first: Vec<_> = (1..=4).map(|i| msg(&format!("m{i}"), i)).collect();
    h.api.set_page(ConversationTarget::Own, 1, page(first, false));
    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    h.api.queue_poll(vec![msg("m5", 5)]);
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(ids(&h.sync).last().map(String::as_str), Some("m5"));

    h.push.set_status(ConnectionStatus::Connected);
    settle().await;
    let mut events = h.sync.events();
    assert!(h
        .push
        .publish(&Harness::own_channel(), PushEvent::MessageSent(msg("m5", 5))));

    let m5 = ids(&h.sync).iter().filter(|id| *id == "m5").count();
    assert_eq!(m5, 1);
    assert_eq!(h.sync.messages().len(), 5);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_push_appends_and_marks_read() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.api
        .set_page(ConversationTarget::Own, 1, page(vec![msg("m1", 1)], false));
    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    let channel = Harness::own_channel();
    h.push.publish(&channel, PushEvent::MessageSent(msg("m2", 2)));
    assert_eq!(ids(&h.sync), vec!["m1", "m2"]);
    assert_eq!(h.sync.last_message_timestamp(), Some(at(2)));

    h.push.publish(
        &channel,
        PushEvent::MessageRead {
            message_id: MessageId::confirmed("m1"),
            read_at: at(9),
        },
    );
    assert_eq!(h.sync.messages()[0].read_at, Some(at(9)));

    // Unknown ids are ignored.
    h.push.publish(
        &channel,
        PushEvent::MessageRead {
            message_id: MessageId::confirmed("ghost"),
            read_at: at(9),
        },
    );
    assert_eq!(ids(&h.sync), vec!["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_failure_keeps_polling() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.push.reject_subscriptions(Some("forbidden".into()));

    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    assert_eq!(h.sync.connection_status(), ConnectionStatus::Connected);
    assert!(h.sync.is_polling());
    let error = h.sync.error().unwrap();
    assert!(error.contains("forbidden"), "{error}");

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    // Initial fetch plus one poll.
    assert_eq!(h.api.list_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pagination_over_three_pages() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    let range = |from: i64, to: i64| -> Vec<_> {
        (from..=to).map(|i| msg(&format!("m{i:02}"), i)).collect()
    };
    h.api
        .set_page(ConversationTarget::Own, 1, page(range(23, 37), true));
    h.api
        .set_page(ConversationTarget::Own, 2, page(range(8, 22), true));
    h.api
        .set_page(ConversationTarget::Own, 3, page(range(1, 7), false));

    h.sync.start(ConversationTarget::Own).await;
    settle().await;
    assert_eq!(h.sync.messages().len(), 15);
    assert!(h.sync.has_more_messages());

    h.sync.load_more_messages().await.unwrap();
    assert_eq!(h.sync.messages().len(), 30);
    h.sync.load_more_messages().await.unwrap();
    assert_eq!(h.sync.messages().len(), 37);
    assert!(!h.sync.has_more_messages());

    let expected: Vec<String> = (1..=37).map(|i| format!("m{i:02}")).collect();
    assert_eq!(ids(&h.sync), expected);
    assert_eq!(h.sync.last_message_timestamp(), Some(at(37)));

    let calls = h.api.list_count();
    h.sync.load_more_messages().await.unwrap();
    assert_eq!(h.api.list_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_initial_fetch_failure_surfaces_error() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.api.fail_lists(true);
    let mut events = h.sync.events();

    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    assert!(h.sync.messages().is_empty());
    assert!(!h.sync.is_loading());
    let error = h.sync.error().unwrap();
    assert!(error.starts_with("Failed to load messages"), "{error}");
    let errors = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);

    h.api.fail_lists(false);
    h.api
        .set_page(ConversationTarget::Own, 1, page(vec![msg("m1", 1)], false));
    h.sync.load_initial().await.unwrap();
    assert_eq!(ids(&h.sync), vec!["m1"]);
    assert_eq!(h.sync.error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_poll_failures_are_not_surfaced() {
    let h = Harness::new(ConnectionStatus::Disconnected, false);
    h.api
        .set_page(ConversationTarget::Own, 1, page(vec![msg("m1", 1)], false));
    h.sync.start(ConversationTarget::Own).await;
    settle().await;
    assert_eq!(ids(&h.sync), vec!["m1"]);

    let mut events = h.sync.events();
    h.api.fail_lists(true);
    tokio::time::sleep(Duration::from_secs(15)).await;
    settle().await;

    // Three failed polls, each logged and otherwise ignored.
    assert_eq!(h.api.list_count(), 4);
    assert_eq!(h.sync.error(), None);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, SyncEvent::Error(_))));
    assert!(h.sync.is_polling());
    assert_eq!(ids(&h.sync), vec!["m1"]);
    assert_eq!(h.sync.last_message_timestamp(), Some(at(1)));
}

#[tokio::test(start_paused = true)]
async fn test_older_page_failure_surfaces_error() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.api
        .set_page(ConversationTarget::Own, 1, page(vec![msg("m2", 2)], true));
    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    let mut events = h.sync.events();
    h.api.fail_lists(true);
    let err = h.sync.load_more_messages().await.unwrap_err();

    assert!(err.to_string().starts_with("Failed to load messages"), "{err}");
    assert_eq!(h.sync.error(), Some(err.to_string()));
    assert!(!h.sync.is_loading());
    // The cursor did not move, so the page can be requested again.
    assert!(h.sync.has_more_messages());
    assert_eq!(ids(&h.sync), vec!["m2"]);
    let seen = drain(&mut events);
    let errors = seen
        .iter()
        .filter(|e| matches!(e, SyncEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
    assert!(seen.contains(&SyncEvent::LoadingChanged(false)));

    h.api.fail_lists(false);
    h.api
        .set_page(ConversationTarget::Own, 2, page(vec![msg("m1", 1)], false));
    h.sync.load_more_messages().await.unwrap();
    assert_eq!(ids(&h.sync), vec!["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn test_load_more_ignored_while_loading() {
    let h = Harness::new(ConnectionStatus::Connected, false);
    h.api
        .set_page(ConversationTarget::Own, 1, page(vec![msg("m2", 2)], true));
    h.api
        .set_page(ConversationTarget::Own, 2, page(vec![msg("m1", 1)], false));
    h.sync.start(ConversationTarget::Own).await;
    settle().await;

    h.api.delay_lists(Duration::from_secs(1));
    let sync = h.sync.clone();
    let first = tokio::spawn(async move { sync.load_more_messages().await });
    settle().await;
    assert!(h.sync.is_loading());

    h.sync.load_more_messages().await.unwrap();
    assert_eq!(h.api.list_count(), 2);

    first.await.unwrap().unwrap();
    assert_eq!(h.api.list_count(), 2);
    assert_eq!(ids(&h.sync), vec!["m1", "m2"]);
    assert!(!h.sync.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_target_switch_resets_conversation() {
    let h = Harness::new(ConnectionStatus::Connected, true);
    h.api.set_page(other("99"), 1, page(vec![msg("a1", 1)], true));
    h.api.set_page(other("42"), 1, page(vec![msg("b1", 2)], false));

    h.sync.start(other("99")).await;
    settle().await;
    assert!(h.push.is_subscribed("chat.99"));
    assert_eq!(ids(&h.sync), vec!["a1"]);
    assert!(h.sync.has_more_messages());

    h.sync.set_target(other("42")).await;
    assert!(!h.push.is_subscribed("chat.99"));
    assert!(h.push.is_subscribed("chat.42"));
    settle().await;

    assert_eq!(h.sync.target(), other("42"));
    assert_eq!(ids(&h.sync), vec!["b1"]);
    assert!(!h.sync.has_more_messages());
    assert_eq!(h.sync.last_message_timestamp(), Some(at(2)));
}

#[tokio::test(start_paused = true)]
async fn test_stale_fetch_discarded_after_switch() {
    let h = Harness::new(ConnectionStatus::Disconnected, true);
    h.api.set_page(other("99"), 1, page(vec![msg("a1", 1)], false));

    h.sync.start(other("99")).await;
    // Switch before the spawned first fetch for 99 had a chance to land.
    h.sync.set_target(other("42")).await;
    settle().await;

    assert_eq!(h.sync.target(), other("42"));
    assert!(ids(&h.sync).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_background_work() {
    let h = Harness::new(ConnectionStatus::Disconnected, false);
    h.sync.start(ConversationTarget::Own).await;
    settle().await;
    assert!(h.sync.is_polling());

    h.sync.shutdown().await;
    assert!(!h.sync.is_polling());
    let calls = h.api.list_count();

    tokio::time::sleep(Duration::from_secs(30)).await;
    h.push.set_status(ConnectionStatus::Connected);
    settle().await;

    assert_eq!(h.api.list_count(), calls);
    assert!(h.push.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_after_shutdown_does_not_watch_connection() {
    let h = Harness::new(ConnectionStatus::Disconnected, false);
    h.sync.start(ConversationTarget::Own).await;
    settle().await;
    assert_eq!(h.push.watcher_count(), 1);

    h.sync.shutdown().await;
    settle().await;
    assert_eq!(h.push.watcher_count(), 0);

    h.sync.start(ConversationTarget::Own).await;
    settle().await;
    assert_eq!(h.push.watcher_count(), 0);
    assert!(!h.sync.is_polling());
}
