mod test_utils;

use std::time::Duration;
use test_utils::*;

use huddle_server::distribution;
use huddle_server::error::AppError;
use huddle_server::frame::{NewChannelMessage, ServerFrame};
use huddle_server::storage::ChannelKind;

fn message(content: &str) -> NewChannelMessage {
    NewChannelMessage {
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn probe_results_are_debounced_globally() {
    let h = harness();

    assert!(h.ctx.availability.check_availability().await);
    assert_eq!(h.storage.probe_count(), 1);

    // the outage is invisible until the debounce window elapses
    h.storage.set_available(false);
    assert!(h.ctx.availability.check_availability().await);
    assert!(h.ctx.availability.check_availability().await);
    assert_eq!(h.storage.probe_count(), 1, "window hits share one probe");

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!h.ctx.availability.check_availability().await);
    assert_eq!(h.storage.probe_count(), 2);

    // recovery is likewise deferred to the next real probe
    h.storage.set_available(true);
    assert!(!h.ctx.availability.check_availability().await);
    assert_eq!(h.storage.probe_count(), 2);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(h.ctx.availability.check_availability().await);
    assert_eq!(h.storage.probe_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn transitions_broadcast_database_status_to_connected_clients() {
    let h = harness();
    let user = make_user(&h.storage, "watcher", false).await;
    let mut rx = connect(&h.ctx, &user).await;

    h.ctx.availability.check_availability().await;
    assert!(drain(&mut rx).is_empty(), "steady state is silent");

    h.storage.set_available(false);
    tokio::time::advance(Duration::from_secs(31)).await;
    h.ctx.availability.check_availability().await;

    let frames = drain(&mut rx);
    assert!(frames
        .iter()
        .any(|f| matches!(f, ServerFrame::DatabaseStatus { connected: false, .. })));

    h.storage.set_available(true);
    tokio::time::advance(Duration::from_secs(31)).await;
    h.ctx.availability.check_availability().await;
    settle().await;

    let frames = drain(&mut rx);
    assert!(frames
        .iter()
        .any(|f| matches!(f, ServerFrame::DatabaseStatus { connected: true, .. })));
}

#[tokio::test]
async fn degraded_history_serves_public_channels_from_cache_only() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let public = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;
    let private = make_channel(&h.storage, "secret", ChannelKind::Private, &author).await;

    distribution::send_channel_message(&h.ctx, author.id, public.id, message("still here"))
        .await
        .unwrap();
    distribution::send_channel_message(&h.ctx, author.id, private.id, message("hidden"))
        .await
        .unwrap();
    settle().await;

    // first-page reads populate the degraded-mode copy
    distribution::channel_history(&h.ctx, author.id, public.id, None, 50)
        .await
        .unwrap();
    distribution::channel_history(&h.ctx, author.id, private.id, None, 50)
        .await
        .unwrap();

    h.storage.set_available(false);

    let cached = distribution::channel_history(&h.ctx, author.id, public.id, None, 50)
        .await
        .expect("public history from cache");
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].message.content, "still here");

    // membership cannot be verified while storage is down
    let denied = distribution::channel_history(&h.ctx, author.id, private.id, None, 50).await;
    assert!(matches!(denied, Err(AppError::Persistence(_))));
}

#[tokio::test]
async fn uncached_channel_is_not_served_while_degraded() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let channel = make_channel(&h.storage, "never-read", ChannelKind::Public, &author).await;

    h.storage.set_available(false);
    let result = distribution::channel_history(&h.ctx, author.id, channel.id, None, 50).await;
    assert!(matches!(result, Err(AppError::Persistence(_))));
}

#[tokio::test]
async fn channel_listing_falls_back_to_last_good_answer() {
    let h = harness();
    let user = make_user(&h.storage, "reader", false).await;
    make_channel(&h.storage, "general", ChannelKind::Public, &user).await;

    let live = distribution::list_channels(&h.ctx, user.id).await.unwrap();
    assert_eq!(live.len(), 1);

    h.storage.set_available(false);
    let cached = distribution::list_channels(&h.ctx, user.id).await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].name, "general");

    // a user who never listed while storage was up gets the hard error
    let stranger = uuid::Uuid::new_v4();
    assert!(matches!(
        distribution::list_channels(&h.ctx, stranger).await,
        Err(AppError::Persistence(_))
    ));
}
