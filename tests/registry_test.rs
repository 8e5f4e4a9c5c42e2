mod test_utils;

use test_utils::*;

use huddle_server::distribution;
use huddle_server::frame::{NewChannelMessage, ServerFrame};
use huddle_server::registry::Outbound;
use huddle_server::storage::ChannelKind;

fn message(content: &str) -> NewChannelMessage {
    NewChannelMessage {
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn superseded_connection_is_closed_and_stops_receiving() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let reader = make_user(&h.storage, "reader", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;

    let mut old_rx = connect(&h.ctx, &reader).await;
    let mut new_rx = connect(&h.ctx, &reader).await;
    assert_eq!(h.ctx.registry.online_count().await, 1);

    // the old socket is told why, then told to close
    assert!(matches!(
        old_rx.try_recv(),
        Ok(Outbound::Frame(ServerFrame::Error { .. }))
    ));
    assert!(matches!(old_rx.try_recv(), Ok(Outbound::Close)));

    distribution::send_channel_message(&h.ctx, author.id, channel.id, message("fresh"))
        .await
        .unwrap();
    settle().await;

    assert!(drain(&mut old_rx).is_empty());
    let delivered = drain(&mut new_rx)
        .iter()
        .filter(|f| matches!(f, ServerFrame::NewChannelMessage { .. }))
        .count();
    assert_eq!(delivered, 1, "exactly one copy, no duplicates from the stale entry");
}

#[tokio::test]
async fn dead_receiver_never_blocks_delivery_to_others() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let alive = make_user(&h.storage, "alive", false).await;
    let gone = make_user(&h.storage, "gone", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;

    let mut alive_rx = connect(&h.ctx, &alive).await;
    let gone_rx = connect(&h.ctx, &gone).await;
    drop(gone_rx);

    distribution::send_channel_message(&h.ctx, author.id, channel.id, message("hello"))
        .await
        .unwrap();
    settle().await;

    assert!(drain(&mut alive_rx)
        .iter()
        .any(|f| matches!(f, ServerFrame::NewChannelMessage { .. })));
}

#[tokio::test]
async fn unregister_removes_only_the_matching_connection() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let reader = make_user(&h.storage, "reader", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;

    let _old_rx = connect(&h.ctx, &reader).await;
    let old_id = h.ctx.registry.lookup(reader.id).await.unwrap().connection_id;
    let mut new_rx = connect(&h.ctx, &reader).await;

    // the superseded socket's cleanup must not evict its replacement
    h.ctx.registry.unregister(reader.id, old_id).await;
    assert!(h.ctx.registry.lookup(reader.id).await.is_some());

    distribution::send_channel_message(&h.ctx, author.id, channel.id, message("still on"))
        .await
        .unwrap();
    settle().await;
    assert!(drain(&mut new_rx)
        .iter()
        .any(|f| matches!(f, ServerFrame::NewChannelMessage { .. })));

    let current_id = h.ctx.registry.lookup(reader.id).await.unwrap().connection_id;
    h.ctx.registry.unregister(reader.id, current_id).await;
    assert!(h.ctx.registry.lookup(reader.id).await.is_none());
    assert_eq!(h.ctx.registry.online_count().await, 0);
}

#[tokio::test]
async fn direct_typing_indicator_reaches_only_the_named_receiver() {
    let h = harness();
    let typist = make_user(&h.storage, "typist", false).await;
    let receiver = make_user(&h.storage, "receiver", false).await;
    let bystander = make_user(&h.storage, "bystander", false).await;

    let mut typist_rx = connect(&h.ctx, &typist).await;
    let mut receiver_rx = connect(&h.ctx, &receiver).await;
    let mut bystander_rx = connect(&h.ctx, &bystander).await;

    huddle_server::presence::publish_typing(
        &h.ctx,
        typist.id,
        &typist.username,
        huddle_server::presence::TypingTarget::Direct {
            receiver_id: receiver.id,
        },
        true,
    )
    .await
    .unwrap();

    assert!(drain(&mut receiver_rx).iter().any(|f| matches!(
        f,
        ServerFrame::TypingIndicator {
            is_typing: true,
            channel_id: None,
            ..
        }
    )));
    assert!(drain(&mut bystander_rx).is_empty());
    assert!(drain(&mut typist_rx).is_empty());
}

#[tokio::test]
async fn typing_indicator_reaches_channel_members_but_not_the_typist() {
    let h = harness();
    let typist = make_user(&h.storage, "typist", false).await;
    let watcher = make_user(&h.storage, "watcher", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &typist).await;

    let mut typist_rx = connect(&h.ctx, &typist).await;
    let mut watcher_rx = connect(&h.ctx, &watcher).await;

    huddle_server::presence::publish_typing(
        &h.ctx,
        typist.id,
        &typist.username,
        huddle_server::presence::TypingTarget::Channel {
            channel_id: channel.id,
        },
        true,
    )
    .await
    .unwrap();

    assert!(drain(&mut watcher_rx).iter().any(|f| matches!(
        f,
        ServerFrame::TypingIndicator { is_typing: true, .. }
    )));
    assert!(drain(&mut typist_rx).is_empty(), "no echo back to the typist");
}
