mod test_utils;

use huddle_server::distribution;
use huddle_server::frame::NewChannelMessage;
use huddle_server::mentions;
use huddle_server::storage::{ChannelKind, ChannelRole, NotificationKind, Storage};
use test_utils::*;

fn message(content: &str) -> NewChannelMessage {
    NewChannelMessage {
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn resolve_skips_unknown_handles() {
    let h = harness();
    let alice = make_user(&h.storage, "alice", false).await;
    make_user(&h.storage, "bob", false).await;

    let handles = vec!["alice".to_string(), "ghost".to_string()];
    let resolved = mentions::resolve_mentions(h.storage.as_ref(), &handles).await;

    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].id, alice.id);
}

#[tokio::test]
async fn repeated_mentions_notify_once_per_user() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let alice = make_user(&h.storage, "alice", false).await;
    let bob = make_user(&h.storage, "bob", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;

    distribution::send_channel_message(
        &h.ctx,
        author.id,
        channel.id,
        message("hello @alice and @bob, cc @alice"),
    )
    .await
    .unwrap();
    settle().await;

    let to_alice = h.storage.notifications_for(alice.id).await;
    let to_bob = h.storage.notifications_for(bob.id).await;
    assert_eq!(
        to_alice
            .iter()
            .filter(|n| n.kind == NotificationKind::Mention)
            .count(),
        1
    );
    assert_eq!(
        to_bob
            .iter()
            .filter(|n| n.kind == NotificationKind::Mention)
            .count(),
        1
    );
    assert_eq!(h.notifier.emails_to("alice@example.com"), 1);
    assert_eq!(h.notifier.emails_to("bob@example.com"), 1);
}

#[tokio::test]
async fn client_supplied_handles_are_notified_like_content_mentions() {
    let h = harness();
    let author = make_user(&h.storage, "author", false).await;
    let alice = make_user(&h.storage, "alice", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;

    // no @ token in the content; the handle arrives only in the payload field
    let view = distribution::send_channel_message(
        &h.ctx,
        author.id,
        channel.id,
        NewChannelMessage {
            content: "heads up, release moved to friday".to_string(),
            mentions: Some(vec!["alice".to_string()]),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    settle().await;

    assert!(view.message.mentions.contains(&alice.id));

    // the notify set matches the persisted set
    let kinds: Vec<NotificationKind> = h
        .storage
        .notifications_for(alice.id)
        .await
        .iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationKind::Mention]);
    assert_eq!(h.notifier.emails_to("alice@example.com"), 1);
}

#[tokio::test]
async fn author_is_never_notified_about_self_mention() {
    let h = harness();
    let author = make_user(&h.storage, "selfie", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &author).await;

    distribution::send_channel_message(
        &h.ctx,
        author.id,
        channel.id,
        message("note to @selfie: buy milk"),
    )
    .await
    .unwrap();
    settle().await;

    assert!(h.storage.notifications_for(author.id).await.is_empty());
    assert_eq!(h.notifier.emails_to("selfie@example.com"), 0);
}

#[tokio::test]
async fn mentioned_outsider_is_auto_joined_when_author_can_manage() {
    let h = harness();
    let owner = make_user(&h.storage, "owner", false).await;
    let alice = make_user(&h.storage, "alice", false).await;
    let channel = make_channel(&h.storage, "secret", ChannelKind::Private, &owner).await;

    distribution::send_channel_message(&h.ctx, owner.id, channel.id, message("welcome @alice"))
        .await
        .unwrap();
    settle().await;

    let membership = h
        .storage
        .get_membership(channel.id, alice.id)
        .await
        .unwrap();
    assert!(matches!(membership, Some(m) if m.role == ChannelRole::Member));

    let kinds: Vec<NotificationKind> = h
        .storage
        .notifications_for(alice.id)
        .await
        .iter()
        .map(|n| n.kind)
        .collect();
    assert!(kinds.contains(&NotificationKind::ChannelAdded));
    assert!(kinds.contains(&NotificationKind::Mention));
}

#[tokio::test]
async fn plain_member_cannot_auto_join_others_into_private_channel() {
    let h = harness();
    let owner = make_user(&h.storage, "owner", false).await;
    let member = make_user(&h.storage, "member", false).await;
    let alice = make_user(&h.storage, "alice", false).await;
    let channel = make_channel(&h.storage, "secret", ChannelKind::Private, &owner).await;
    join_channel(&h.storage, &channel, &member, ChannelRole::Member).await;

    distribution::send_channel_message(&h.ctx, member.id, channel.id, message("ping @alice"))
        .await
        .unwrap();
    settle().await;

    assert!(h
        .storage
        .get_membership(channel.id, alice.id)
        .await
        .unwrap()
        .is_none());

    // the mention notification is still created for the non-member
    let kinds: Vec<NotificationKind> = h
        .storage
        .notifications_for(alice.id)
        .await
        .iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(kinds, vec![NotificationKind::Mention]);
}
