mod test_utils;

use huddle_server::access;
use huddle_server::storage::{ChannelKind, ChannelRole};
use test_utils::*;
use uuid::Uuid;

#[tokio::test]
async fn public_channel_is_readable_by_anyone() {
    let h = harness();
    let owner = make_user(&h.storage, "owner", false).await;
    let stranger = make_user(&h.storage, "stranger", false).await;
    let channel = make_channel(&h.storage, "general", ChannelKind::Public, &owner).await;

    assert!(
        access::can_receive_channel_message(h.storage.as_ref(), &channel, stranger.id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn private_channel_requires_membership_or_admin() {
    let h = harness();
    let owner = make_user(&h.storage, "owner", false).await;
    let member = make_user(&h.storage, "member", false).await;
    let outsider = make_user(&h.storage, "outsider", false).await;
    let admin = make_user(&h.storage, "root", true).await;
    let channel = make_channel(&h.storage, "secret", ChannelKind::Private, &owner).await;
    join_channel(&h.storage, &channel, &member, ChannelRole::Member).await;

    let storage = h.storage.as_ref();
    assert!(access::can_receive_channel_message(storage, &channel, member.id)
        .await
        .unwrap());
    assert!(access::can_receive_channel_message(storage, &channel, owner.id)
        .await
        .unwrap());
    assert!(access::can_receive_channel_message(storage, &channel, admin.id)
        .await
        .unwrap());
    assert!(!access::can_receive_channel_message(storage, &channel, outsider.id)
        .await
        .unwrap());
}

#[tokio::test]
async fn manage_requires_role_or_global_admin_flag() {
    let h = harness();
    let owner = make_user(&h.storage, "owner", false).await;
    let member = make_user(&h.storage, "member", false).await;
    let admin = make_user(&h.storage, "root", true).await;
    let channel = make_channel(&h.storage, "planning", ChannelKind::Private, &owner).await;
    join_channel(&h.storage, &channel, &member, ChannelRole::Member).await;

    let storage = h.storage.as_ref();
    let roles = [ChannelRole::Owner, ChannelRole::Admin];

    assert!(access::can_manage_channel(storage, &channel, owner.id, &roles)
        .await
        .unwrap());
    assert!(!access::can_manage_channel(storage, &channel, member.id, &roles)
        .await
        .unwrap());
    // escalation comes from the user flag, not from a membership row
    assert!(access::can_manage_channel(storage, &channel, admin.id, &roles)
        .await
        .unwrap());
}

#[tokio::test]
async fn direct_messages_are_party_scoped() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();

    assert!(access::can_receive_direct_message(a, b, a));
    assert!(access::can_receive_direct_message(a, b, b));
    assert!(!access::can_receive_direct_message(a, b, c));
}
