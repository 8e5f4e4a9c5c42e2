use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use uuid::Uuid;

use crate::access;
use crate::context::AppContext;
use crate::frame::ServerFrame;
use crate::storage::{
    Channel, ChannelKind, ChannelMembership, ChannelRole, Message, Notification,
    NotificationKind, Storage, User,
};

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@([A-Za-z0-9_.]+)").unwrap());

/// Ordered, duplicate-preserving handle tokens (`@` + alphanumeric/underscore/dot)
pub fn extract_mentions(text: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Resolves handles against the user directory by exact username match.
/// Unknown handles are skipped; directory lookup failures are logged and
/// skipped so one bad handle never sinks the rest.
pub async fn resolve_mentions(storage: &dyn Storage, handles: &[String]) -> Vec<User> {
    let mut resolved = Vec::new();
    let mut seen: HashSet<Uuid> = HashSet::new();
    for handle in handles {
        match storage.get_user_by_username(handle).await {
            Ok(Some(user)) => {
                if seen.insert(user.id) {
                    resolved.push(user);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(handle = %handle, error = %e, "Mention lookup failed");
            }
        }
    }
    resolved
}

/// Mentioned user ids for denormalizing into the message row at send time:
/// handles from the content plus any client-supplied ones.
pub async fn collect_mention_ids(
    storage: &dyn Storage,
    content: &str,
    extra_handles: Option<&[String]>,
) -> Vec<Uuid> {
    let mut handles = extract_mentions(content);
    if let Some(extra) = extra_handles {
        handles.extend(extra.iter().cloned());
    }
    resolve_mentions(storage, &handles)
        .await
        .into_iter()
        .map(|u| u.id)
        .collect()
}

/// Runs the full mention pipeline for a persisted channel message.
///
/// Handles come from the content plus any client-supplied ones, the same
/// merge the send path denormalizes into the row, so the notify set always
/// equals the persisted set. Per mentioned user (author excluded,
/// deduplicated): optionally auto-join the channel, then notify and email.
/// Every side effect is an independent unit of work; a failure is logged
/// and the remaining mentions proceed.
pub async fn process_mentions(
    ctx: &AppContext,
    message: &Message,
    channel: &Channel,
    author: &User,
    extra_handles: Option<&[String]>,
) {
    let mut handles = extract_mentions(&message.content);
    if let Some(extra) = extra_handles {
        handles.extend(extra.iter().cloned());
    }
    let users = resolve_mentions(ctx.storage.as_ref(), &handles).await;

    for user in users {
        if user.id == author.id {
            continue;
        }

        maybe_auto_join(ctx, channel, author, &user).await;

        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: user.id,
            title: format!("{} mentioned you", author.display_name),
            body: message.content.clone(),
            kind: NotificationKind::Mention,
            reference_id: message.id,
            reference_kind: "message".to_string(),
            is_read: false,
            created_at: Utc::now(),
        };
        if let Err(e) = ctx.storage.insert_notification(&notification).await {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to store mention notification");
        }

        if let Err(e) = ctx
            .notifier
            .send_mention_email(
                &user.email,
                &author.display_name,
                &channel.name,
                &message.content,
            )
            .await
        {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to send mention email");
        }
    }
}

/// Joins a mentioned non-member to the channel when allowed: always for
/// public channels, for private ones only when the author can manage it.
async fn maybe_auto_join(ctx: &AppContext, channel: &Channel, author: &User, user: &User) {
    let is_member = match ctx.storage.get_membership(channel.id, user.id).await {
        Ok(membership) => membership.is_some(),
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Membership lookup failed, skipping auto-join");
            return;
        }
    };
    if is_member {
        return;
    }

    let allowed = if channel.kind == ChannelKind::Public {
        true
    } else {
        match access::can_manage_channel(
            ctx.storage.as_ref(),
            channel,
            author.id,
            &[ChannelRole::Owner, ChannelRole::Admin],
        )
        .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(error = %e, "Manage check failed, skipping auto-join");
                return;
            }
        }
    };
    if !allowed {
        tracing::debug!(
            user_id = %user.id,
            channel_id = %channel.id,
            "Mentioned user not auto-joined to private channel"
        );
        return;
    }

    let membership = ChannelMembership {
        channel_id: channel.id,
        user_id: user.id,
        role: ChannelRole::Member,
        joined_at: Utc::now(),
        last_read_at: None,
    };
    if let Err(e) = ctx.storage.insert_membership(&membership).await {
        tracing::warn!(user_id = %user.id, error = %e, "Auto-join insert failed");
        return;
    }

    tracing::info!(user_id = %user.id, channel = %channel.name, "Auto-joined mentioned user");

    let notification = Notification {
        id: Uuid::new_v4(),
        user_id: user.id,
        title: format!("Added to #{}", channel.name),
        body: format!("{} added you to #{}", author.display_name, channel.name),
        kind: NotificationKind::ChannelAdded,
        reference_id: channel.id,
        reference_kind: "channel".to_string(),
        is_read: false,
        created_at: Utc::now(),
    };
    if let Err(e) = ctx.storage.insert_notification(&notification).await {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to store channel-added notification");
    }

    if let Err(e) = ctx
        .notifier
        .send_channel_added_email(&user.email, &author.display_name, &channel.name)
        .await
    {
        tracing::warn!(user_id = %user.id, error = %e, "Failed to send channel-added email");
    }

    crate::distribution::broadcast_to_channel(
        ctx,
        channel,
        &ServerFrame::ChannelMemberAdded {
            channel_id: channel.id,
            member: membership,
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ordered_duplicate_preserving_handles() {
        let handles = extract_mentions("hello @alice and @bob, cc @alice");
        assert_eq!(handles, vec!["alice", "bob", "alice"]);
    }

    #[test]
    fn accepts_underscore_and_dot_handles() {
        let handles = extract_mentions("ping @dev_ops.lead about the rollout");
        assert_eq!(handles, vec!["dev_ops.lead"]);
    }

    #[test]
    fn ignores_bare_at_signs() {
        assert!(extract_mentions("meet @ noon, email me @ work").is_empty());
    }
}
