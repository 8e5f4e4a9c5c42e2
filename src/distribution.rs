use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::access;
use crate::config::MAX_CONTENT_LENGTH;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::frame::{NewChannelMessage, NewDirectMessage, ServerFrame};
use crate::mentions;
use crate::metrics;
use crate::storage::{
    Channel, ChannelMembership, ChannelRole, DirectMessage, DirectMessageView, Message,
    MessageKind, MessageView, Notification, NotificationKind, User,
};

// ============================================================================
// Shared send operations
//
// The HTTP routes and the socket handlers are thin adapters over these, so
// persistence, the mention pipeline and broadcast cannot diverge between the
// two entry points.
// ============================================================================

/// Validate → persist → enrich → (spawned) mentions → broadcast.
/// A persistence failure aborts before any broadcast; mention, notification
/// and email side effects never block or fail the send.
pub async fn send_channel_message(
    ctx: &AppContext,
    author_id: Uuid,
    channel_id: Uuid,
    new: NewChannelMessage,
) -> AppResult<MessageView> {
    validate_content(&new.content, new.file_id.as_deref())?;

    let channel = require_channel(ctx, channel_id).await?;
    let author = require_user(ctx, author_id).await?;

    if !access::can_receive_channel_message(ctx.storage.as_ref(), &channel, author_id).await? {
        return Err(AppError::Authorization(
            "You are not a member of this channel".to_string(),
        ));
    }

    if let Some(parent_id) = new.parent_id {
        let parent = ctx
            .storage
            .get_message(parent_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Parent message not found".to_string()))?;
        if parent.channel_id != channel_id {
            return Err(AppError::Validation(
                "Parent message belongs to another channel".to_string(),
            ));
        }
    }

    let mention_ids = mentions::collect_mention_ids(
        ctx.storage.as_ref(),
        &new.content,
        new.mentions.as_deref(),
    )
    .await;

    let file_url = new.file_id.as_deref().map(|id| ctx.files.url_for(id));
    let extra_handles = new.mentions.clone();
    let now = Utc::now();
    let message = Message {
        id: Uuid::new_v4(),
        channel_id,
        author_id,
        parent_id: new.parent_id,
        content: new.content,
        kind: if file_url.is_some() {
            MessageKind::File
        } else {
            MessageKind::Text
        },
        mentions: mention_ids,
        file_url,
        is_edited: false,
        created_at: now,
        updated_at: now,
    };

    ctx.storage.insert_message(&message).await?;
    metrics::MESSAGES_SENT_TOTAL.inc();

    let view = enrich(&message, &author, &channel);
    ctx.availability.cache.channels.put(channel.id, channel.clone());
    ctx.availability.cache.users.put(author.id, author.clone());

    {
        let ctx = ctx.clone();
        let message = message.clone();
        let channel = channel.clone();
        let author = author.clone();
        tokio::spawn(async move {
            mentions::process_mentions(&ctx, &message, &channel, &author, extra_handles.as_deref())
                .await;
        });
    }

    broadcast_to_channel(
        ctx,
        &channel,
        &ServerFrame::NewChannelMessage {
            message: view.clone(),
        },
    )
    .await;

    Ok(view)
}

/// Author-only (or channel admin/owner, or global admin) edit. Re-broadcasts
/// to the recipient set computed now, honoring membership changes since the
/// original send.
pub async fn edit_channel_message(
    ctx: &AppContext,
    editor_id: Uuid,
    channel_id: Uuid,
    message_id: Uuid,
    content: String,
) -> AppResult<MessageView> {
    validate_content(&content, None)?;

    let channel = require_channel(ctx, channel_id).await?;
    let message = ctx
        .storage
        .get_message(message_id)
        .await?
        .filter(|m| m.channel_id == channel_id)
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

    let allowed = message.author_id == editor_id
        || access::can_manage_channel(
            ctx.storage.as_ref(),
            &channel,
            editor_id,
            &[ChannelRole::Owner, ChannelRole::Admin],
        )
        .await?;
    if !allowed {
        return Err(AppError::Authorization(
            "Only the author or a channel admin can edit this message".to_string(),
        ));
    }

    let updated = ctx
        .storage
        .update_message_content(message_id, &content, Utc::now())
        .await?;
    let author = require_user(ctx, updated.author_id).await?;
    let view = enrich(&updated, &author, &channel);

    broadcast_to_channel(
        ctx,
        &channel,
        &ServerFrame::NewChannelMessage {
            message: view.clone(),
        },
    )
    .await;

    Ok(view)
}

pub async fn send_direct_message(
    ctx: &AppContext,
    sender_id: Uuid,
    receiver_id: Uuid,
    new: NewDirectMessage,
) -> AppResult<DirectMessageView> {
    validate_content(&new.content, new.file_id.as_deref())?;
    if sender_id == receiver_id {
        return Err(AppError::Validation(
            "Cannot send a direct message to yourself".to_string(),
        ));
    }

    let sender = require_user(ctx, sender_id).await?;
    let receiver = require_user(ctx, receiver_id).await?;

    let file_url = new.file_id.as_deref().map(|id| ctx.files.url_for(id));
    let now = Utc::now();
    let message = DirectMessage {
        id: Uuid::new_v4(),
        sender_id,
        receiver_id,
        content: new.content,
        kind: if file_url.is_some() {
            MessageKind::File
        } else {
            MessageKind::Text
        },
        file_url,
        is_read: false,
        is_edited: false,
        created_at: now,
        updated_at: now,
    };

    ctx.storage.insert_direct_message(&message).await?;
    metrics::MESSAGES_SENT_TOTAL.inc();

    let view = DirectMessageView {
        message,
        sender_username: sender.username.clone(),
        receiver_username: receiver.username.clone(),
    };

    ctx.registry
        .send_to(
            receiver_id,
            ServerFrame::NewDirectMessage {
                message: view.clone(),
            },
        )
        .await;
    ctx.registry
        .send_to(
            sender_id,
            ServerFrame::DirectMessageSent {
                message: view.clone(),
            },
        )
        .await;

    {
        let ctx = ctx.clone();
        let view = view.clone();
        let sender = sender.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            notify_direct_message(&ctx, &view, &sender, &receiver).await;
        });
    }

    Ok(view)
}

async fn notify_direct_message(
    ctx: &AppContext,
    view: &DirectMessageView,
    sender: &User,
    receiver: &User,
) {
    let notification = Notification {
        id: Uuid::new_v4(),
        user_id: receiver.id,
        title: format!("New message from {}", sender.display_name),
        body: view.message.content.clone(),
        kind: NotificationKind::DirectMessage,
        reference_id: view.message.id,
        reference_kind: "direct_message".to_string(),
        is_read: false,
        created_at: Utc::now(),
    };
    if let Err(e) = ctx.storage.insert_notification(&notification).await {
        tracing::warn!(user_id = %receiver.id, error = %e, "Failed to store direct message notification");
    }

    if let Err(e) = ctx
        .notifier
        .send_direct_message_email(&receiver.email, &sender.display_name, &view.message.content)
        .await
    {
        tracing::warn!(user_id = %receiver.id, error = %e, "Failed to send direct message email");
    }
}

// ============================================================================
// Reads
// ============================================================================

/// Top-level channel messages, newest first. Falls back to the bounded cache
/// for public channels while storage is down.
pub async fn channel_history(
    ctx: &AppContext,
    user_id: Uuid,
    channel_id: Uuid,
    before: Option<DateTime<Utc>>,
    limit: i64,
) -> AppResult<Vec<MessageView>> {
    match channel_history_live(ctx, user_id, channel_id, before, limit).await {
        Ok(views) => Ok(views),
        Err(AppError::Persistence(_)) => degraded_history(ctx, user_id, channel_id).await,
        Err(e) => Err(e),
    }
}

async fn channel_history_live(
    ctx: &AppContext,
    user_id: Uuid,
    channel_id: Uuid,
    before: Option<DateTime<Utc>>,
    limit: i64,
) -> AppResult<Vec<MessageView>> {
    let channel = require_channel(ctx, channel_id).await?;
    if !access::can_receive_channel_message(ctx.storage.as_ref(), &channel, user_id).await? {
        return Err(AppError::Authorization(
            "You cannot read this channel".to_string(),
        ));
    }

    let messages = ctx
        .storage
        .list_channel_messages(channel_id, before, limit)
        .await?;
    let views = enrich_batch(ctx, messages, &channel).await?;

    // first page doubles as the degraded-mode copy
    if before.is_none() {
        ctx.availability
            .cache
            .channel_history
            .put(channel_id, views.clone());
        ctx.availability.cache.channels.put(channel.id, channel);
    }

    if let Err(e) = ctx.storage.touch_last_read(channel_id, user_id).await {
        tracing::debug!(error = %e, "Failed to update last_read_at");
    }

    Ok(views)
}

/// Degraded read: only public channels are served from cache, because
/// membership cannot be verified while storage is down.
async fn degraded_history(
    ctx: &AppContext,
    user_id: Uuid,
    channel_id: Uuid,
) -> AppResult<Vec<MessageView>> {
    let channel = ctx
        .availability
        .cache
        .channels
        .get(&channel_id)
        .ok_or_else(|| AppError::Persistence("Storage unavailable".to_string()))?;
    if channel.kind != crate::storage::ChannelKind::Public {
        return Err(AppError::Persistence("Storage unavailable".to_string()));
    }
    tracing::info!(channel_id = %channel_id, user_id = %user_id, "Serving channel history from fallback cache");
    ctx.availability
        .cache
        .channel_history
        .get(&channel_id)
        .ok_or_else(|| AppError::Persistence("Storage unavailable".to_string()))
}

/// Replies are fetched on demand, oldest first
pub async fn message_replies(
    ctx: &AppContext,
    user_id: Uuid,
    channel_id: Uuid,
    message_id: Uuid,
) -> AppResult<Vec<MessageView>> {
    let channel = require_channel(ctx, channel_id).await?;
    if !access::can_receive_channel_message(ctx.storage.as_ref(), &channel, user_id).await? {
        return Err(AppError::Authorization(
            "You cannot read this channel".to_string(),
        ));
    }
    ctx.storage
        .get_message(message_id)
        .await?
        .filter(|m| m.channel_id == channel_id)
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

    let replies = ctx.storage.list_replies(message_id).await?;
    enrich_batch(ctx, replies, &channel).await
}

pub async fn conversation_page(
    ctx: &AppContext,
    user_id: Uuid,
    peer_id: Uuid,
    before: Option<DateTime<Utc>>,
    limit: i64,
) -> AppResult<Vec<DirectMessageView>> {
    let user = require_user(ctx, user_id).await?;
    let peer = require_user(ctx, peer_id).await?;

    let messages = ctx
        .storage
        .list_conversation(user_id, peer_id, before, limit)
        .await?;

    let views = messages
        .into_iter()
        .map(|m| {
            let (sender_username, receiver_username) = if m.sender_id == user.id {
                (user.username.clone(), peer.username.clone())
            } else {
                (peer.username.clone(), user.username.clone())
            };
            DirectMessageView {
                message: m,
                sender_username,
                receiver_username,
            }
        })
        .collect();

    Ok(views)
}

/// Explicit mark-as-read step. The conversation GET calls this before the
/// page read, preserving the observable effect; idempotent on repeat.
pub async fn mark_conversation_read(
    ctx: &AppContext,
    user_id: Uuid,
    peer_id: Uuid,
) -> AppResult<u64> {
    let marked = ctx.storage.mark_conversation_read(user_id, peer_id).await?;
    if marked > 0 {
        tracing::debug!(user_id = %user_id, peer_id = %peer_id, marked = marked, "Marked conversation read");
    }
    Ok(marked)
}

pub async fn list_conversations(
    ctx: &AppContext,
    user_id: Uuid,
) -> AppResult<Vec<crate::storage::ConversationSummary>> {
    ctx.storage.list_conversations(user_id).await
}

pub async fn unread_counts(
    ctx: &AppContext,
    user_id: Uuid,
) -> AppResult<crate::storage::UnreadCounts> {
    ctx.storage.unread_counts(user_id).await
}

pub async fn list_channels(ctx: &AppContext, user_id: Uuid) -> AppResult<Vec<Channel>> {
    match ctx.storage.list_channels_for(user_id).await {
        Ok(channels) => {
            ctx.availability
                .cache
                .channels_for_user
                .put(user_id, channels.clone());
            Ok(channels)
        }
        Err(AppError::Persistence(reason)) => ctx
            .availability
            .cache
            .channels_for_user
            .get(&user_id)
            .ok_or(AppError::Persistence(reason)),
        Err(e) => Err(e),
    }
}

pub async fn get_channel_for(ctx: &AppContext, user_id: Uuid, channel_id: Uuid) -> AppResult<Channel> {
    let channel = require_channel(ctx, channel_id).await?;
    if !access::can_receive_channel_message(ctx.storage.as_ref(), &channel, user_id).await? {
        return Err(AppError::Authorization(
            "You cannot view this channel".to_string(),
        ));
    }
    ctx.availability.cache.channels.put(channel.id, channel.clone());
    Ok(channel)
}

// ============================================================================
// Membership changes
// ============================================================================

pub async fn add_channel_member(
    ctx: &AppContext,
    actor_id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<ChannelMembership> {
    let channel = require_channel(ctx, channel_id).await?;
    let allowed = access::can_manage_channel(
        ctx.storage.as_ref(),
        &channel,
        actor_id,
        &[ChannelRole::Owner, ChannelRole::Admin],
    )
    .await?;
    if !allowed {
        return Err(AppError::Authorization(
            "Only channel owners or admins can add members".to_string(),
        ));
    }
    require_user(ctx, user_id).await?;

    let membership = ChannelMembership {
        channel_id,
        user_id,
        role: ChannelRole::Member,
        joined_at: Utc::now(),
        last_read_at: None,
    };
    ctx.storage.insert_membership(&membership).await?;

    broadcast_to_channel(
        ctx,
        &channel,
        &ServerFrame::ChannelMemberAdded {
            channel_id,
            member: membership.clone(),
        },
    )
    .await;

    Ok(membership)
}

pub async fn remove_channel_member(
    ctx: &AppContext,
    actor_id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    let channel = require_channel(ctx, channel_id).await?;
    // members may leave on their own; removing someone else needs a manage role
    if actor_id != user_id {
        let allowed = access::can_manage_channel(
            ctx.storage.as_ref(),
            &channel,
            actor_id,
            &[ChannelRole::Owner, ChannelRole::Admin],
        )
        .await?;
        if !allowed {
            return Err(AppError::Authorization(
                "Only channel owners or admins can remove members".to_string(),
            ));
        }
    }

    let removed = ctx.storage.remove_membership(channel_id, user_id).await?;
    if !removed {
        return Err(AppError::NotFound("Membership not found".to_string()));
    }

    broadcast_to_channel(
        ctx,
        &channel,
        &ServerFrame::ChannelMemberRemoved {
            channel_id,
            user_id,
        },
    )
    .await;

    Ok(())
}

// ============================================================================
// Broadcast helpers
// ============================================================================

/// Connected user ids authorized for this channel right now. Per-user check
/// failures are logged and that user skipped, never aborting the set build.
pub async fn channel_recipients(ctx: &AppContext, channel: &Channel) -> HashSet<Uuid> {
    let mut recipients = HashSet::new();
    for user_id in ctx.registry.online_user_ids().await {
        match access::can_receive_channel_message(ctx.storage.as_ref(), channel, user_id).await {
            Ok(true) => {
                recipients.insert(user_id);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Access check failed during fan-out, skipping recipient");
            }
        }
    }
    recipients
}

pub async fn broadcast_to_channel(ctx: &AppContext, channel: &Channel, frame: &ServerFrame) -> usize {
    let recipients = channel_recipients(ctx, channel).await;
    ctx.registry
        .broadcast_where(|user_id| recipients.contains(&user_id), frame)
        .await
}

// ============================================================================
// Internal helpers
// ============================================================================

fn validate_content(content: &str, file_id: Option<&str>) -> AppResult<()> {
    if content.trim().is_empty() && file_id.is_none() {
        return Err(AppError::Validation("Message content is empty".to_string()));
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(AppError::Validation(format!(
            "Message content exceeds {} bytes",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

async fn require_channel(ctx: &AppContext, channel_id: Uuid) -> AppResult<Channel> {
    ctx.storage
        .get_channel(channel_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Channel not found".to_string()))
}

async fn require_user(ctx: &AppContext, user_id: Uuid) -> AppResult<User> {
    ctx.storage
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

fn enrich(message: &Message, author: &User, channel: &Channel) -> MessageView {
    MessageView {
        message: message.clone(),
        author_username: author.username.clone(),
        author_display_name: author.display_name.clone(),
        channel_name: channel.name.clone(),
    }
}

async fn enrich_batch(
    ctx: &AppContext,
    messages: Vec<Message>,
    channel: &Channel,
) -> AppResult<Vec<MessageView>> {
    let mut authors: HashMap<Uuid, User> = HashMap::new();
    let mut views = Vec::with_capacity(messages.len());
    for message in messages {
        let author = match authors.get(&message.author_id) {
            Some(author) => author.clone(),
            None => {
                let author = require_user(ctx, message.author_id).await?;
                ctx.availability.cache.users.put(author.id, author.clone());
                authors.insert(author.id, author.clone());
                author
            }
        };
        views.push(enrich(&message, &author, channel));
    }
    Ok(views)
}
