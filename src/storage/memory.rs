use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::storage::{
    Channel, ChannelMembership, ConversationSummary, DirectMessage, Message, Notification,
    SenderUnread, Storage, UnreadCounts, User,
};

/// In-memory storage backend.
///
/// Backs the test suite and the `STORAGE=memory` dev mode. `set_available`
/// simulates a storage outage: probes and all CRUD fail until flipped back.
#[derive(Default)]
pub struct MemoryStorage {
    users: RwLock<HashMap<Uuid, User>>,
    channels: RwLock<HashMap<Uuid, Channel>>,
    memberships: RwLock<Vec<ChannelMembership>>,
    messages: RwLock<Vec<Message>>,
    direct_messages: RwLock<Vec<DirectMessage>>,
    notifications: RwLock<Vec<Notification>>,
    unavailable: AtomicBool,
    probes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of times `ping` was actually invoked (debounce assertions)
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("storage unavailable".to_string()));
        }
        Ok(())
    }

    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    pub async fn add_channel(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }

    pub async fn notifications_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn membership_count(&self, channel_id: Uuid) -> usize {
        self.memberships
            .read()
            .await
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .count()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ping(&self) -> AppResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        self.check()?;
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.check()?;
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_channel(&self, id: Uuid) -> AppResult<Option<Channel>> {
        self.check()?;
        Ok(self.channels.read().await.get(&id).cloned())
    }

    async fn list_channels_for(&self, user_id: Uuid) -> AppResult<Vec<Channel>> {
        self.check()?;
        let memberships = self.memberships.read().await;
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .await
            .values()
            .filter(|c| {
                c.kind == crate::storage::ChannelKind::Public
                    || memberships
                        .iter()
                        .any(|m| m.channel_id == c.id && m.user_id == user_id)
            })
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(channels)
    }

    async fn get_membership(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<ChannelMembership>> {
        self.check()?;
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .find(|m| m.channel_id == channel_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, channel_id: Uuid) -> AppResult<Vec<ChannelMembership>> {
        self.check()?;
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn insert_membership(&self, membership: &ChannelMembership) -> AppResult<()> {
        self.check()?;
        let mut memberships = self.memberships.write().await;
        let exists = memberships
            .iter()
            .any(|m| m.channel_id == membership.channel_id && m.user_id == membership.user_id);
        if !exists {
            memberships.push(membership.clone());
        }
        Ok(())
    }

    async fn remove_membership(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        self.check()?;
        let mut memberships = self.memberships.write().await;
        let before = memberships.len();
        memberships.retain(|m| !(m.channel_id == channel_id && m.user_id == user_id));
        Ok(memberships.len() < before)
    }

    async fn touch_last_read(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.check()?;
        let mut memberships = self.memberships.write().await;
        if let Some(m) = memberships
            .iter_mut()
            .find(|m| m.channel_id == channel_id && m.user_id == user_id)
        {
            m.last_read_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        self.check()?;
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        self.check()?;
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Message> {
        self.check()?;
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound("message not found".to_string()))?;
        message.content = content.to_string();
        message.is_edited = true;
        message.updated_at = edited_at;
        Ok(message.clone())
    }

    async fn list_channel_messages(
        &self,
        channel_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        self.check()?;
        let mut messages: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| {
                m.channel_id == channel_id
                    && m.parent_id.is_none()
                    && before.map_or(true, |b| m.created_at < b)
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn list_replies(&self, parent_id: Uuid) -> AppResult<Vec<Message>> {
        self.check()?;
        let mut replies: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.parent_id == Some(parent_id))
            .cloned()
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(replies)
    }

    async fn insert_direct_message(&self, message: &DirectMessage) -> AppResult<()> {
        self.check()?;
        self.direct_messages.write().await.push(message.clone());
        Ok(())
    }

    async fn list_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<DirectMessage>> {
        self.check()?;
        let mut messages: Vec<DirectMessage> = self
            .direct_messages
            .read()
            .await
            .iter()
            .filter(|m| {
                ((m.sender_id == user_id && m.receiver_id == peer_id)
                    || (m.sender_id == peer_id && m.receiver_id == user_id))
                    && before.map_or(true, |b| m.created_at < b)
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn mark_conversation_read(&self, user_id: Uuid, peer_id: Uuid) -> AppResult<u64> {
        self.check()?;
        let mut messages = self.direct_messages.write().await;
        let mut marked = 0;
        for m in messages
            .iter_mut()
            .filter(|m| m.receiver_id == user_id && m.sender_id == peer_id && !m.is_read)
        {
            m.is_read = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        self.check()?;
        let messages = self.direct_messages.read().await;
        let users = self.users.read().await;

        let mut latest: HashMap<Uuid, DirectMessage> = HashMap::new();
        let mut unread: HashMap<Uuid, i64> = HashMap::new();
        for m in messages.iter() {
            if m.sender_id != user_id && m.receiver_id != user_id {
                continue;
            }
            let peer = if m.sender_id == user_id {
                m.receiver_id
            } else {
                m.sender_id
            };
            let newer = latest
                .get(&peer)
                .map_or(true, |prev| m.created_at > prev.created_at);
            if newer {
                latest.insert(peer, m.clone());
            }
            if m.receiver_id == user_id && !m.is_read {
                *unread.entry(peer).or_insert(0) += 1;
            }
        }

        let mut summaries: Vec<ConversationSummary> = latest
            .into_iter()
            .map(|(peer_id, last_message)| ConversationSummary {
                peer_id,
                peer_username: users
                    .get(&peer_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_default(),
                unread_count: unread.get(&peer_id).copied().unwrap_or(0),
                last_message,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }

    async fn unread_counts(&self, user_id: Uuid) -> AppResult<UnreadCounts> {
        self.check()?;
        let messages = self.direct_messages.read().await;
        let mut per: HashMap<Uuid, i64> = HashMap::new();
        for m in messages
            .iter()
            .filter(|m| m.receiver_id == user_id && !m.is_read)
        {
            *per.entry(m.sender_id).or_insert(0) += 1;
        }
        let total = per.values().sum();
        let per_sender = per
            .into_iter()
            .map(|(sender_id, count)| SenderUnread { sender_id, count })
            .collect();
        Ok(UnreadCounts { total, per_sender })
    }

    async fn insert_notification(&self, notification: &Notification) -> AppResult<()> {
        self.check()?;
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }
}
