pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "channel_kind", rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    /// Globally unique
    pub name: String,
    pub kind: ChannelKind,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "channel_role", rename_all = "lowercase")]
pub enum ChannelRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMembership {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub role: ChannelRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "message_kind", rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    /// Set for replies; history reads return only rows where this is empty
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub kind: MessageKind,
    /// Denormalized at creation, never re-validated
    pub mentions: Vec<Uuid>,
    pub file_url: Option<String>,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub is_read: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    ChannelAdded,
    DirectMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub reference_id: Uuid,
    pub reference_kind: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Enriched views
// ============================================================================

/// Message with author and channel data attached, as broadcast to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub author_username: String,
    pub author_display_name: String,
    pub channel_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageView {
    #[serde(flatten)]
    pub message: DirectMessage,
    pub sender_username: String,
    pub receiver_username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub peer_id: Uuid,
    pub peer_username: String,
    pub last_message: DirectMessage,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCounts {
    pub total: i64,
    pub per_sender: Vec<SenderUnread>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderUnread {
    pub sender_id: Uuid,
    pub count: i64,
}

// ============================================================================
// Storage trait
// ============================================================================

/// Persistence collaborator consumed by the messaging core.
///
/// `ping` is the availability probe; everything else is plain CRUD. The
/// Postgres implementation backs production, the in-memory one backs tests
/// and the no-database dev mode.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn ping(&self) -> AppResult<()>;

    // Users (read-only directory; user CRUD is an external collaborator)
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>>;

    // Channels
    async fn get_channel(&self, id: Uuid) -> AppResult<Option<Channel>>;
    async fn list_channels_for(&self, user_id: Uuid) -> AppResult<Vec<Channel>>;

    // Memberships
    async fn get_membership(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<ChannelMembership>>;
    async fn list_members(&self, channel_id: Uuid) -> AppResult<Vec<ChannelMembership>>;
    /// Inserts a membership row; a second insert for the same pair is a no-op
    async fn insert_membership(&self, membership: &ChannelMembership) -> AppResult<()>;
    /// Returns true when a row was actually removed
    async fn remove_membership(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<bool>;
    async fn touch_last_read(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<()>;

    // Channel messages
    async fn insert_message(&self, message: &Message) -> AppResult<()>;
    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;
    async fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Message>;
    /// Top-level messages only (no replies), newest first
    async fn list_channel_messages(
        &self,
        channel_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;
    async fn list_replies(&self, parent_id: Uuid) -> AppResult<Vec<Message>>;

    // Direct messages
    async fn insert_direct_message(&self, message: &DirectMessage) -> AppResult<()>;
    async fn list_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<DirectMessage>>;
    /// Marks all unread messages from peer to user as read, returns the count
    async fn mark_conversation_read(&self, user_id: Uuid, peer_id: Uuid) -> AppResult<u64>;
    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>>;
    async fn unread_counts(&self, user_id: Uuid) -> AppResult<UnreadCounts>;

    // Notifications
    async fn insert_notification(&self, notification: &Notification) -> AppResult<()>;
}
