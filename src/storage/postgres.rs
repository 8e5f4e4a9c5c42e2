use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::AppResult;
use crate::storage::{
    Channel, ChannelMembership, ConversationSummary, DirectMessage, Message, Notification,
    SenderUnread, Storage, UnreadCounts, User,
};

pub type DbPool = Pool<Postgres>;

pub async fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub struct PgStorage {
    pool: DbPool,
}

impl PgStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, display_name, email, is_admin
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, display_name, email, is_admin
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_channel(&self, id: Uuid) -> AppResult<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(
            r#"
            SELECT id, name, kind, created_by, created_at, updated_at
            FROM channels
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(channel)
    }

    async fn list_channels_for(&self, user_id: Uuid) -> AppResult<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            r#"
            SELECT c.id, c.name, c.kind, c.created_by, c.created_at, c.updated_at
            FROM channels c
            WHERE c.kind = 'public'
               OR EXISTS (
                   SELECT 1 FROM channel_memberships m
                   WHERE m.channel_id = c.id AND m.user_id = $1
               )
            ORDER BY c.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn get_membership(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<ChannelMembership>> {
        let membership = sqlx::query_as::<_, ChannelMembership>(
            r#"
            SELECT channel_id, user_id, role, joined_at, last_read_at
            FROM channel_memberships
            WHERE channel_id = $1 AND user_id = $2
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    async fn list_members(&self, channel_id: Uuid) -> AppResult<Vec<ChannelMembership>> {
        let members = sqlx::query_as::<_, ChannelMembership>(
            r#"
            SELECT channel_id, user_id, role, joined_at, last_read_at
            FROM channel_memberships
            WHERE channel_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    async fn insert_membership(&self, membership: &ChannelMembership) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_memberships (channel_id, user_id, role, joined_at, last_read_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (channel_id, user_id) DO NOTHING
            "#,
        )
        .bind(membership.channel_id)
        .bind(membership.user_id)
        .bind(membership.role)
        .bind(membership.joined_at)
        .bind(membership.last_read_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_membership(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM channel_memberships
            WHERE channel_id = $1 AND user_id = $2
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_read(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE channel_memberships
            SET last_read_at = NOW()
            WHERE channel_id = $1 AND user_id = $2
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, channel_id, author_id, parent_id, content, kind, mentions,
                 file_url, is_edited, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(message.id)
        .bind(message.channel_id)
        .bind(message.author_id)
        .bind(message.parent_id)
        .bind(&message.content)
        .bind(message.kind)
        .bind(&message.mentions)
        .bind(&message.file_url)
        .bind(message.is_edited)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, channel_id, author_id, parent_id, content, kind, mentions,
                   file_url, is_edited, created_at, updated_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Message> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages
            SET content = $2, is_edited = TRUE, updated_at = $3
            WHERE id = $1
            RETURNING id, channel_id, author_id, parent_id, content, kind, mentions,
                      file_url, is_edited, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(content)
        .bind(edited_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn list_channel_messages(
        &self,
        channel_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, channel_id, author_id, parent_id, content, kind, mentions,
                   file_url, is_edited, created_at, updated_at
            FROM messages
            WHERE channel_id = $1
              AND parent_id IS NULL
              AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(channel_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn list_replies(&self, parent_id: Uuid) -> AppResult<Vec<Message>> {
        let replies = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, channel_id, author_id, parent_id, content, kind, mentions,
                   file_url, is_edited, created_at, updated_at
            FROM messages
            WHERE parent_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(replies)
    }

    async fn insert_direct_message(&self, message: &DirectMessage) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO direct_messages
                (id, sender_id, receiver_id, content, kind, file_url,
                 is_read, is_edited, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(message.kind)
        .bind(&message.file_url)
        .bind(message.is_read)
        .bind(message.is_edited)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_conversation(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> AppResult<Vec<DirectMessage>> {
        let messages = sqlx::query_as::<_, DirectMessage>(
            r#"
            SELECT id, sender_id, receiver_id, content, kind, file_url,
                   is_read, is_edited, created_at, updated_at
            FROM direct_messages
            WHERE ((sender_id = $1 AND receiver_id = $2)
                OR (sender_id = $2 AND receiver_id = $1))
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(peer_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn mark_conversation_read(&self, user_id: Uuid, peer_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE direct_messages
            SET is_read = TRUE
            WHERE receiver_id = $1 AND sender_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(user_id)
        .bind(peer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_conversations(&self, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (peer_id)
                CASE WHEN dm.sender_id = $1 THEN dm.receiver_id ELSE dm.sender_id END AS peer_id,
                u.username AS peer_username,
                dm.id, dm.sender_id, dm.receiver_id, dm.content, dm.kind, dm.file_url,
                dm.is_read, dm.is_edited, dm.created_at, dm.updated_at,
                (SELECT COUNT(*) FROM direct_messages x
                 WHERE x.receiver_id = $1
                   AND x.sender_id = CASE WHEN dm.sender_id = $1 THEN dm.receiver_id ELSE dm.sender_id END
                   AND x.is_read = FALSE) AS unread_count
            FROM direct_messages dm
            JOIN users u
              ON u.id = CASE WHEN dm.sender_id = $1 THEN dm.receiver_id ELSE dm.sender_id END
            WHERE dm.sender_id = $1 OR dm.receiver_id = $1
            ORDER BY peer_id, dm.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(ConversationSummary {
                peer_id: row.try_get("peer_id")?,
                peer_username: row.try_get("peer_username")?,
                last_message: DirectMessage {
                    id: row.try_get("id")?,
                    sender_id: row.try_get("sender_id")?,
                    receiver_id: row.try_get("receiver_id")?,
                    content: row.try_get("content")?,
                    kind: row.try_get("kind")?,
                    file_url: row.try_get("file_url")?,
                    is_read: row.try_get("is_read")?,
                    is_edited: row.try_get("is_edited")?,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                },
                unread_count: row.try_get("unread_count")?,
            });
        }

        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }

    async fn unread_counts(&self, user_id: Uuid) -> AppResult<UnreadCounts> {
        let rows = sqlx::query(
            r#"
            SELECT sender_id, COUNT(*) AS count
            FROM direct_messages
            WHERE receiver_id = $1 AND is_read = FALSE
            GROUP BY sender_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut per_sender = Vec::with_capacity(rows.len());
        let mut total = 0;
        for row in rows {
            let count: i64 = row.try_get("count")?;
            total += count;
            per_sender.push(SenderUnread {
                sender_id: row.try_get("sender_id")?,
                count,
            });
        }

        Ok(UnreadCounts { total, per_sender })
    }

    async fn insert_notification(&self, notification: &Notification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, title, body, kind, reference_id, reference_kind,
                 is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.kind)
        .bind(notification.reference_id)
        .bind(&notification.reference_kind)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
