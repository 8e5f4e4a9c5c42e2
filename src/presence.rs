use uuid::Uuid;

use crate::context::AppContext;
use crate::distribution;
use crate::error::{AppError, AppResult};
use crate::frame::ServerFrame;

/// Where a typing indicator goes
#[derive(Debug, Clone, Copy)]
pub enum TypingTarget {
    Direct { receiver_id: Uuid },
    Channel { channel_id: Uuid },
}

impl TypingTarget {
    /// The socket frame carries at most one of the two ids
    pub fn from_ids(receiver_id: Option<Uuid>, channel_id: Option<Uuid>) -> AppResult<Self> {
        match (receiver_id, channel_id) {
            (Some(receiver_id), None) => Ok(TypingTarget::Direct { receiver_id }),
            (None, Some(channel_id)) => Ok(TypingTarget::Channel { channel_id }),
            _ => Err(AppError::Validation(
                "Typing frame needs exactly one of receiverId or channelId".to_string(),
            )),
        }
    }
}

/// Relays an ephemeral typing indicator. Fire-and-forget: never persisted,
/// no delivery guarantee, a missing recipient is not an error.
pub async fn publish_typing(
    ctx: &AppContext,
    actor_id: Uuid,
    actor_username: &str,
    target: TypingTarget,
    is_typing: bool,
) -> AppResult<()> {
    match target {
        TypingTarget::Direct { receiver_id } => {
            let frame = ServerFrame::TypingIndicator {
                user_id: actor_id,
                username: actor_username.to_string(),
                is_typing,
                channel_id: None,
            };
            ctx.registry.send_to(receiver_id, frame).await;
        }
        TypingTarget::Channel { channel_id } => {
            let channel = ctx
                .storage
                .get_channel(channel_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Channel not found".to_string()))?;
            let frame = ServerFrame::TypingIndicator {
                user_id: actor_id,
                username: actor_username.to_string(),
                is_typing,
                channel_id: Some(channel_id),
            };
            let mut recipients = distribution::channel_recipients(ctx, &channel).await;
            recipients.remove(&actor_id);
            ctx.registry
                .broadcast_where(|user_id| recipients.contains(&user_id), &frame)
                .await;
        }
    }
    Ok(())
}
