use uuid::Uuid;

use crate::error::AppResult;
use crate::storage::{Channel, ChannelKind, ChannelRole, Storage};

/// True iff the channel is public, the user holds a membership row, or the
/// user is a global admin.
pub async fn can_receive_channel_message(
    storage: &dyn Storage,
    channel: &Channel,
    user_id: Uuid,
) -> AppResult<bool> {
    if channel.kind == ChannelKind::Public {
        return Ok(true);
    }
    if storage
        .get_membership(channel.id, user_id)
        .await?
        .is_some()
    {
        return Ok(true);
    }
    is_global_admin(storage, user_id).await
}

/// True iff the user's membership role is one of `required_roles`, or the
/// user is a global admin. Admin escalation comes from the user flag, never
/// from membership.
pub async fn can_manage_channel(
    storage: &dyn Storage,
    channel: &Channel,
    user_id: Uuid,
    required_roles: &[ChannelRole],
) -> AppResult<bool> {
    if let Some(membership) = storage.get_membership(channel.id, user_id).await? {
        if required_roles.contains(&membership.role) {
            return Ok(true);
        }
    }
    is_global_admin(storage, user_id).await
}

/// Direct messages are visible to the two named parties only
pub fn can_receive_direct_message(sender_id: Uuid, receiver_id: Uuid, user_id: Uuid) -> bool {
    user_id == sender_id || user_id == receiver_id
}

async fn is_global_admin(storage: &dyn Storage, user_id: Uuid) -> AppResult<bool> {
    Ok(storage
        .get_user(user_id)
        .await?
        .map_or(false, |u| u.is_admin))
}
