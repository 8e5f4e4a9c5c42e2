use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{Channel, ChannelMembership, DirectMessageView, MessageView};

/// Payload shared by the HTTP POST and socket `channel_message` entry points.
/// Both adapters hand this to the same internal send operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewChannelMessage {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Client-supplied mention handles, merged with handles extracted from content
    #[serde(default)]
    pub mentions: Option<Vec<String>>,
    #[serde(default)]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewDirectMessage {
    pub content: String,
    #[serde(default)]
    pub file_id: Option<String>,
}

/// Client → server socket frames. Unknown tags fail deserialization and are
/// answered with an `error` frame, with no side effects.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        #[serde(rename = "userId")]
        user_id: Uuid,
        username: String,
    },
    Pong {},
    ChannelMessage {
        #[serde(rename = "channelId")]
        channel_id: Uuid,
        #[serde(flatten)]
        message: NewChannelMessage,
    },
    DirectMessage {
        #[serde(rename = "receiverId")]
        receiver_id: Uuid,
        #[serde(flatten)]
        message: NewDirectMessage,
    },
    Typing {
        #[serde(rename = "receiverId", default)]
        receiver_id: Option<Uuid>,
        #[serde(rename = "channelId", default)]
        channel_id: Option<Uuid>,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
}

/// Server → client socket frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome,
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: Uuid,
        username: String,
    },
    Error {
        message: String,
    },
    Ping,
    DatabaseStatus {
        connected: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    NewChannelMessage {
        message: MessageView,
    },
    NewDirectMessage {
        message: DirectMessageView,
    },
    DirectMessageSent {
        message: DirectMessageView,
    },
    TypingIndicator {
        #[serde(rename = "userId")]
        user_id: Uuid,
        username: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
        #[serde(rename = "channelId", skip_serializing_if = "Option::is_none")]
        channel_id: Option<Uuid>,
    },
    ChannelMemberAdded {
        #[serde(rename = "channelId")]
        channel_id: Uuid,
        member: ChannelMembership,
    },
    ChannelMemberRemoved {
        #[serde(rename = "channelId")]
        channel_id: Uuid,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    ChannelMemberUpdated {
        #[serde(rename = "channelId")]
        channel_id: Uuid,
        member: ChannelMembership,
    },
    ChannelUpdated {
        channel: Channel,
    },
    ChannelDeleted {
        #[serde(rename = "channelId")]
        channel_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth_frame() {
        let raw = r#"{"type":"auth","userId":"7f8de4a8-0c1e-4f3a-9f59-2f1f4b6f2a11","username":"alice"}"#;
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(ClientFrame::Auth { username, .. }) => assert_eq!(username, "alice"),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn parses_channel_message_with_optional_fields_absent() {
        let raw = r#"{"type":"channel_message","channelId":"7f8de4a8-0c1e-4f3a-9f59-2f1f4b6f2a11","content":"hi"}"#;
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(ClientFrame::ChannelMessage { message, .. }) => {
                assert_eq!(message.content, "hi");
                assert!(message.parent_id.is_none());
                assert!(message.mentions.is_none());
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn direct_message_frame_ignores_unknown_keys() {
        let raw = r#"{"type":"direct_message","receiverId":"7f8de4a8-0c1e-4f3a-9f59-2f1f4b6f2a11","content":"hi","mentions":["alice"]}"#;
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(ClientFrame::DirectMessage { message, .. }) => {
                assert_eq!(message.content, "hi");
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let raw = r#"{"type":"self_destruct","channelId":"7f8de4a8-0c1e-4f3a-9f59-2f1f4b6f2a11"}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn server_frame_tags_are_snake_case() {
        let frame = ServerFrame::DatabaseStatus {
            connected: false,
            timestamp: chrono::Utc::now(),
        };
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(raw.contains(r#""type":"database_status""#));
        assert!(raw.contains(r#""connected":false"#));
    }
}
