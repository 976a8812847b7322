// Telegram Bot API payloads, trimmed to the fields moderation needs.

use crate::core::moderation::{
    Account, AdminRole, Administrator, ChatKind, InboundEvent, MessageId,
};
use serde::Deserialize;

/// Envelope every Bot API call answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub from: Option<User>,
    pub chat: Chat,
    pub new_chat_members: Option<Vec<User>>,
    pub left_chat_member: Option<User>,
    pub entities: Option<Vec<MessageEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub user: User,
}

impl From<User> for Account {
    fn from(user: User) -> Self {
        Account {
            id: user.id,
            is_bot: user.is_bot,
            username: user.username,
        }
    }
}

impl From<ChatMember> for Administrator {
    fn from(member: ChatMember) -> Self {
        let role = if member.status == "creator" {
            AdminRole::Creator
        } else {
            AdminRole::Administrator
        };
        Administrator {
            account: member.user.into(),
            role,
        }
    }
}

fn chat_kind(kind: &str) -> ChatKind {
    match kind {
        "supergroup" => ChatKind::Supergroup,
        "group" => ChatKind::Group,
        "channel" => ChatKind::Channel,
        _ => ChatKind::Private,
    }
}

impl Message {
    /// Convert into a core event. Messages without a sender (channel posts) yield
    /// `None`.
    pub fn into_event(self) -> Option<InboundEvent> {
        let sender = self.from?;
        let is_command = self
            .entities
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|e| e.kind == "bot_command" && e.offset == 0);

        Some(InboundEvent {
            chat_id: self.chat.id,
            chat_kind: chat_kind(&self.chat.kind),
            chat_title: self.chat.title.unwrap_or_default(),
            chat_description: self.chat.description.unwrap_or_default(),
            sender: sender.into(),
            message_id: self.message_id,
            new_members: self
                .new_chat_members
                .unwrap_or_default()
                .into_iter()
                .map(Account::from)
                .collect(),
            left_member: self.left_chat_member.map(Account::from),
            is_command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_members_update_converts() {
        let json = r#"{
            "update_id": 10,
            "message": {
                "message_id": 55,
                "from": {"id": 200, "is_bot": false, "first_name": "Ann"},
                "chat": {"id": -1001, "type": "supergroup", "title": "Rustaceans"},
                "date": 1700000000,
                "new_chat_members": [
                    {"id": 999, "is_bot": true, "first_name": "Spam", "username": "spam_bot"}
                ]
            }
        }"#;

        let update: Update = serde_json::from_str(json).unwrap();
        let event = update.message.unwrap().into_event().unwrap();

        assert_eq!(event.chat_id, -1001);
        assert_eq!(event.chat_kind, ChatKind::Supergroup);
        assert_eq!(event.chat_title, "Rustaceans");
        assert_eq!(event.sender, Account::human(200));
        assert_eq!(event.message_id, 55);
        assert_eq!(event.new_members, vec![Account::bot(999, "spam_bot")]);
        assert_eq!(event.left_member, None);
        assert!(!event.is_command);
    }

    #[test]
    fn test_command_detection() {
        let json = r#"{
            "message_id": 3,
            "from": {"id": 100, "is_bot": false},
            "chat": {"id": -5, "type": "group"},
            "text": "/settings",
            "entities": [{"type": "bot_command", "offset": 0, "length": 9}]
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        let event = message.into_event().unwrap();

        assert!(event.is_command);
        assert_eq!(event.chat_kind, ChatKind::Group);
    }

    #[test]
    fn test_channel_post_without_sender_is_dropped() {
        let json = r#"{
            "message_id": 3,
            "chat": {"id": -7, "type": "channel", "title": "News"}
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert!(message.into_event().is_none());
    }

    #[test]
    fn test_creator_role_mapping() {
        let json = r#"[
            {"status": "creator", "user": {"id": 100, "is_bot": false}},
            {"status": "administrator", "user": {"id": 1, "is_bot": true, "username": "botguard"}}
        ]"#;

        let members: Vec<ChatMember> = serde_json::from_str(json).unwrap();
        let admins: Vec<Administrator> = members.into_iter().map(Administrator::from).collect();

        assert_eq!(admins[0].role, AdminRole::Creator);
        assert_eq!(admins[0].account.id, 100);
        assert_eq!(admins[1].role, AdminRole::Administrator);
    }
}
