// Moderation domain models - data structures for the anti-spam engine.
//
// These are pure domain types with no Telegram dependencies.
// The Telegram layer converts updates into these and renders notices back out.

use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

/// Warn limit a freshly initialized group starts with.
pub const DEFAULT_WARN_LIMIT: u32 = 3;

/// A platform account, human or automated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub is_bot: bool,
    pub username: Option<String>,
}

#[cfg(test)]
impl Account {
    pub fn human(id: UserId) -> Self {
        Self {
            id,
            is_bot: false,
            username: None,
        }
    }

    pub fn bot(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: true,
            username: Some(username.into()),
        }
    }
}

/// Chat classification. Only supergroups are moderated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A membership or message event as delivered by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub chat_title: String,
    pub chat_description: String,
    pub sender: Account,
    pub message_id: MessageId,
    pub new_members: Vec<Account>,
    pub left_member: Option<Account>,
    pub is_command: bool,
}

/// Per-chat moderation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub is_active: bool,
    pub show_warn: bool,
    /// Always at least 1
    pub warn_limit: u32,
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
}

impl GroupSettings {
    /// Settings written when the moderator first joins a chat. Moderation starts
    /// inactive until the creator turns it on.
    pub fn initial(creator_id: UserId, title: &str, description: &str) -> Self {
        Self {
            is_active: false,
            show_warn: true,
            warn_limit: DEFAULT_WARN_LIMIT,
            creator_id,
            title: title.to_string(),
            description: description.to_string(),
        }
    }
}

/// Role of a chat administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminRole {
    Creator,
    Administrator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Administrator {
    pub account: Account,
    pub role: AdminRole,
}

/// Something the engine wants to tell a chat. Rendering is up to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Introduction,
    CreatorRequired,
    Whitelisted { username: Option<String> },
    Warning { count: u32, limit: u32 },
    PermissionRequired,
}

/// Outcome for one joined account in the new-member flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Introduced by the creator and exempted.
    Exempted { newly_whitelisted: bool },
    /// Moderation is inactive for the chat.
    Ignored,
    /// Already on the whitelist.
    Approved,
    /// Account removed; the actor now has `warnings` warnings.
    Removed { warnings: u32 },
    /// Account removed and the actor hit the limit and was removed too.
    ActorRemoved,
    /// A removal was refused and moderation was switched off.
    Deactivated,
    /// A gateway call failed; nothing more was done for this account.
    Unresolved,
}
