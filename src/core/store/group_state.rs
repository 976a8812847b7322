// Group state accessors - translate store operations into moderation entities.
//
// Key layout:
// - group:{chat}          hash   settings
// - whitelist:{chat}      set    approved bot IDs
// - admin:{creator}       set    chat IDs the creator owns
// - warns:{chat}:{user}   int    warn counter

use super::kv_store::{BatchOp, KvStore, StoreError};
use crate::core::moderation::{ChatId, GroupSettings, UserId};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;

const FIELD_ACTIVE: &str = "is_active";
const FIELD_SHOW_WARN: &str = "show_warn";
const FIELD_LIMIT: &str = "limit";
const FIELD_CREATOR: &str = "creator";
const FIELD_TITLE: &str = "title";
const FIELD_DESCRIPTION: &str = "description";

pub fn group_key(chat_id: ChatId) -> String {
    format!("group:{}", chat_id)
}

pub fn whitelist_key(chat_id: ChatId) -> String {
    format!("whitelist:{}", chat_id)
}

pub fn admin_key(creator_id: UserId) -> String {
    format!("admin:{}", creator_id)
}

pub fn warn_key(chat_id: ChatId, user_id: UserId) -> String {
    format!("warns:{}:{}", chat_id, user_id)
}

fn encode_bool(value: bool) -> String {
    value.to_string()
}

/// Typed view over the store for one moderation deployment.
///
/// Nothing is cached: every call goes to the store, so concurrent event tasks and
/// the command layer always see each other's writes.
pub struct GroupState<S: KvStore> {
    store: S,
}

impl<S: KvStore> GroupState<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    /// Settings for a chat, or `None` if the chat was never initialized.
    pub async fn settings(&self, chat_id: ChatId) -> Result<Option<GroupSettings>, StoreError> {
        let key = group_key(chat_id);
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_settings(&key, &fields).map(Some)
    }

    /// Write fresh settings and register the chat under its creator, atomically.
    pub async fn create_settings(
        &self,
        chat_id: ChatId,
        settings: &GroupSettings,
    ) -> Result<(), StoreError> {
        self.store
            .exec_batch(vec![
                BatchOp::SetAdd {
                    key: admin_key(settings.creator_id),
                    member: chat_id.to_string(),
                },
                BatchOp::HashSetAll {
                    key: group_key(chat_id),
                    fields: encode_settings(settings),
                },
            ])
            .await
    }

    /// Returns `false` if the chat has no settings (never initialized or already
    /// cleaned up). Settings are never recreated here.
    pub async fn set_active(&self, chat_id: ChatId, active: bool) -> Result<bool, StoreError> {
        self.store
            .hash_update(&group_key(chat_id), FIELD_ACTIVE, &encode_bool(active))
            .await
    }

    /// Stored creator of a chat. `Ok(None)` if the field is absent.
    pub async fn creator_id(&self, chat_id: ChatId) -> Result<Option<UserId>, StoreError> {
        let key = group_key(chat_id);
        match self.store.hash_get(&key, FIELD_CREATOR).await? {
            Some(raw) => parse_field(&key, FIELD_CREATOR, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Forget a chat: settings and whitelist go, and the chat leaves the creator's
    /// index when the creator is known. One atomic batch.
    pub async fn remove_group(
        &self,
        chat_id: ChatId,
        creator_id: Option<UserId>,
    ) -> Result<(), StoreError> {
        let mut ops = vec![
            BatchOp::Delete {
                key: group_key(chat_id),
            },
            BatchOp::Delete {
                key: whitelist_key(chat_id),
            },
        ];
        if let Some(creator_id) = creator_id {
            ops.push(BatchOp::SetRemove {
                key: admin_key(creator_id),
                member: chat_id.to_string(),
            });
        }
        self.store.exec_batch(ops).await
    }

    // ------------------------------------------------------------------------
    // Whitelist
    // ------------------------------------------------------------------------

    /// Whitelist an account in an initialized chat.
    ///
    /// `None` if the chat has no settings, otherwise `Some(true)` when the account
    /// was not whitelisted before.
    pub async fn whitelist_add(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<Option<bool>, StoreError> {
        self.store
            .set_add_guarded(
                &group_key(chat_id),
                &whitelist_key(chat_id),
                &user_id.to_string(),
            )
            .await
    }

    pub async fn whitelist_remove(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.store
            .set_remove(&whitelist_key(chat_id), &user_id.to_string())
            .await
    }

    pub async fn is_whitelisted(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.store
            .set_is_member(&whitelist_key(chat_id), &user_id.to_string())
            .await
    }

    // ------------------------------------------------------------------------
    // Warn counters
    // ------------------------------------------------------------------------

    /// Count one more incident against a user, never going past `limit`.
    pub async fn add_warning(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        limit: u32,
    ) -> Result<u32, StoreError> {
        let value = self
            .store
            .incr_capped(&warn_key(chat_id, user_id), i64::from(limit.max(1)))
            .await?;
        Ok(value.clamp(0, i64::from(u32::MAX)) as u32)
    }

    pub async fn clear_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<(), StoreError> {
        self.store.delete(&warn_key(chat_id, user_id)).await?;
        Ok(())
    }
}

// Accessors for the settings commands. The engine never calls these itself.
#[allow(dead_code)]
impl<S: KvStore> GroupState<S> {
    pub async fn set_show_warn(&self, chat_id: ChatId, show: bool) -> Result<bool, StoreError> {
        self.store
            .hash_update(&group_key(chat_id), FIELD_SHOW_WARN, &encode_bool(show))
            .await
    }

    pub async fn set_warn_limit(
        &self,
        chat_id: ChatId,
        limit: NonZeroU32,
    ) -> Result<bool, StoreError> {
        self.store
            .hash_update(&group_key(chat_id), FIELD_LIMIT, &limit.to_string())
            .await
    }

    /// Chats registered under a creator.
    pub async fn admin_groups(&self, creator_id: UserId) -> Result<Vec<ChatId>, StoreError> {
        let key = admin_key(creator_id);
        let members = self.store.set_members(&key).await?;
        members
            .iter()
            .map(|m| parse_field(&key, "member", m))
            .collect()
    }

    pub async fn whitelist_members(&self, chat_id: ChatId) -> Result<Vec<UserId>, StoreError> {
        let key = whitelist_key(chat_id);
        let members = self.store.set_members(&key).await?;
        members
            .iter()
            .map(|m| parse_field(&key, "member", m))
            .collect()
    }

    pub async fn warn_count(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, StoreError> {
        let value = self.store.counter(&warn_key(chat_id, user_id)).await?;
        Ok(value.clamp(0, i64::from(u32::MAX)) as u32)
    }
}

fn encode_settings(settings: &GroupSettings) -> Vec<(String, String)> {
    vec![
        (FIELD_ACTIVE.to_string(), encode_bool(settings.is_active)),
        (FIELD_SHOW_WARN.to_string(), encode_bool(settings.show_warn)),
        (FIELD_LIMIT.to_string(), settings.warn_limit.to_string()),
        (FIELD_CREATOR.to_string(), settings.creator_id.to_string()),
        (FIELD_TITLE.to_string(), settings.title.clone()),
        (FIELD_DESCRIPTION.to_string(), settings.description.clone()),
    ]
}

fn decode_settings(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<GroupSettings, StoreError> {
    let required = |field: &str| -> Result<&String, StoreError> {
        fields.get(field).ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            field: field.to_string(),
            value: String::new(),
        })
    };

    let warn_limit: u32 = parse_field(key, FIELD_LIMIT, required(FIELD_LIMIT)?)?;
    if warn_limit == 0 {
        return Err(StoreError::Corrupt {
            key: key.to_string(),
            field: FIELD_LIMIT.to_string(),
            value: "0".to_string(),
        });
    }

    Ok(GroupSettings {
        is_active: parse_bool(key, FIELD_ACTIVE, required(FIELD_ACTIVE)?)?,
        show_warn: parse_bool(key, FIELD_SHOW_WARN, required(FIELD_SHOW_WARN)?)?,
        warn_limit,
        creator_id: parse_field(key, FIELD_CREATOR, required(FIELD_CREATOR)?)?,
        title: fields.get(FIELD_TITLE).cloned().unwrap_or_default(),
        description: fields.get(FIELD_DESCRIPTION).cloned().unwrap_or_default(),
    })
}

fn parse_bool(key: &str, field: &str, raw: &str) -> Result<bool, StoreError> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(StoreError::Corrupt {
            key: key.to_string(),
            field: field.to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_field<T: FromStr>(key: &str, field: &str, raw: &str) -> Result<T, StoreError> {
    raw.trim().parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        field: field.to_string(),
        value: raw.to_string(),
    })
}
