// Moderation engine - core business logic for keeping unauthorized bots out.
//
// This service handles:
// - Group initialization when the moderator joins a chat
// - New members: creator exemptions, bot removal, warning escalation
// - Left members: cleanup when the moderator leaves, whitelist pruning
// - Messages sent by unauthorized bots
//
// NO Telegram dependencies here - the gateway and store are injected.

use super::moderation_models::{
    Account, AdminRole, ChatId, GroupSettings, InboundEvent, Notice, UserId, Verdict,
};
use crate::core::gateway::{ActionOutcome, ChatGateway, GatewayError, OutgoingMessage};
use crate::core::store::{GroupState, KvStore, StoreError};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Failure of one event flow. Never fatal beyond the event that raised it.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// What happened to a message sent by a bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageVerdict {
    /// Chat not provisioned or moderation inactive.
    Skipped,
    /// Sender is whitelisted.
    Approved,
    /// Sender removed; `message_deleted` tells whether the message went too.
    Removed { message_deleted: bool },
    Deactivated,
    Unresolved,
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationEngine<S: KvStore, G: ChatGateway> {
    state: GroupState<S>,
    gateway: G,
    /// Account ID the engine itself runs as.
    me: UserId,
}

impl<S: KvStore, G: ChatGateway> ModerationEngine<S, G> {
    pub fn new(store: S, gateway: G, me: UserId) -> Self {
        Self {
            state: GroupState::new(store),
            gateway,
            me,
        }
    }

    pub fn moderator_id(&self) -> UserId {
        self.me
    }

    #[cfg(test)]
    pub fn state(&self) -> &GroupState<S> {
        &self.state
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Provision a chat the moderator was just added to.
    ///
    /// Returns `Ok(None)` when the chat cannot be provisioned (admins unavailable,
    /// or no creator). A failed settings write is returned as an error.
    pub async fn initialize_group(
        &self,
        event: &InboundEvent,
    ) -> Result<Option<GroupSettings>, ModerationError> {
        let chat_id = event.chat_id;

        let admins = match self.gateway.get_administrators(chat_id).await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::error!(
                    chat = chat_id,
                    from = event.sender.id,
                    "cannot retrieve chat administrators: {}",
                    e
                );
                return Ok(None);
            }
        };

        self.notify(chat_id, OutgoingMessage::new(Notice::Introduction))
            .await;

        let Some(creator) = admins.iter().find(|a| a.role == AdminRole::Creator) else {
            tracing::error!(chat = chat_id, "chat has no creator, leaving");
            self.notify(chat_id, OutgoingMessage::new(Notice::CreatorRequired))
                .await;
            if let Err(e) = self.gateway.leave_chat(chat_id).await {
                tracing::error!(chat = chat_id, "cannot leave chat: {}", e);
            }
            return Ok(None);
        };

        let settings = GroupSettings::initial(
            creator.account.id,
            &event.chat_title,
            &event.chat_description,
        );
        self.state.create_settings(chat_id, &settings).await?;

        tracing::info!(
            chat = chat_id,
            creator = creator.account.id,
            "initialized group with default settings"
        );
        Ok(Some(settings))
    }

    /// Handle a batch of accounts joining a chat.
    pub async fn process_new_members(
        &self,
        event: &InboundEvent,
    ) -> Result<Vec<(UserId, Verdict)>, ModerationError> {
        let chat_id = event.chat_id;

        let mut settings = if event.new_members.iter().any(|m| m.id == self.me) {
            match self.initialize_group(event).await? {
                Some(settings) => Some(settings),
                None => return Ok(Vec::new()),
            }
        } else {
            self.state.settings(chat_id).await?
        };

        let Some(settings) = settings.as_mut() else {
            tracing::warn!(chat = chat_id, "group is not registered, skip processing");
            return Ok(Vec::new());
        };

        let mut verdicts = Vec::new();
        for member in event.new_members.iter().filter(|m| m.id != self.me) {
            let verdict = self.moderate_member(event, settings, member).await?;
            verdicts.push((member.id, verdict));
        }
        Ok(verdicts)
    }

    async fn moderate_member(
        &self,
        event: &InboundEvent,
        settings: &mut GroupSettings,
        member: &Account,
    ) -> Result<Verdict, ModerationError> {
        let chat_id = event.chat_id;
        let actor = event.sender.id;

        // Whatever the creator brings in is trusted, active or not.
        if actor == settings.creator_id {
            let Some(added) = self.state.whitelist_add(chat_id, member.id).await? else {
                // Moderator left while this event was in flight.
                tracing::warn!(chat = chat_id, bot = member.id, "group is gone, not whitelisting");
                return Ok(Verdict::Ignored);
            };
            if added {
                tracing::info!(
                    chat = chat_id,
                    from = actor,
                    bot = member.id,
                    "bot added to whitelist (added by creator)"
                );
                let notice = Notice::Whitelisted {
                    username: member.username.clone(),
                };
                self.notify(
                    chat_id,
                    OutgoingMessage::new(notice)
                        .reply_to(event.message_id)
                        .silent(),
                )
                .await;
            }
            return Ok(Verdict::Exempted {
                newly_whitelisted: added,
            });
        }

        if !settings.is_active {
            return Ok(Verdict::Ignored);
        }

        if self.state.is_whitelisted(chat_id, member.id).await? {
            tracing::info!(
                chat = chat_id,
                from = actor,
                bot = member.id,
                "whitelisted bot added to chat"
            );
            return Ok(Verdict::Approved);
        }

        tracing::info!(
            chat = chat_id,
            from = actor,
            bot = member.id,
            "spam bot detected, trying to remove it"
        );
        match self.gateway.remove_member(chat_id, member.id).await {
            Ok(ActionOutcome::Done) => {}
            Ok(ActionOutcome::Denied) => {
                tracing::warn!(
                    chat = chat_id,
                    bot = member.id,
                    "cannot remove spam bot, permission required"
                );
                self.deactivate(chat_id).await?;
                settings.is_active = false;
                return Ok(Verdict::Deactivated);
            }
            Err(e) => {
                tracing::error!(
                    chat = chat_id,
                    bot = member.id,
                    "failed to remove spam bot: {}",
                    e
                );
                return Ok(Verdict::Unresolved);
            }
        }
        tracing::info!(chat = chat_id, bot = member.id, "spam bot removed from chat");

        let warnings = self
            .state
            .add_warning(chat_id, actor, settings.warn_limit)
            .await?;

        if warnings >= settings.warn_limit {
            tracing::info!(chat = chat_id, from = actor, "user reached their warning limit");
            return match self.gateway.remove_member(chat_id, actor).await {
                Ok(ActionOutcome::Done) => {
                    tracing::info!(chat = chat_id, from = actor, "removed the spamming user");
                    self.state.clear_warnings(chat_id, actor).await?;
                    Ok(Verdict::ActorRemoved)
                }
                Ok(ActionOutcome::Denied) => {
                    tracing::warn!(chat = chat_id, from = actor, "cannot remove spamming user");
                    self.deactivate(chat_id).await?;
                    settings.is_active = false;
                    Ok(Verdict::Deactivated)
                }
                Err(e) => {
                    tracing::error!(
                        chat = chat_id,
                        from = actor,
                        "failed to remove spamming user: {}",
                        e
                    );
                    Ok(Verdict::Unresolved)
                }
            };
        }

        if settings.show_warn {
            let notice = Notice::Warning {
                count: warnings,
                limit: settings.warn_limit,
            };
            self.notify(chat_id, OutgoingMessage::new(notice)).await;
        }
        Ok(Verdict::Removed { warnings })
    }

    /// Handle an account leaving a chat.
    pub async fn process_left_member(&self, event: &InboundEvent) -> Result<(), ModerationError> {
        let chat_id = event.chat_id;
        let Some(left) = event.left_member.as_ref() else {
            return Ok(());
        };

        if left.id == self.me {
            tracing::info!(chat = chat_id, "moderator removed from group, cleaning up");
            let creator_id = match self.state.creator_id(chat_id).await {
                Ok(creator_id) => creator_id,
                Err(StoreError::Corrupt { value, .. }) => {
                    tracing::warn!(
                        chat = chat_id,
                        creator = %value,
                        "unparsable creator, keeping admin index entry"
                    );
                    None
                }
                Err(e) => return Err(e.into()),
            };
            self.state.remove_group(chat_id, creator_id).await?;
            tracing::info!(chat = chat_id, "group successfully cleaned up");
        } else if left.is_bot {
            if self.state.whitelist_remove(chat_id, left.id).await? {
                tracing::info!(
                    chat = chat_id,
                    bot = left.id,
                    "bot left group, removed from whitelist"
                );
            }
        }

        Ok(())
    }

    /// Handle a message sent by a bot other than the moderator.
    pub async fn process_bot_message(
        &self,
        event: &InboundEvent,
    ) -> Result<MessageVerdict, ModerationError> {
        let chat_id = event.chat_id;
        let bot = event.sender.id;

        let active = self
            .state
            .settings(chat_id)
            .await?
            .is_some_and(|s| s.is_active);
        if !active {
            tracing::debug!(chat = chat_id, bot, "skip bot message, group inactive");
            return Ok(MessageVerdict::Skipped);
        }

        if self.state.is_whitelisted(chat_id, bot).await? {
            return Ok(MessageVerdict::Approved);
        }

        tracing::info!(
            chat = chat_id,
            bot,
            message = event.message_id,
            "message from unauthorized bot detected"
        );
        match self.gateway.remove_member(chat_id, bot).await {
            Ok(ActionOutcome::Done) => {}
            Ok(ActionOutcome::Denied) => {
                tracing::warn!(chat = chat_id, bot, "cannot remove spam bot, permission required");
                self.deactivate(chat_id).await?;
                return Ok(MessageVerdict::Deactivated);
            }
            Err(e) => {
                tracing::error!(chat = chat_id, bot, "failed to remove spam bot: {}", e);
                return Ok(MessageVerdict::Unresolved);
            }
        }
        tracing::info!(chat = chat_id, bot, "unauthorized bot removed from group");

        let message_deleted = match self.gateway.delete_message(chat_id, event.message_id).await {
            Ok(ActionOutcome::Done) => true,
            Ok(ActionOutcome::Denied) => {
                tracing::warn!(
                    chat = chat_id,
                    message = event.message_id,
                    "cannot delete the message from group"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    chat = chat_id,
                    message = event.message_id,
                    "failed to delete message: {}",
                    e
                );
                false
            }
        };

        Ok(MessageVerdict::Removed { message_deleted })
    }

    /// Turn moderation off after the platform refused a removal.
    async fn deactivate(&self, chat_id: ChatId) -> Result<(), StoreError> {
        self.notify(chat_id, OutgoingMessage::new(Notice::PermissionRequired))
            .await;
        if self.state.set_active(chat_id, false).await? {
            tracing::info!(chat = chat_id, "deactivated group");
        } else {
            tracing::warn!(chat = chat_id, "group is gone, nothing to deactivate");
        }
        Ok(())
    }

    /// Best-effort send; failures are only logged.
    async fn notify(&self, chat_id: ChatId, message: OutgoingMessage) {
        if let Err(e) = self.gateway.send_message(chat_id, message).await {
            tracing::error!(chat = chat_id, "cannot send message into chat: {}", e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
