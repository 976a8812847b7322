// Chat gateway port.
//
// A refused privileged action is not an error here: it comes back as
// `ActionOutcome::Denied` so the engine can treat it as a policy signal.

use crate::core::moderation::{Administrator, ChatId, MessageId, Notice, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },
}

/// Result of a privileged action such as removing a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    Denied,
}

/// A notice addressed to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub notice: Notice,
    pub reply_to: Option<MessageId>,
    pub silent: bool,
}

impl OutgoingMessage {
    pub fn new(notice: Notice) -> Self {
        Self {
            notice,
            reply_to: None,
            silent: false,
        }
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn get_administrators(&self, chat_id: ChatId)
        -> Result<Vec<Administrator>, GatewayError>;

    async fn send_message(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError>;

    async fn remove_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ActionOutcome, GatewayError>;

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<ActionOutcome, GatewayError>;

    async fn leave_chat(&self, chat_id: ChatId) -> Result<(), GatewayError>;
}

// Lets one client serve both the engine and the update poller.
#[async_trait]
impl<T: ChatGateway + ?Sized> ChatGateway for Arc<T> {
    async fn get_administrators(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<Administrator>, GatewayError> {
        (**self).get_administrators(chat_id).await
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError> {
        (**self).send_message(chat_id, message).await
    }

    async fn remove_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ActionOutcome, GatewayError> {
        (**self).remove_member(chat_id, user_id).await
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<ActionOutcome, GatewayError> {
        (**self).delete_message(chat_id, message_id).await
    }

    async fn leave_chat(&self, chat_id: ChatId) -> Result<(), GatewayError> {
        (**self).leave_chat(chat_id).await
    }
}
