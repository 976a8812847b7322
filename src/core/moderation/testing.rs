// Test doubles shared by the engine and dispatcher tests.

use super::moderation_models::{
    Account, Administrator, ChatId, ChatKind, InboundEvent, MessageId, Notice, UserId,
};
use crate::core::gateway::{ActionOutcome, ChatGateway, GatewayError, OutgoingMessage};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// A plain supergroup message from `sender` with no membership changes.
pub fn supergroup_event(chat_id: ChatId, sender: Account) -> InboundEvent {
    InboundEvent {
        chat_id,
        chat_kind: ChatKind::Supergroup,
        chat_title: "Test group".to_string(),
        chat_description: String::new(),
        sender,
        message_id: 1,
        new_members: Vec::new(),
        left_member: None,
        is_command: false,
    }
}

/// Gateway that records every call and refuses or fails removals on request.
#[derive(Default)]
pub struct MockGateway {
    admins: Option<Vec<Administrator>>,
    denied: HashSet<UserId>,
    failing: HashSet<UserId>,
    removal_delay: Option<Duration>,
    sent: Mutex<Vec<(ChatId, OutgoingMessage)>>,
    removed: Mutex<Vec<(ChatId, UserId)>>,
    deleted: Mutex<Vec<(ChatId, MessageId)>>,
    left: Mutex<Vec<ChatId>>,
}

impl MockGateway {
    /// Without admins configured, `get_administrators` fails.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admins(mut self, admins: Vec<Administrator>) -> Self {
        self.admins = Some(admins);
        self
    }

    pub fn deny_removal_of(mut self, user_id: UserId) -> Self {
        self.denied.insert(user_id);
        self
    }

    pub fn fail_removal_of(mut self, user_id: UserId) -> Self {
        self.failing.insert(user_id);
        self
    }

    /// Make every removal take `delay` before answering.
    pub fn delay_removals(mut self, delay: Duration) -> Self {
        self.removal_delay = Some(delay);
        self
    }

    pub fn notices(&self, chat_id: ChatId) -> Vec<Notice> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, message)| message.notice.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(ChatId, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(ChatId, UserId)> {
        self.removed.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(ChatId, MessageId)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn left_chats(&self) -> Vec<ChatId> {
        self.left.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    async fn get_administrators(
        &self,
        _chat_id: ChatId,
    ) -> Result<Vec<Administrator>, GatewayError> {
        self.admins
            .clone()
            .ok_or_else(|| GatewayError::Transport("connection reset".to_string()))
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push((chat_id, message));
        Ok(())
    }

    async fn remove_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ActionOutcome, GatewayError> {
        if let Some(delay) = self.removal_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&user_id) {
            return Err(GatewayError::Transport("timed out".to_string()));
        }
        if self.denied.contains(&user_id) {
            return Ok(ActionOutcome::Denied);
        }
        self.removed.lock().unwrap().push((chat_id, user_id));
        Ok(ActionOutcome::Done)
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<ActionOutcome, GatewayError> {
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(ActionOutcome::Done)
    }

    async fn leave_chat(&self, chat_id: ChatId) -> Result<(), GatewayError> {
        self.left.lock().unwrap().push(chat_id);
        Ok(())
    }
}
