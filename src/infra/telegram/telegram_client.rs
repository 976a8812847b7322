use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::api_types::{ApiResponse, ChatMember, Update, User};
use super::notices;
use crate::core::gateway::{ActionOutcome, ChatGateway, GatewayError, OutgoingMessage};
use crate::core::moderation::{Account, Administrator, ChatId, MessageId, UserId};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Minimal Telegram Bot API client. It only exposes the calls moderation needs.
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent("Botguard/0.1")
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    /// POST a method call and unwrap the API envelope. The body is parsed whatever
    /// the HTTP status, since refusals come back as 4xx with a JSON description.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, GatewayError> {
        let url = format!("{}/{}", self.base_url, method);
        let resp = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let body: ApiResponse<T> = resp.json().await.map_err(|e| {
            GatewayError::Transport(format!("{} returned {} with bad body: {}", method, status, e))
        })?;

        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(GatewayError::Api {
                code: body.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: body
                    .description
                    .unwrap_or_else(|| format!("{} failed", method)),
            }),
        }
    }

    /// Run a privileged action, folding permission refusals into `Denied`.
    async fn privileged(
        &self,
        method: &str,
        params: Value,
    ) -> Result<ActionOutcome, GatewayError> {
        match self.call::<bool>(method, params).await {
            Ok(_) => Ok(ActionOutcome::Done),
            Err(GatewayError::Api { code, description }) if is_refusal(code, &description) => {
                tracing::debug!("{} refused: {}", method, description);
                Ok(ActionOutcome::Denied)
            }
            Err(e) => Err(e),
        }
    }

    /// The account this client is authenticated as.
    pub async fn get_me(&self) -> Result<Account, GatewayError> {
        let me: User = self.call("getMe", json!({})).await?;
        Ok(me.into())
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_secs`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, GatewayError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

/// Whether an API error means the bot lacks the rights for the action.
///
/// 403 is always a refusal. Other 400s (target is an admin, not a member any more,
/// and so on) are plain errors.
fn is_refusal(code: i64, description: &str) -> bool {
    if code == 403 {
        return true;
    }
    let description = description.to_ascii_lowercase();
    code == 400
        && ["not enough rights", "chat_admin_required", "have no rights"]
            .iter()
            .any(|needle| description.contains(needle))
}

#[async_trait]
impl ChatGateway for TelegramClient {
    async fn get_administrators(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<Administrator>, GatewayError> {
        let members: Vec<ChatMember> = self
            .call("getChatAdministrators", json!({ "chat_id": chat_id }))
            .await?;
        Ok(members.into_iter().map(Administrator::from).collect())
    }

    async fn send_message(
        &self,
        chat_id: ChatId,
        message: OutgoingMessage,
    ) -> Result<(), GatewayError> {
        let (text, parse_mode) = notices::render(&message.notice);

        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_notification": message.silent,
        });
        if let Some(mode) = parse_mode {
            params["parse_mode"] = json!(mode);
        }
        if let Some(reply_to) = message.reply_to {
            params["reply_parameters"] = json!({
                "message_id": reply_to,
                "allow_sending_without_reply": true,
            });
        }

        let _: Value = self.call("sendMessage", params).await?;
        Ok(())
    }

    async fn remove_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<ActionOutcome, GatewayError> {
        self.privileged(
            "banChatMember",
            json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }

    async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<ActionOutcome, GatewayError> {
        self.privileged(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
    }

    async fn leave_chat(&self, chat_id: ChatId) -> Result<(), GatewayError> {
        let _: bool = self.call("leaveChat", json!({ "chat_id": chat_id })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_embeds_token() {
        let client = TelegramClient::new("https://api.telegram.org/", "123:abc").unwrap();
        assert_eq!(client.base_url, "https://api.telegram.org/bot123:abc");
    }

    #[test]
    fn test_error_envelope_parses() {
        let body: ApiResponse<bool> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: not enough rights"}"#,
        )
        .unwrap();

        assert!(!body.ok);
        assert_eq!(body.result, None);
        assert_eq!(body.error_code, Some(400));
    }

    #[test]
    fn test_only_rights_errors_are_refusals() {
        assert!(is_refusal(
            400,
            "Bad Request: not enough rights to restrict/ban chat member"
        ));
        assert!(is_refusal(400, "Bad Request: CHAT_ADMIN_REQUIRED"));
        assert!(is_refusal(403, "Forbidden: bot was kicked from the supergroup chat"));

        assert!(!is_refusal(400, "Bad Request: user is an administrator of the chat"));
        assert!(!is_refusal(400, "Bad Request: PARTICIPANT_ID_INVALID"));
        assert!(!is_refusal(429, "Too Many Requests: retry after 5"));
    }
}
