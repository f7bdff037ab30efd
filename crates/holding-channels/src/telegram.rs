use crate::notifier::{Alert, Notifier};
use async_trait::async_trait;
use holding_core::{HoldingError, HoldingResult};
use serde::{Deserialize, Serialize};

/// Telegram rejects messages above 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API alert channel.
///
/// Posts each alert with `sendMessage` to a fixed chat (the operator's).
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

// ── Telegram API types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

// ── Implementation ──────────────────────────────────────────────────────────

impl TelegramNotifier {
    /// Create a notifier for `chat_id` using the bot token from @BotFather.
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (tests, self-hosted Bot API servers).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, alert: &Alert) -> HoldingResult<()> {
        let text: String = alert.text.chars().take(MAX_MESSAGE_CHARS).collect();
        let payload = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &text,
        };

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| HoldingError::Http(format!("Telegram send error: {e}")))?;

        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| HoldingError::Channel(format!("Telegram parse error: {e}")))?;

        if !body.ok {
            return Err(HoldingError::Channel(format!(
                "Telegram sendMessage failed: {}",
                body.description.unwrap_or_default()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_uses_base_and_token() {
        let n = TelegramNotifier::new("123:abc", "42").with_api_base("http://localhost:9000/");
        assert_eq!(
            n.api_url("sendMessage"),
            "http://localhost:9000/bot123:abc/sendMessage"
        );
    }
}
