//! Telegram adapter (teloxide).
//!
//! This crate implements the `glider-core` MessagingPort over the Telegram Bot
//! API and feeds incoming commands into the core dispatcher.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use glider_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    failure::{REACTION_FAILED, REACTION_OK, REACTION_PARTIAL},
    messaging::port::MessagingPort,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    /// Raw Bot API access for methods teloxide 0.12 does not wrap.
    http: reqwest::Client,
    api_base: String,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, token: &str) -> Self {
        Self {
            bot,
            http: reqwest::Client::new(),
            api_base: format!("https://api.telegram.org/bot{token}"),
        }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    async fn call_raw(&self, method: &str, body: serde_json::Value) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("telegram {method} request error: {e}")))?;

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("telegram {method} json error: {e}")))?;

        if v.get("ok").and_then(|ok| ok.as_bool()) != Some(true) {
            let description = v
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown error");
            return Err(Error::External(format!(
                "telegram {method} failed: {description}"
            )));
        }
        Ok(())
    }
}

/// Telegram only accepts a fixed set of reaction emoji.
fn telegram_reaction(emoji: &str) -> &str {
    match emoji {
        REACTION_OK => "👍",
        REACTION_FAILED => "👎",
        REACTION_PARTIAL => "🤔",
        other => other,
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot.edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg.message_id),
                text.to_string(),
            )
        })
        .await?;
        Ok(())
    }

    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        self.call_raw(
            "setMessageReaction",
            serde_json::json!({
                "chat_id": msg.chat_id.0,
                "message_id": msg.message_id.0,
                "reaction": [{ "type": "emoji", "emoji": telegram_reaction(emoji) }],
            }),
        )
        .await
    }

    async fn set_presence(&self, text: &str) -> Result<()> {
        self.call_raw(
            "setMyShortDescription",
            serde_json::json!({ "short_description": text }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reactions_map_to_allowed_emoji() {
        assert_eq!(telegram_reaction(REACTION_OK), "👍");
        assert_eq!(telegram_reaction(REACTION_FAILED), "👎");
        assert_eq!(telegram_reaction(REACTION_PARTIAL), "🤔");
        assert_eq!(telegram_reaction("🔥"), "🔥");
    }
}
