use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    Result,
};

/// Cross-messenger port.
///
/// The command core only ever talks to the platform through this trait:
/// replies, edits, reactions and presence.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;

    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()>;

    /// Update the bot's public status line.
    async fn set_presence(&self, text: &str) -> Result<()>;
}
