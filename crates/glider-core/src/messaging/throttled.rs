//! Outbound pacing for a [`MessagingPort`].
//!
//! Telegram answers bursts with 429s. Every call through
//! [`ThrottledMessenger`] books a send slot first: at most one call per
//! `global_min_interval` overall, and one per `per_chat_min_interval` in the
//! same chat. Booking happens under a short non-async lock; the wait itself
//! happens outside it.

use std::{collections::HashMap, sync::Arc, sync::Mutex, time::Duration};

use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::port::MessagingPort,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    pub global_min_interval: Duration,
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            // Bot API limits: ~30 msg/s overall, ~1 msg/s per chat.
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

/// Earliest free slot, overall and per chat.
#[derive(Debug)]
struct Schedule {
    cfg: ThrottleConfig,
    next_any: Option<Instant>,
    next_in_chat: HashMap<ChatId, Instant>,
}

impl Schedule {
    fn new(cfg: ThrottleConfig) -> Self {
        Self {
            cfg,
            next_any: None,
            next_in_chat: HashMap::new(),
        }
    }

    /// Book the first slot at or after `now` that satisfies both intervals
    /// and return how long the caller has to wait for it.
    fn book(&mut self, chat: Option<ChatId>, now: Instant) -> Duration {
        // Chats whose slot is already free carry no information.
        self.next_in_chat.retain(|_, next| *next > now);

        let mut at = self.next_any.map_or(now, |next| next.max(now));
        if let Some(chat) = chat {
            if let Some(next) = self.next_in_chat.get(&chat) {
                at = at.max(*next);
            }
            self.next_in_chat
                .insert(chat, at + self.cfg.per_chat_min_interval);
        }
        self.next_any = Some(at + self.cfg.global_min_interval);

        at - now
    }
}

/// Paces calls to the wrapped messenger; the Telegram adapter still retries
/// once on `RetryAfter` if a 429 slips through.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    schedule: Mutex<Schedule>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            schedule: Mutex::new(Schedule::new(cfg)),
        }
    }

    async fn pace(&self, chat: Option<ChatId>) {
        let wait = match self.schedule.lock() {
            Ok(mut schedule) => schedule.book(chat, Instant::now()),
            // A poisoned schedule only loses pacing, never the message.
            Err(poisoned) => poisoned.into_inner().book(chat, Instant::now()),
        };
        if !wait.is_zero() {
            tracing::trace!(?chat, wait_ms = wait.as_millis() as u64, "pacing outbound call");
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_text(chat_id, text).await
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.pace(Some(msg.chat_id)).await;
        self.inner.edit_text(msg, text).await
    }

    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        self.pace(Some(msg.chat_id)).await;
        self.inner.set_reaction(msg, emoji).await
    }

    async fn set_presence(&self, text: &str) -> Result<()> {
        self.pace(None).await;
        self.inner.set_presence(text).await
    }
}
