use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::{ChatId, UserId};

// ============== Ownership ==============

pub fn is_owner(user_id: UserId, owner_ids: &[i64]) -> bool {
    owner_ids.contains(&user_id.0)
}

/// Empty allow-list means every chat is permitted.
pub fn is_chat_allowed(chat_id: ChatId, allowed_chats: &[i64]) -> bool {
    allowed_chats.is_empty() || allowed_chats.contains(&chat_id.0)
}

// ============== Cooldown (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-user token bucket: `max_tokens` uses per `window`, refilled continuously.
#[derive(Clone, Debug)]
pub struct Cooldown {
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<UserId, Bucket>,
}

impl Cooldown {
    pub fn new(max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = max_tokens.max(1) as f64;
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: HashMap::new(),
        }
    }

    /// `Ok(())` consumes a token; `Err(retry_after)` when the bucket is empty.
    pub fn check(&mut self, user_id: UserId) -> Result<(), Duration> {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> Result<(), Duration> {
        self.forget_refilled(now);

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Err(Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX))
    }

    /// Drop buckets that have refilled completely; a fresh one is identical.
    fn forget_refilled(&mut self, now: Instant) {
        let (max, rate) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max
        });
    }
}
