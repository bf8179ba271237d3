//! Command failure classification and reporting.
//!
//! Handlers return a [`CommandError`]; [`report_failure`] turns it into exactly
//! one reply plus one failure reaction on the invoking message. Internal
//! details of unexpected errors go to the log, never to the chat.

use std::time::Duration;

use crate::{
    download::DownloadError,
    formatting::format_duration,
    messaging::{port::MessagingPort, types::IncomingCommand},
    offload::OffloadError,
};

pub const REACTION_OK: &str = "✅";
pub const REACTION_PARTIAL: &str = "⚠️";
pub const REACTION_FAILED: &str = "❌";

/// Why a command check rejected the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckFailure {
    /// Command is not permitted in this chat.
    RestrictedContext,
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command is disabled")]
    Disabled,

    #[error("command not found")]
    NotFound,

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("caller is not an owner")]
    NotOwner,

    #[error("on cooldown for {retry_after:?}")]
    OnCooldown { retry_after: Duration },

    #[error("check failed: {0:?}")]
    CheckFailed(CheckFailure),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCategory {
    CommandDisabled,
    CommandNotFound,
    BadUserInput,
    NotAuthorized,
    RateLimited,
    RestrictedContext,
    CheckFailed,
    AssertionFailed,
    TimedOut,
    Unclassified,
}

/// User-facing outcome of a failed command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub category: FailureCategory,
    pub message: String,
}

pub fn classify(err: &CommandError) -> Failure {
    let (category, message) = match err {
        CommandError::Disabled => (
            FailureCategory::CommandDisabled,
            "Command not available.".to_string(),
        ),
        CommandError::NotFound => (
            FailureCategory::CommandNotFound,
            "Command not found.".to_string(),
        ),
        CommandError::BadArgument(detail) => (
            FailureCategory::BadUserInput,
            format!("Command raised bad argument: {detail}"),
        ),
        CommandError::NotOwner => (
            FailureCategory::NotAuthorized,
            "You do not have enough permissions for this command.".to_string(),
        ),
        CommandError::OnCooldown { retry_after } => (
            FailureCategory::RateLimited,
            format!(
                "You are on cooldown. Try again in {:.2}s",
                retry_after.as_secs_f64()
            ),
        ),
        CommandError::CheckFailed(CheckFailure::RestrictedContext) => (
            FailureCategory::RestrictedContext,
            "Restricted content not allowed here.".to_string(),
        ),
        CommandError::CheckFailed(CheckFailure::Other(_)) => (
            FailureCategory::CheckFailed,
            "You do not have enough permissions to run this command.".to_string(),
        ),
        CommandError::Assertion(detail) => (
            FailureCategory::AssertionFailed,
            format!("Command failed: {detail}"),
        ),
        CommandError::TimedOut(d) => (
            FailureCategory::TimedOut,
            format!("Command timed out after {}.", format_duration(*d)),
        ),
        CommandError::Unexpected(_) => (
            FailureCategory::Unclassified,
            "Command has thrown error(s). See console for more info.".to_string(),
        ),
    };

    Failure { category, message }
}

/// React with [`REACTION_FAILED`] on the invoking message and send one reply.
///
/// Messenger errors are logged and swallowed: reporting must not fail.
pub async fn report_failure(
    messenger: &dyn MessagingPort,
    cmd: &IncomingCommand,
    err: &CommandError,
) -> Failure {
    let failure = classify(err);

    match err {
        CommandError::Unexpected(e) => tracing::error!(
            command = %cmd.name,
            user = cmd.user_id.0,
            chat = cmd.chat_id().0,
            "ignoring exception in command: {e:?}"
        ),
        other => tracing::info!(
            command = %cmd.name,
            user = cmd.user_id.0,
            category = ?failure.category,
            "command failed: {other}"
        ),
    }

    if let Err(e) = messenger.set_reaction(cmd.message, REACTION_FAILED).await {
        tracing::warn!("failed to add failure reaction: {e}");
    }
    if let Err(e) = messenger.send_text(cmd.chat_id(), &failure.message).await {
        tracing::warn!("failed to send failure reply: {e}");
    }

    failure
}

impl From<OffloadError<DownloadError>> for CommandError {
    fn from(err: OffloadError<DownloadError>) -> Self {
        match err {
            OffloadError::TimedOut(d) => CommandError::TimedOut(d),
            OffloadError::Failed(e) => CommandError::Unexpected(anyhow::Error::new(e)),
            other => CommandError::Unexpected(anyhow::Error::new(other)),
        }
    }
}

impl From<crate::Error> for CommandError {
    fn from(err: crate::Error) -> Self {
        CommandError::Unexpected(anyhow::Error::new(err))
    }
}
