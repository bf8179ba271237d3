use crate::domain::{ChatId, ChatKind, MessageRef, UserId};

/// A parsed command as delivered by a platform adapter.
#[derive(Clone, Debug)]
pub struct IncomingCommand {
    /// The message that carried the command (target of failure reactions).
    pub message: MessageRef,
    pub user_id: UserId,
    pub chat_kind: ChatKind,
    /// Lower-cased command name without prefix or `@bot` suffix.
    pub name: String,
    /// Everything after the command name, trimmed.
    pub args: String,
}

impl IncomingCommand {
    pub fn chat_id(&self) -> ChatId {
        self.message.chat_id
    }
}

/// Split `text` into `(name, args)` if it is a command.
///
/// Accepts `/cmd@botname args` and `<prefix>cmd args`. The prefix match is
/// case-insensitive; an empty prefix disables text-prefix commands.
///
/// A `@botname` suffix must name `bot_username` (case-insensitive), otherwise
/// the command belongs to another bot in the chat and `None` is returned.
pub fn parse_command(
    text: &str,
    prefix: &str,
    bot_username: Option<&str>,
) -> Option<(String, String)> {
    let text = text.trim_start();

    let body = if let Some(rest) = text.strip_prefix('/') {
        rest
    } else if !prefix.is_empty()
        && text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        &text[prefix.len()..]
    } else {
        return None;
    };

    let mut parts = body.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let (name, addressee) = match first.split_once('@') {
        Some((name, addressee)) => (name, Some(addressee)),
        None => (first, None),
    };
    if let Some(addressee) = addressee {
        let ours = bot_username.is_some_and(|me| me.eq_ignore_ascii_case(addressee));
        if !ours {
            return None;
        }
    }

    let name = name.to_lowercase();
    if name.is_empty() {
        return None;
    }

    Some((name, rest))
}
