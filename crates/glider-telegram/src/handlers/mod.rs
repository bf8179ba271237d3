//! Telegram update handlers.
//!
//! Converts a Telegram message into an `IncomingCommand` and hands it to the
//! core dispatcher. Non-command messages are ignored.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use glider_core::{
    commands::CommandDispatcher,
    domain::{ChatId, ChatKind, MessageId, MessageRef, UserId},
    messaging::types::{parse_command, IncomingCommand},
};

pub async fn handle_message(
    msg: Message,
    commands: Arc<CommandDispatcher>,
) -> ResponseResult<()> {
    let ctx = commands.context();
    let prefix = &ctx.cfg.command_prefix;
    let Some(cmd) = to_command(&msg, prefix, ctx.bot_username.as_deref()) else {
        return Ok(());
    };

    // Run detached so a long download does not hold up this chat's update
    // queue; the dispatcher reports its own failures.
    tokio::spawn(async move {
        commands.dispatch(cmd).await;
    });

    Ok(())
}

/// `None` for non-commands and for `/cmd@other_bot` addressed elsewhere.
fn to_command(
    msg: &Message,
    prefix: &str,
    bot_username: Option<&str>,
) -> Option<IncomingCommand> {
    let user = msg.from()?;
    let text = msg.text()?;
    let (name, args) = parse_command(text, prefix, bot_username)?;

    let chat_kind = if msg.chat.is_private() {
        ChatKind::Private
    } else {
        ChatKind::Group
    };

    Some(IncomingCommand {
        message: MessageRef {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        },
        user_id: UserId(user.id.0 as i64),
        chat_kind,
        name,
        args,
    })
}
