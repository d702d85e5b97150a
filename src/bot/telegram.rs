//! Telegram transport: long polling, authorization and reply delivery.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use super::commands::Command;
use super::format::{split_message, MAX_MESSAGE_LEN};
use super::service::BotService;

/// Poll Telegram until interrupted.
pub async fn run(bot: Bot, service: Arc<BotService>) {
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to register command list");
    }

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(on_command),
        )
        .branch(dptree::endpoint(on_other));

    info!("Polling Telegram for updates");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![service])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram polling stopped");
}

async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    service: Arc<BotService>,
) -> ResponseResult<()> {
    if !service.is_authorized(msg.chat.id.0) {
        warn!(chat_id = msg.chat.id.0, command = cmd.name(), "Unauthorized chat");
        bot.send_message(msg.chat.id, "Unauthorized.").await?;
        return Ok(());
    }

    if cmd.carries_secrets() {
        // Best effort: bots cannot delete messages in every chat type.
        if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
            warn!(error = %e, "Could not delete message with credentials");
        }
    }

    let reply = service.handle(cmd).await;
    send_reply(&bot, msg.chat.id, &reply).await
}

async fn on_other(bot: Bot, msg: Message, service: Arc<BotService>) -> ResponseResult<()> {
    if !service.is_authorized(msg.chat.id.0) {
        return Ok(());
    }
    debug!(chat_id = msg.chat.id.0, "Ignoring non-command message");
    if msg.text().is_some_and(|t| t.starts_with('/')) {
        bot.send_message(msg.chat.id, "Unknown command. Use /help to list commands.")
            .await?;
    }
    Ok(())
}

async fn send_reply(bot: &Bot, chat: ChatId, text: &str) -> ResponseResult<()> {
    for chunk in split_message(text, MAX_MESSAGE_LEN) {
        bot.send_message(chat, chunk).await?;
    }
    Ok(())
}
