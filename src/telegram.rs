//! Telegram transport
//!
//! Adapts teloxide messages to [`InboundCommand`]s, sends replies through the
//! Bot API, and keeps long polling alive: if the bot cannot reach Telegram
//! the loop logs it, waits, and tries again until Ctrl-C.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{InputFile, Update},
};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatcher::{CommandDispatcher, InboundCommand, ReplySink};
use crate::remote::{RemoteExecutor, SshExecutor};

/// Replies through the Telegram Bot API
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ReplySink for TelegramSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_image(&self, chat_id: i64, path: &Path) -> Result<()> {
        self.bot
            .send_photo(ChatId(chat_id), InputFile::file(path))
            .await?;
        Ok(())
    }
}

/// Transport-independent view of a Telegram message, stamped on delivery.
///
/// Non-text messages become an empty command text so strangers still get
/// the rejection reply.
pub fn inbound_from_message(msg: &Message) -> InboundCommand {
    let chat_id = msg.chat.id.0;
    let user_id = msg
        .from
        .as_ref()
        .map(|u| u.id.0 as i64)
        .unwrap_or(chat_id);
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.clone())
        .or_else(|| msg.chat.username().map(str::to_string));

    InboundCommand::new(user_id, chat_id, username, msg.text().unwrap_or_default())
}

/// Message endpoint for the teloxide dispatcher
async fn message_handler(
    bot: Bot,
    msg: Message,
    dispatcher: Arc<CommandDispatcher>,
) -> ResponseResult<()> {
    let event = inbound_from_message(&msg);
    debug!(
        "Message received: user={}, chat={}, text={:?}",
        event.user_id,
        event.chat_id,
        event.text.chars().take(50).collect::<String>()
    );

    let sink = TelegramSink::new(bot);
    let outcome = dispatcher.handle(&event, &sink).await;
    debug!("Message from {} -> {:?}", event.user_id, outcome);

    Ok(())
}

/// One polling session. Returns when the dispatcher stops or Telegram is
/// unreachable at startup.
async fn serve(bot: Bot, dispatcher: Arc<CommandDispatcher>) -> Result<()> {
    let me = bot.get_me().await.context("verifying bot token")?;
    info!(
        "Bot authenticated: @{} (ID: {})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );

    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    info!("Starting dispatcher with long polling...");
    // No per-chat queueing: every update reaches the handler (and gets its
    // arrival stamp) at once, then waits for the dispatcher in order.
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .distribution_function(|_| None::<std::convert::Infallible>)
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Run the bot until Ctrl-C, reconnecting after transport failures
pub async fn run(config: Arc<Config>) -> Result<()> {
    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(&config));
    let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&config), executor));
    let bot = Bot::new(config.token.expose());

    loop {
        tokio::select! {
            result = serve(bot.clone(), Arc::clone(&dispatcher)) => match result {
                Ok(()) => warn!("Telegram connection lost: dispatcher stopped"),
                Err(e) => error!("Telegram connection lost: {:#}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                return Ok(());
            }
        }

        info!("Reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                return Ok(());
            }
        }
    }
}
