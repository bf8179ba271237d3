use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use glider_core::{
    commands::{AppContext, CommandDispatcher},
    config::Config,
    download::AudioDownloader,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    offload::OffloadBridge,
    status::{status, Level},
};

use crate::handlers;
use crate::TelegramMessenger;

/// Log in, wire the core, and poll until logout or Ctrl-C.
pub async fn run_polling(
    cfg: Arc<Config>,
    downloader: Arc<dyn AudioDownloader>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // A bad token surfaces here; it is fatal.
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            status(&format!("Login failed: {e}"), Level::Fail);
            return Err(e.into());
        }
    };
    let username = me.username().to_string();
    tracing::info!("logged in as @{username}");
    tracing::info!("download directory: {}", cfg.download_dir.display());

    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(
        bot.clone(),
        &cfg.telegram_bot_token,
    ));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let offload = Arc::new(OffloadBridge::new(cfg.worker_threads)?.with_deadline(cfg.offload_timeout));
    tracing::info!(
        workers = offload.size(),
        timeout_secs = cfg.offload_timeout.as_secs(),
        "offload pool ready"
    );

    let ctx = Arc::new(AppContext::new(
        cfg.clone(),
        messenger.clone(),
        downloader,
        offload,
        Some(username),
    ));
    let shutdown = ctx.shutdown.clone();
    let commands = Arc::new(CommandDispatcher::new(ctx));

    if let Err(e) = messenger.set_presence(&cfg.presence).await {
        tracing::warn!("failed to update presence: {e}");
    }

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![commands])
        .build();

    // `logout` and Ctrl-C both end polling through the same token.
    let shutdown_token = dispatcher.shutdown_token();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }
    tokio::spawn(async move {
        shutdown.cancelled().await;
        match shutdown_token.shutdown() {
            Ok(done) => done.await,
            Err(e) => tracing::warn!("dispatcher shutdown: {e}"),
        }
    });

    status("Awaiting...", Level::Ok);
    dispatcher.dispatch().await;
    status("Logged out.", Level::Warn);

    Ok(())
}
