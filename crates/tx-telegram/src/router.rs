use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tx_core::{
    config::Config,
    export::Exporter,
    flow::ExportFlow,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    ports::{ChannelDispatcher, TrackerClient},
    scheduler::ExportScheduler,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<ExportFlow>,
    /// Cancelled when a fatal platform error makes further progress impossible.
    pub fatal: CancellationToken,
}

pub async fn run_polling(cfg: Arc<Config>, tracker: Arc<dyn TrackerClient>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Fails fast on a bad token before any session starts.
    let me = bot.get_me().await?;
    info!(username = %me.username(), "bot started");
    info!(
        projects = cfg.exported_projects().count(),
        allowed_users = cfg.allowed_users.len(),
        "export configuration loaded"
    );

    // One throttled messenger serves both prompts and digest delivery so
    // they share the per-chat flood limits.
    let messenger = Arc::new(ThrottledMessenger::new(
        Arc::new(TelegramMessenger::new(bot.clone())),
        ThrottleConfig::default(),
    ));
    let dispatcher: Arc<dyn ChannelDispatcher> = messenger.clone();
    let prompts: Arc<dyn MessagingPort> = messenger;

    let exporter = Arc::new(Exporter::new(cfg.projects.clone(), tracker, dispatcher));

    let scheduler = match &cfg.schedule {
        Some(schedule) => {
            let s = ExportScheduler::new(schedule, exporter.clone())?;
            s.start().await;
            Some(s)
        }
        None => None,
    };

    let fatal = CancellationToken::new();
    let state = Arc::new(AppState {
        flow: Arc::new(ExportFlow::new(
            cfg.allowed_users.clone(),
            exporter,
            prompts,
        )),
        fatal: fatal.clone(),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    let shutdown = dispatcher.shutdown_token();
    let watcher = {
        let fatal = fatal.clone();
        tokio::spawn(async move {
            fatal.cancelled().await;
            match shutdown.shutdown() {
                Ok(done) => done.await,
                Err(e) => warn!(error = %e, "dispatcher was not running"),
            }
        })
    };

    dispatcher.dispatch().await;
    watcher.abort();

    if let Some(s) = scheduler {
        s.stop().await;
    }

    if fatal.is_cancelled() {
        error!("stopped after a fatal platform error");
        anyhow::bail!("telegram platform error is unrecoverable");
    }

    info!("bot stopped");
    Ok(())
}
