use std::sync::Arc;

use tracing::error;

use tx_core::config::Config;
use tx_redmine::RedmineClient;

#[tokio::main]
async fn main() -> Result<(), tx_core::Error> {
    tx_core::logging::init("texporter")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(error = %e, "cannot start");
            return Err(e);
        }
    };

    let tracker = Arc::new(RedmineClient::new(
        &cfg.tracker_url,
        cfg.tracker_api_key.clone(),
        cfg.page_limit,
    )?);

    tx_telegram::router::run_polling(cfg, tracker)
        .await
        .map_err(|e| tx_core::Error::platform_fatal(format!("telegram bot failed: {e}")))?;

    Ok(())
}
