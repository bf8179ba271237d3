use std::sync::Arc;

use glider_core::{
    config::Config,
    status::{status, Level},
};
use glider_ytdl::YtDlp;

// Single-threaded scheduler: every blocking call goes through the offload pool.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), glider_core::Error> {
    glider_core::logging::init("glider")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            status(&format!("Failed to load config: {e}"), Level::Fail);
            return Err(e);
        }
    };

    let downloader = Arc::new(YtDlp::new(cfg.ytdlp_path.clone()));

    glider_telegram::router::run_polling(cfg, downloader)
        .await
        .map_err(|e| glider_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
