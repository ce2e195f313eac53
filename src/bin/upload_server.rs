use anyhow::Context;
use ekyc_session::config::SessionConfig;
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ekyc_session::init_logging();

    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SessionConfig::default_path);
    let config = SessionConfig::load_from_file(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let mut tx = Some(tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    })
    .context("failed to install Ctrl-C handler")?;

    ekyc_session::server::serve(&config.server, async move {
        let _ = rx.await;
        log::info!("Shutdown requested");
    })
    .await?;
    Ok(())
}
