use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use rollcall_core::{Comparator, DecisionEngine};
use rollcall_extract::OnnxExtractor;
use rollcall_store::{EmbeddingCipher, SqliteStore};

mod config;
mod dbus_interface;
mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::load()?;
    if config.is_default_passphrase() {
        tracing::warn!(
            "ROLLCALL_KEY_PASSPHRASE not set; embeddings are sealed with the built-in \
             development passphrase"
        );
    }

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let cipher = EmbeddingCipher::from_passphrase(&config.key_passphrase);
    let store = SqliteStore::open(&config.db_path, cipher).await?;
    tracing::info!(path = %config.db_path.display(), "store opened");

    let mut extractor = OnnxExtractor::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
        config.embedding_dim,
    )?;
    let extractor_handle = worker::spawn_extractor(
        move |image| extractor.extract_all(image).map_err(Into::into),
        Duration::from_secs(config.extract_timeout_secs),
    );

    let comparator = Comparator::new(config.metric, config.threshold);
    tracing::info!(
        metric = %comparator.metric(),
        threshold = comparator.threshold(),
        dim = config.embedding_dim,
        "decision engine configured"
    );

    let engine = DecisionEngine::new(extractor_handle, store, comparator);
    let service = dbus_interface::AttendanceService::new(
        engine,
        config.db_path.to_string_lossy().into_owned(),
    );

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
