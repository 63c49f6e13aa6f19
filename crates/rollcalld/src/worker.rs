//! Dedicated extraction worker thread.
//!
//! Extraction is CPU-bound and can take hundreds of milliseconds, so it
//! runs on its own OS thread behind an mpsc request queue; async callers
//! get a clone-cheap [`ExtractorHandle`] that enforces a bounded deadline
//! per request. No storage lock is ever held while a request is in flight.

use std::time::Duration;

use rollcall_core::{Embedding, EmbeddingExtractor, ExtractionError};
use tokio::sync::{mpsc, oneshot};

struct ExtractRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<Embedding>, ExtractionError>>,
}

/// Clone-safe handle to the extraction worker.
#[derive(Clone)]
pub struct ExtractorHandle {
    tx: mpsc::Sender<ExtractRequest>,
    timeout: Duration,
}

/// Spawn the worker thread around a blocking extraction function and
/// return its handle. The function typically wraps
/// `rollcall_extract::OnnxExtractor::extract_all`.
pub fn spawn_extractor<F>(mut extract: F, timeout: Duration) -> ExtractorHandle
where
    F: FnMut(&[u8]) -> Result<Vec<Embedding>, ExtractionError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ExtractRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-extract".into())
        .spawn(move || {
            tracing::info!("extraction worker started");
            while let Some(req) = rx.blocking_recv() {
                let result = extract(&req.image);
                let _ = req.reply.send(result);
            }
            tracing::info!("extraction worker exiting");
        })
        .expect("failed to spawn extraction worker");

    ExtractorHandle { tx, timeout }
}

impl EmbeddingExtractor for ExtractorHandle {
    async fn extract(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ExtractRequest {
                image: image.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ExtractionError::Backend("extraction worker gone".into()))?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Err(_) => Err(ExtractionError::Timeout),
            Ok(Err(_)) => Err(ExtractionError::Backend(
                "extraction worker dropped the request".into(),
            )),
            Ok(Ok(result)) => result,
        }
    }
}
