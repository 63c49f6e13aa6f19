//! Daemon configuration.
//!
//! Layered: built-in defaults, then an optional TOML file named by
//! `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables on top.

use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;

use rollcall_core::Metric;

pub const DEFAULT_PASSPHRASE: &str = "rollcall-dev-passphrase";

pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Passphrase the embedding-at-rest key is derived from.
    pub key_passphrase: String,
    /// Embedding dimensionality the deployment's extractor produces.
    pub embedding_dim: usize,
    /// Comparison metric, fixed per deployment.
    pub metric: Metric,
    /// Match threshold for the chosen metric.
    pub threshold: f32,
    /// Deadline for one extraction request, in seconds.
    pub extract_timeout_secs: u64,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    key_passphrase: Option<String>,
    embedding_dim: Option<usize>,
    metric: Option<String>,
    threshold: Option<f32>,
    extract_timeout_secs: Option<u64>,
}

/// Metric-appropriate default: cosine similarity floor vs distance ceiling.
fn default_threshold(metric: Metric) -> f32 {
    match metric {
        Metric::Cosine => 0.40,
        Metric::Euclidean => 0.60,
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                toml::from_str::<FileConfig>(&text)
                    .with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => FileConfig::default(),
        };

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = env_path("ROLLCALL_DB_PATH")
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));
        let model_dir = env_path("ROLLCALL_MODEL_DIR")
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let metric: Metric = match std::env::var("ROLLCALL_METRIC").ok().or(file.metric) {
            Some(s) => s.parse()?,
            None => Metric::Cosine,
        };

        Ok(Self {
            db_path,
            model_dir,
            key_passphrase: std::env::var("ROLLCALL_KEY_PASSPHRASE")
                .ok()
                .or(file.key_passphrase)
                .unwrap_or_else(|| DEFAULT_PASSPHRASE.to_string()),
            embedding_dim: env_usize("ROLLCALL_EMBEDDING_DIM")
                .or(file.embedding_dim)
                .unwrap_or(512),
            metric,
            threshold: env_f32("ROLLCALL_THRESHOLD")
                .or(file.threshold)
                .unwrap_or_else(|| default_threshold(metric)),
            extract_timeout_secs: env_u64("ROLLCALL_EXTRACT_TIMEOUT_SECS")
                .or(file.extract_timeout_secs)
                .unwrap_or(10),
        })
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn is_default_passphrase(&self) -> bool {
        self.key_passphrase == DEFAULT_PASSPHRASE
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_default_per_metric() {
        assert_eq!(default_threshold(Metric::Cosine), 0.40);
        assert_eq!(default_threshold(Metric::Euclidean), 0.60);
    }

    #[test]
    fn file_config_parses_a_full_document() {
        let parsed: FileConfig = toml::from_str(
            r#"
            db_path = "/var/lib/rollcall/rollcall.db"
            model_dir = "/usr/share/rollcall/models"
            key_passphrase = "s3cret"
            embedding_dim = 128
            metric = "euclidean"
            threshold = 0.55
            extract_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(parsed.embedding_dim, Some(128));
        assert_eq!(parsed.metric.as_deref(), Some("euclidean"));
        assert_eq!(parsed.threshold, Some(0.55));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("tolerance = 0.6").is_err());
    }
}
