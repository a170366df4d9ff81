use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use profiles_core::config::ProcessingConfig;
use profiles_core::store::{open_store, CoefficientStore, RetryPolicy};
use profiles_core::{CoefficientCache, CoefficientSource};
use tracing::info;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Config file (or defaults) with `.env` and `PROFILES_*` overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<ProcessingConfig> {
    dotenvy::dotenv().ok();
    let mut config = match path {
        Some(path) => ProcessingConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ProcessingConfig::default(),
    };

    let account = std::env::var("PROFILES_TABLE_ACCOUNT").ok();
    let sas_token = std::env::var("PROFILES_TABLE_SAS").ok();
    match (account, sas_token) {
        (Some(account), Some(sas_token)) => {
            config.coefficients = match config.coefficients {
                CoefficientSource::Remote {
                    endpoint,
                    timeout_secs,
                    retry,
                    ..
                } => CoefficientSource::Remote {
                    account,
                    sas_token,
                    endpoint,
                    timeout_secs,
                    retry,
                },
                CoefficientSource::Local { .. } => CoefficientSource::Remote {
                    account,
                    sas_token,
                    endpoint: None,
                    timeout_secs: DEFAULT_TIMEOUT_SECS,
                    retry: RetryPolicy::default(),
                },
            };
        }
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("PROFILES_TABLE_ACCOUNT and PROFILES_TABLE_SAS must be set together");
        }
        (None, None) => {
            if let Ok(coefs_path) = std::env::var("PROFILES_COEFS_PATH") {
                config.coefficients = CoefficientSource::Local {
                    coefs_path: PathBuf::from(coefs_path),
                };
            }
        }
    }
    Ok(config)
}

pub async fn connect_store(config: &ProcessingConfig) -> Result<CoefficientCache> {
    let store: Arc<dyn CoefficientStore> = Arc::from(
        open_store(&config.coefficients).context("opening coefficient store")?,
    );
    info!(backend = store.backend_name(), "loading coefficient tables");
    CoefficientCache::load(store)
        .await
        .context("loading coefficient tables")
}
