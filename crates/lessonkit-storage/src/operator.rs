//! OpenDAL Operator factory for lessonkit storage backends

use anyhow::{Context, Result};
use lessonkit_core::config::{StorageBackend, StorageConfig};
use opendal::Operator;

/// Access keys for the S3 backend
#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for the configured backend.
///
/// The S3 backend needs credentials. If `enforce_tls` is true and the endpoint
/// uses HTTP, this returns an error; otherwise a warning is logged.
pub fn build_operator(cfg: &StorageConfig, credentials: Option<&S3Credentials>) -> Result<Operator> {
    match cfg.backend {
        StorageBackend::Memory => finish(opendal::services::Memory::default()),
        StorageBackend::Fs => {
            let root = cfg
                .root
                .to_str()
                .with_context(|| format!("fs root is not UTF-8: {}", cfg.root.display()))?;
            finish(opendal::services::Fs::default().root(root))
        }
        StorageBackend::S3 => {
            let creds = credentials.context("S3 backend requires credentials")?;
            check_endpoint_tls(cfg)?;
            // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
            let builder = opendal::services::S3::default()
                .endpoint(&cfg.endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(&creds.secret_access_key);
            finish(builder)
        }
    }
}

fn finish<B: opendal::Builder>(builder: B) -> Result<Operator> {
    let op = Operator::new(builder)
        .context("creating OpenDAL operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}

fn check_endpoint_tls(cfg: &StorageConfig) -> Result<()> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true and use HTTPS in production"
        );
    }
    Ok(())
}
