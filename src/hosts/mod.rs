pub mod catbox;
pub mod imgbb;
pub mod imgur;
pub mod pixeldrain;

use crate::config::HostConfig;
use crate::error::UploadError;
use crate::models::{ImageAsset, UploadOutcome};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub use catbox::CatboxHost;
pub use imgbb::ImgbbHost;
pub use imgur::ImgurHost;
pub use pixeldrain::PixeldrainHost;

/// Per-host retry policy for transient upload failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms.max(config.retry_base_ms)),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `attempt` until it succeeds, fails permanently, or the attempt cap
/// is reached. Always yields an outcome for `asset`.
pub async fn upload_with_retry<F, Fut>(
    tag: &str,
    asset: &ImageAsset,
    policy: &RetryPolicy,
    mut attempt: F,
) -> UploadOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<UploadOutcome, UploadError>>,
{
    if !asset.path.is_file() {
        return UploadOutcome::failure(&asset.filename, "File not found");
    }

    let max_attempts = policy.attempts;
    let mut count = 0u32;
    let result = backoff::future::retry(policy.backoff(), || {
        count += 1;
        let current = count;
        let fut = attempt();
        async move {
            match fut.await {
                Ok(outcome) => Ok(outcome),
                Err(err) if err.is_transient() && current < max_attempts => {
                    debug!("[{}] attempt {}/{} for {} failed: {}", tag, current, max_attempts, asset.filename, err);
                    Err(match err.retry_after() {
                        Some(wait) => backoff::Error::retry_after(err, wait),
                        None => backoff::Error::transient(err),
                    })
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("[{}] upload of {} failed: {}", tag, asset.filename, err);
            UploadOutcome::failure(&asset.filename, err.to_string())
        }
    }
}

/// Read an image from disk; a vanished file is not worth retrying.
pub(crate) async fn read_asset(asset: &ImageAsset) -> Result<Vec<u8>, UploadError> {
    tokio::fs::read(&asset.path)
        .await
        .map_err(|e| UploadError::permanent(format!("Cannot read {}: {}", asset.filename, e)))
}
