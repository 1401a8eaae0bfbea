use crate::models::{ImageAsset, UploadOutcome};

/// An image host the uploader can publish chapter pages to.
///
/// Implementations never return errors for ordinary upload failures: a
/// failed attempt is reported as a failed [`UploadOutcome`] carrying the
/// reason.
#[async_trait::async_trait]
pub trait HostBackend: Send + Sync {
    /// Short identifier used in logs and configuration.
    fn name(&self) -> &str;

    /// Reports missing credentials or configuration so callers can fail
    /// every upload without touching the network.
    fn check_ready(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Whether [`HostBackend::create_group`] can ever return an album.
    fn supports_groups(&self) -> bool {
        false
    }

    /// Upload a single image, retrying transient failures internally.
    async fn upload_image(&self, asset: &ImageAsset) -> UploadOutcome;

    /// Best-effort album creation; `None` on any failure.
    async fn create_group(&self, _title: &str, _description: &str, _upload_ids: &[String]) -> Option<String> {
        None
    }
}
