use crate::config::HostConfig;
use crate::error::{Result, UploadError};
use crate::hosts::{read_asset, upload_with_retry, RetryPolicy};
use crate::models::{ImageAsset, UploadOutcome};
use crate::traits::HostBackend;
use crate::utils::HttpClient;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, warn};

const API_URL: &str = "https://catbox.moe/user/api.php";

pub struct CatboxHost {
    http_client: HttpClient,
    api_url: String,
    userhash: Option<String>,
    retry: RetryPolicy,
}

impl CatboxHost {
    pub fn new(config: &HostConfig) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config.timeout(), config.requests_per_minute)?,
            api_url: config.api_url.clone().unwrap_or_else(|| API_URL.to_string()),
            userhash: HostConfig::credential(&config.userhash).map(str::to_string),
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn attempt_upload(&self, asset: &ImageAsset) -> std::result::Result<UploadOutcome, UploadError> {
        let bytes = read_asset(asset).await?;
        let part = Part::bytes(bytes)
            .file_name(asset.filename.clone())
            .mime_str("application/octet-stream")
            .map_err(|e| UploadError::permanent(e.to_string()))?;

        let mut form = Form::new().text("reqtype", "fileupload").part("fileToUpload", part);
        if let Some(userhash) = &self.userhash {
            form = form.text("userhash", userhash.clone());
        }

        let request = self.http_client.client().post(&self.api_url).multipart(form);
        let response = self.http_client.send(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::from_status(status, &body));
        }

        let url = body.trim();
        if !url.starts_with("http") {
            return Err(UploadError::permanent(format!("Unexpected catbox response: {}", url)));
        }

        debug!("[CATBOX] {} -> {}", asset.filename, url);
        Ok(UploadOutcome::success(&asset.filename, url))
    }
}

#[async_trait::async_trait]
impl HostBackend for CatboxHost {
    fn name(&self) -> &str {
        "catbox"
    }

    fn supports_groups(&self) -> bool {
        true
    }

    async fn upload_image(&self, asset: &ImageAsset) -> UploadOutcome {
        upload_with_retry("CATBOX", asset, &self.retry, || self.attempt_upload(asset)).await
    }

    async fn create_group(&self, title: &str, description: &str, upload_ids: &[String]) -> Option<String> {
        if upload_ids.is_empty() {
            return None;
        }

        let mut form = Form::new()
            .text("reqtype", "createalbum")
            .text("title", title.to_string())
            .text("desc", description.to_string())
            .text("files", upload_ids.join(" "));
        if let Some(userhash) = &self.userhash {
            form = form.text("userhash", userhash.clone());
        }

        let request = self.http_client.client().post(&self.api_url).multipart(form);
        let response = match self.http_client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[CATBOX] album request failed: {}", e);
                return None;
            }
        };
        if !response.status().is_success() {
            warn!("[CATBOX] album creation rejected: HTTP {}", response.status());
            return None;
        }

        let body = response.text().await.ok()?;
        let url = body.trim();
        if url.starts_with("http") {
            info!("[CATBOX] created album {}", url);
            Some(url.to_string())
        } else {
            None
        }
    }
}
