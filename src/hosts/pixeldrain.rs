use crate::config::HostConfig;
use crate::error::{Result, UploadError};
use crate::hosts::{read_asset, upload_with_retry, RetryPolicy};
use crate::models::{ImageAsset, UploadOutcome};
use crate::traits::HostBackend;
use crate::utils::HttpClient;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

const API_URL: &str = "https://pixeldrain.com/api/file";

#[derive(Debug, Deserialize)]
struct PixeldrainResponse {
    id: Option<String>,
}

pub struct PixeldrainHost {
    http_client: HttpClient,
    api_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl PixeldrainHost {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let api_url = config.api_url.clone().unwrap_or_else(|| API_URL.to_string());
        Ok(Self {
            http_client: HttpClient::new(config.timeout(), config.requests_per_minute)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: HostConfig::credential(&config.api_key).map(str::to_string),
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn attempt_upload(&self, asset: &ImageAsset) -> std::result::Result<UploadOutcome, UploadError> {
        let bytes = read_asset(asset).await?;
        let form = Form::new().part("file", Part::bytes(bytes).file_name(asset.filename.clone()));

        let mut request = self.http_client.client().post(&self.api_url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.basic_auth("", Some(key));
        }
        let response = self.http_client.send(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::from_status(status, &body));
        }

        let parsed: PixeldrainResponse = serde_json::from_str(&body)
            .map_err(|e| UploadError::permanent(format!("Malformed pixeldrain response: {}", e)))?;
        let id = parsed
            .id
            .ok_or_else(|| UploadError::permanent("No file ID in response"))?;
        let url = format!("{}/{}", self.api_url, id);
        debug!("[PIXELDRAIN] {} -> {}", asset.filename, url);
        Ok(UploadOutcome::success(&asset.filename, url).with_upload_id(id))
    }
}

#[async_trait::async_trait]
impl HostBackend for PixeldrainHost {
    fn name(&self) -> &str {
        "pixeldrain"
    }

    async fn upload_image(&self, asset: &ImageAsset) -> UploadOutcome {
        upload_with_retry("PIXELDRAIN", asset, &self.retry, || self.attempt_upload(asset)).await
    }
}
