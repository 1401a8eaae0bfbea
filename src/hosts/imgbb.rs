use crate::config::HostConfig;
use crate::error::{Result, UploadError};
use crate::hosts::{read_asset, upload_with_retry, RetryPolicy};
use crate::models::{ImageAsset, UploadOutcome};
use crate::traits::HostBackend;
use crate::utils::HttpClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

const API_URL: &str = "https://api.imgbb.com/1/upload";

#[derive(Debug, Deserialize)]
struct ImgbbResponse {
    #[serde(default)]
    success: bool,
    data: Option<ImgbbData>,
    error: Option<ImgbbError>,
}

#[derive(Debug, Deserialize)]
struct ImgbbData {
    id: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ImgbbError {
    message: String,
}

/// ImgBB has no album API; every chapter is a flat list of image links.
pub struct ImgbbHost {
    http_client: HttpClient,
    api_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl ImgbbHost {
    pub fn new(config: &HostConfig) -> Result<Self> {
        Ok(Self {
            http_client: HttpClient::new(config.timeout(), config.requests_per_minute)?,
            api_url: config.api_url.clone().unwrap_or_else(|| API_URL.to_string()),
            api_key: HostConfig::credential(&config.api_key).map(str::to_string),
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn attempt_upload(&self, key: &str, asset: &ImageAsset) -> std::result::Result<UploadOutcome, UploadError> {
        let bytes = read_asset(asset).await?;
        let stem = asset
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| asset.filename.clone());
        let form = [
            ("key", key.to_string()),
            ("image", STANDARD.encode(bytes)),
            ("name", stem),
        ];

        let request = self.http_client.client().post(&self.api_url).form(&form);
        let response = self.http_client.send(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::from_status(status, &body));
        }

        let parsed: ImgbbResponse = serde_json::from_str(&body)
            .map_err(|e| UploadError::permanent(format!("Malformed imgbb response: {}", e)))?;
        match parsed.data {
            Some(data) if parsed.success => {
                debug!("[IMGBB] {} -> {}", asset.filename, data.url);
                let outcome = UploadOutcome::success(&asset.filename, data.url);
                Ok(match data.id {
                    Some(id) => outcome.with_upload_id(id),
                    None => outcome,
                })
            }
            _ => {
                let reason = parsed.error.map_or_else(|| "Unknown error".to_string(), |e| e.message);
                Err(UploadError::permanent(format!("ImgBB API error: {}", reason)))
            }
        }
    }
}

#[async_trait::async_trait]
impl HostBackend for ImgbbHost {
    fn name(&self) -> &str {
        "imgbb"
    }

    fn check_ready(&self) -> std::result::Result<(), String> {
        match self.api_key {
            Some(_) => Ok(()),
            None => Err("ImgBB API key not configured".to_string()),
        }
    }

    async fn upload_image(&self, asset: &ImageAsset) -> UploadOutcome {
        let Some(key) = self.api_key.as_deref() else {
            return UploadOutcome::failure(&asset.filename, "ImgBB API key not configured");
        };
        upload_with_retry("IMGBB", asset, &self.retry, || self.attempt_upload(key, asset)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_key_nothing_is_sent() {
        let host = ImgbbHost::new(&HostConfig::default()).unwrap();
        assert!(host.check_ready().is_err());
        let outcome = host.upload_image(&ImageAsset::new("/tmp/none.jpg")).await;
        assert_eq!(outcome.error.as_deref(), Some("ImgBB API key not configured"));
        assert!(host.create_group("t", "d", &["x".to_string()]).await.is_none());
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/1/upload")
            .with_status(200)
            .with_body(r#"{"success":false,"error":{"message":"Invalid API v1 key."}}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.webp");
        std::fs::write(&path, b"webp").unwrap();
        let config = HostConfig {
            api_url: Some(format!("{}/1/upload", server.url())),
            api_key: Some("k".to_string()),
            ..HostConfig::default()
        };
        let outcome = ImgbbHost::new(&config).unwrap().upload_image(&ImageAsset::new(path)).await;

        mock.assert_async().await;
        assert_eq!(outcome.error.as_deref(), Some("ImgBB API error: Invalid API v1 key."));
    }
}
