use crate::config::HostConfig;
use crate::error::{Result, UploadError};
use crate::hosts::{read_asset, upload_with_retry, RetryPolicy};
use crate::models::{ImageAsset, UploadOutcome};
use crate::traits::HostBackend;
use crate::utils::HttpClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const API_URL: &str = "https://api.imgur.com/3/";

/// Below this many remaining client credits, uploads pause until the reset.
const LOW_CREDIT_THRESHOLD: i64 = 5;
const MIN_QUOTA_WAIT: Duration = Duration::from_secs(10);
const MAX_QUOTA_WAIT: Duration = Duration::from_secs(300);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Quota counters reported by Imgur in `X-RateLimit-*` headers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RateLimitState {
    user_remaining: Option<i64>,
    user_reset: Option<i64>,
    client_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ImgurResponse {
    #[serde(default)]
    success: bool,
    data: ImgurData,
}

#[derive(Debug, Default, Deserialize)]
struct ImgurData {
    id: Option<String>,
    link: Option<String>,
    error: Option<serde_json::Value>,
}

pub struct ImgurHost {
    http_client: HttpClient,
    api_url: String,
    client_id: Option<String>,
    access_token: Option<String>,
    retry: RetryPolicy,
    limits: Mutex<RateLimitState>,
}

impl ImgurHost {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let mut api_url = config.api_url.clone().unwrap_or_else(|| API_URL.to_string());
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        Ok(Self {
            http_client: HttpClient::new(config.timeout(), config.requests_per_minute)?,
            api_url,
            client_id: HostConfig::credential(&config.client_id).map(str::to_string),
            access_token: HostConfig::credential(&config.access_token).map(str::to_string),
            retry: RetryPolicy::from_config(config),
            limits: Mutex::new(RateLimitState::default()),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.access_token {
            request.bearer_auth(token)
        } else if let Some(client_id) = &self.client_id {
            request.header("Authorization", format!("Client-ID {}", client_id))
        } else {
            request
        }
    }

    fn update_rate_limits(&self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        let mut limits = match self.limits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(v) = read("X-RateLimit-UserRemaining") {
            limits.user_remaining = Some(v);
        }
        if let Some(v) = read("X-RateLimit-UserReset") {
            limits.user_reset = Some(v);
        }
        if let Some(v) = read("X-RateLimit-ClientRemaining") {
            limits.client_remaining = Some(v);
        }
    }

    /// How long to hold off before the next request, given the last seen quota.
    fn quota_wait(&self, now: i64) -> Option<Duration> {
        let limits = match self.limits.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let low_client = limits.client_remaining.map_or(false, |r| r < LOW_CREDIT_THRESHOLD);
        let low_user = limits.user_remaining.map_or(false, |r| r < LOW_CREDIT_THRESHOLD);
        if !low_client && !low_user {
            return None;
        }
        let until_reset = limits.user_reset.map_or(0, |reset| reset - now).max(0) as u64;
        Some(Duration::from_secs(until_reset).clamp(MIN_QUOTA_WAIT, MAX_QUOTA_WAIT))
    }

    async fn attempt_upload(&self, asset: &ImageAsset) -> std::result::Result<UploadOutcome, UploadError> {
        if let Some(wait) = self.quota_wait(chrono::Utc::now().timestamp()) {
            warn!("[IMGUR] quota nearly exhausted, pausing {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        let bytes = read_asset(asset).await?;
        let payload = json!({ "image": STANDARD.encode(bytes), "type": "base64", "name": asset.filename });
        let request = self.authorize(self.http_client.client().post(format!("{}image", self.api_url)).json(&payload));
        let response = self.http_client.send(request).await?;
        self.update_rate_limits(response.headers());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(MIN_QUOTA_WAIT, Duration::from_secs)
                .min(MAX_RETRY_AFTER);
            warn!("[IMGUR] rate limited, retrying in {:?}", retry_after);
            return Err(UploadError::rate_limited("Rate limited", retry_after));
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::from_status(status, &body));
        }

        let parsed: ImgurResponse = serde_json::from_str(&body)
            .map_err(|e| UploadError::permanent(format!("Malformed imgur response: {}", e)))?;
        match (parsed.success, parsed.data.link) {
            (true, Some(link)) => {
                debug!("[IMGUR] {} -> {}", asset.filename, link);
                let outcome = UploadOutcome::success(&asset.filename, link);
                Ok(match parsed.data.id {
                    Some(id) => outcome.with_upload_id(id),
                    None => outcome,
                })
            }
            _ => {
                let reason = parsed.data.error.map(|e| e.to_string()).unwrap_or_else(|| "Unknown error".to_string());
                Err(UploadError::permanent(reason))
            }
        }
    }
}

#[async_trait::async_trait]
impl HostBackend for ImgurHost {
    fn name(&self) -> &str {
        "imgur"
    }

    fn check_ready(&self) -> std::result::Result<(), String> {
        if self.client_id.is_none() && self.access_token.is_none() {
            return Err("Imgur requires client_id or access_token".to_string());
        }
        Ok(())
    }

    /// Albums need an authenticated user.
    fn supports_groups(&self) -> bool {
        self.access_token.is_some()
    }

    async fn upload_image(&self, asset: &ImageAsset) -> UploadOutcome {
        if let Err(reason) = self.check_ready() {
            return UploadOutcome::failure(&asset.filename, reason);
        }
        upload_with_retry("IMGUR", asset, &self.retry, || self.attempt_upload(asset)).await
    }

    async fn create_group(&self, title: &str, description: &str, upload_ids: &[String]) -> Option<String> {
        if !self.supports_groups() || upload_ids.is_empty() {
            return None;
        }

        let payload = json!({
            "ids": upload_ids,
            "title": title,
            "description": description,
            "privacy": "hidden",
        });
        let request = self.authorize(self.http_client.client().post(format!("{}album", self.api_url)).json(&payload));
        let response = match self.http_client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[IMGUR] album request failed: {}", e);
                return None;
            }
        };
        self.update_rate_limits(response.headers());
        if !response.status().is_success() {
            warn!("[IMGUR] album creation rejected: HTTP {}", response.status());
            return None;
        }

        let parsed: ImgurResponse = response.json().await.ok()?;
        let album_id = parsed.data.id.filter(|_| parsed.success)?;
        let url = format!("https://imgur.com/a/{}", album_id);
        info!("[IMGUR] created album {}", url);
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(server: &mockito::Server, access_token: Option<&str>) -> ImgurHost {
        let config = HostConfig {
            api_url: Some(format!("{}/3", server.url())),
            client_id: Some("cid".to_string()),
            access_token: access_token.map(str::to_string),
            retry_base_ms: 1,
            retry_max_ms: 2,
            ..HostConfig::default()
        };
        ImgurHost::new(&config).unwrap()
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let host = ImgurHost::new(&HostConfig::default()).unwrap();
        assert!(host.check_ready().is_err());
        assert!(!host.supports_groups());
    }

    #[test]
    fn quota_wait_is_bounded() {
        let host = ImgurHost::new(&HostConfig::default()).unwrap();
        assert_eq!(host.quota_wait(1_000), None);

        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-ClientRemaining", "2".parse().unwrap());
        headers.insert("X-RateLimit-UserReset", "100000".parse().unwrap());
        host.update_rate_limits(&headers);
        assert_eq!(host.quota_wait(1_000), Some(MAX_QUOTA_WAIT));

        headers.insert("X-RateLimit-UserReset", "1003".parse().unwrap());
        host.update_rate_limits(&headers);
        assert_eq!(host.quota_wait(1_000), Some(MIN_QUOTA_WAIT));

        headers.insert("X-RateLimit-ClientRemaining", "400".parse().unwrap());
        host.update_rate_limits(&headers);
        assert_eq!(host.quota_wait(1_000), None);
    }

    #[tokio::test]
    async fn upload_parses_link_and_tracks_limits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/3/image")
            .match_header("authorization", "Client-ID cid")
            .with_status(200)
            .with_header("X-RateLimit-ClientRemaining", "1200")
            .with_header("X-RateLimit-UserRemaining", "300")
            .with_body(r#"{"success":true,"status":200,"data":{"id":"AbC12","link":"https://i.imgur.com/AbC12.png"}}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.png");
        std::fs::write(&path, b"png").unwrap();

        let host = host(&server, None);
        let outcome = host.upload_image(&ImageAsset::new(path)).await;

        mock.assert_async().await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.url, "https://i.imgur.com/AbC12.png");
        assert_eq!(outcome.upload_id.as_deref(), Some("AbC12"));
        let limits = *host.limits.lock().unwrap();
        assert_eq!(limits.client_remaining, Some(1200));
        assert_eq!(limits.user_remaining, Some(300));
    }

    #[tokio::test]
    async fn rate_limited_upload_retries_after_the_requested_wait() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/3/image")
            .with_status(429)
            .with_header("Retry-After", "1")
            .with_body(r#"{"success":false,"status":429,"data":{"error":"slow down"}}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/3/image")
            .with_status(200)
            .with_body(r#"{"success":true,"status":200,"data":{"id":"Zz9","link":"https://i.imgur.com/Zz9.png"}}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.png");
        std::fs::write(&path, b"png").unwrap();

        let started = std::time::Instant::now();
        let outcome = host(&server, None).upload_image(&ImageAsset::new(path)).await;

        limited.assert_async().await;
        accepted.assert_async().await;
        assert!(outcome.succeeded, "{:?}", outcome.error);
        assert_eq!(outcome.url, "https://i.imgur.com/Zz9.png");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn album_requires_access_token() {
        let mut server = mockito::Server::new_async().await;
        let ids = vec!["AbC12".to_string()];
        assert_eq!(host(&server, None).create_group("t", "d", &ids).await, None);

        let mock = server
            .mock("POST", "/3/album")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"success":true,"data":{"id":"alb9"}}"#)
            .create_async()
            .await;
        let url = host(&server, Some("tok")).create_group("t", "d", &ids).await;
        mock.assert_async().await;
        assert_eq!(url.as_deref(), Some("https://imgur.com/a/alb9"));
    }
}
