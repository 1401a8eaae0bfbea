use crate::config::GithubConfig;
use crate::error::{MangaUpError, Result};
use crate::utils::HttpClient;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct ContentInfo {
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContent<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

/// Pushes manifests to a repository through the GitHub contents API.
pub struct GitHubPublisher {
    http_client: HttpClient,
    api_url: String,
    token: String,
    repo: String,
    branch: String,
    folder: String,
}

impl GitHubPublisher {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let token = clean(&config.token);
        let repo = clean(&config.repo);
        if token.is_empty() {
            return Err(MangaUpError::publish("GitHub token is required"));
        }
        if repo.is_empty() {
            return Err(MangaUpError::publish("GitHub repository is required"));
        }
        let valid_repo = repo
            .split_once('/')
            .map_or(false, |(owner, name)| !owner.is_empty() && !name.is_empty());
        if !valid_repo {
            return Err(MangaUpError::publish("Repository must be in format 'owner/repo'"));
        }

        let branch = match clean(&config.branch) {
            b if b.is_empty() => "main".to_string(),
            b => b,
        };

        Ok(Self {
            http_client: HttpClient::new(Duration::from_secs(30), None)?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            repo,
            branch,
            folder: config.folder.trim_matches('/').to_string(),
        })
    }

    pub fn is_configured(config: &GithubConfig) -> bool {
        !config.token.trim().is_empty() && !config.repo.trim().is_empty()
    }

    /// Publish under `folder` instead of the configured `[github] folder`.
    pub fn with_folder(mut self, folder: &str) -> Self {
        self.folder = folder.trim_matches('/').to_string();
        self
    }

    /// Remote location of a local file name under the configured folder.
    pub fn remote_path(&self, filename: &str) -> String {
        if self.folder.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.folder, filename)
        }
    }

    fn contents_url(&self, remote_path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_url, self.repo, remote_path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
    }

    async fn file_sha(&self, remote_path: &str) -> Result<Option<String>> {
        let request = self
            .authorized(self.http_client.client().get(self.contents_url(remote_path)))
            .query(&[("ref", self.branch.as_str())]);
        let response = self.http_client.send(request).await?;

        match response.status() {
            StatusCode::OK => {
                let info: ContentInfo = response.json().await?;
                Ok(info.sha)
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                warn!("GitHub sha lookup for {} returned {}", remote_path, status);
                Ok(None)
            }
        }
    }

    async fn put(&self, content: &[u8], remote_path: &str, message: &str, sha: Option<String>) -> Result<StatusCode> {
        let body = PutContent {
            message,
            content: STANDARD.encode(content),
            branch: &self.branch,
            sha,
        };
        let request = self
            .authorized(self.http_client.client().put(self.contents_url(remote_path)))
            .json(&body);
        let response = self.http_client.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!("GitHub PUT {} -> {}: {}", remote_path, status, text.trim());
        }
        Ok(status)
    }

    /// Create or update `remote_path`. Returns `Ok(false)` when GitHub
    /// rejects the write; transport failures are errors.
    pub async fn upload_file(&self, content: &[u8], remote_path: &str, message: &str) -> Result<bool> {
        let sha = self.file_sha(remote_path).await?;
        let mut status = self.put(content, remote_path, message, sha).await?;

        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            warn!("🔁 Stale sha for {}, refetching and retrying once", remote_path);
            let sha = self.file_sha(remote_path).await?;
            status = self.put(content, remote_path, message, sha).await?;
        }

        if status.is_success() {
            info!("📤 Published {} to {}@{}", remote_path, self.repo, self.branch);
            Ok(true)
        } else {
            error!("❌ GitHub upload of {} failed: {}", remote_path, status);
            Ok(false)
        }
    }
}

/// Push a file that was already saved locally, under its own name. The
/// local file stays the source of truth, so every failure (including a
/// missing `[github]` section) comes back as a message for the caller's
/// report.
pub async fn publish_saved(
    config: &GithubConfig,
    folder: Option<&str>,
    local: &Path,
    message: &str,
) -> std::result::Result<(), String> {
    if !GitHubPublisher::is_configured(config) {
        warn!("GitHub publishing requested but [github] token/repo are not set");
        return Err("GitHub publishing is not configured".to_string());
    }

    let filename = local
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| format!("{} has no file name", local.display()))?;

    match upload_saved(config, folder, local, &filename, message).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(format!("GitHub rejected the upload of {}", filename)),
        Err(e) => {
            error!("❌ Publishing {} failed: {}", filename, e);
            Err(e.to_string())
        }
    }
}

async fn upload_saved(
    config: &GithubConfig,
    folder: Option<&str>,
    local: &Path,
    filename: &str,
    message: &str,
) -> Result<bool> {
    let mut publisher = GitHubPublisher::new(config)?;
    if let Some(folder) = folder {
        publisher = publisher.with_folder(folder);
    }
    let content = tokio::fs::read(local).await?;
    publisher.upload_file(&content, &publisher.remote_path(filename), message).await
}

fn clean(value: &str) -> String {
    value.trim().chars().filter(|c| !matches!(c, '\n' | '\r' | '\t')).collect()
}
