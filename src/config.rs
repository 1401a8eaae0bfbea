use crate::error::{MangaUpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for the per-chapter upload fan-out.
pub const MAX_CONCURRENCY: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub selected_host: String,
    pub output: OutputConfig,
    pub upload: UploadConfig,
    pub hosts: BTreeMap<String, HostConfig>,
    pub github: GithubConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
    /// First sequence key of the chapter map: 1 gives "001", 0 the legacy "000".
    pub key_base: u32,
    pub group_name: String,
    pub link_mode: LinkMode,
    pub update_mode: UpdateMode,
    pub write_yaml_summary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub concurrency: usize,
    pub item_delay_ms: u64,
    pub job_workers: usize,
    pub job_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub enabled: bool,
    pub userhash: Option<String>,
    pub client_id: Option<String>,
    pub access_token: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub token: String,
    pub repo: String,
    pub branch: String,
    pub folder: String,
    pub api_url: String,
}

/// Group hub index listing every manifest under `output.root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub hub_name: String,
    pub hub_description: String,
    /// Local directory under `output.root`.
    pub folder: String,
    /// Repository directory the index is published to.
    pub remote_folder: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Drop every existing chapter and keep only this run's chapters.
    Replace,
    /// Keep existing chapters, re-uploaded ones win and move to the end.
    Add,
    /// Keep existing chapters, re-uploaded ones are updated in place.
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    Images,
    Album,
}

impl Config {
    /// Load configuration from an optional TOML file, overlaid with
    /// `MANGAUP_<SECTION>__<KEY>` environment variables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("MANGAUP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.output.key_base > 1 {
            return Err(MangaUpError::invalid_input(format!(
                "output.key_base must be 0 or 1, got {}",
                self.output.key_base
            )));
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }
}

impl UploadConfig {
    pub fn concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl HostConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns the trimmed credential, or `None` when unset or blank.
    pub fn credential(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert("catbox".to_string(), HostConfig::default());
        for name in ["imgur", "imgbb", "pixeldrain"] {
            hosts.insert(
                name.to_string(),
                HostConfig {
                    enabled: false,
                    ..HostConfig::default()
                },
            );
        }

        Config {
            selected_host: "catbox".to_string(),
            output: OutputConfig::default(),
            upload: UploadConfig::default(),
            hosts,
            github: GithubConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            hub_name: "grupo".to_string(),
            hub_description: String::new(),
            folder: "indexadores".to_string(),
            remote_folder: "hub".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./metadata"),
            key_base: 1,
            group_name: "default".to_string(),
            link_mode: LinkMode::Images,
            update_mode: UpdateMode::Add,
            write_yaml_summary: true,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            item_delay_ms: 1000,
            job_workers: 2,
            job_timeout_secs: 3600,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            userhash: None,
            client_id: None,
            access_token: None,
            api_key: None,
            api_url: None,
            timeout_secs: 300,
            retry_attempts: 3,
            retry_base_ms: 4000,
            retry_max_ms: 10_000,
            requests_per_minute: None,
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            folder: "metadata".to_string(),
            api_url: "https://api.github.com".to_string(),
        }
    }
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMode::Replace => write!(f, "replace"),
            UpdateMode::Add => write!(f, "add"),
            UpdateMode::Smart => write!(f, "smart"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.selected_host, "catbox");
        assert_eq!(config.output.key_base, 1);
        assert_eq!(config.upload.concurrency(), 5);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mangaup.toml");
        fs::write(
            &path,
            r#"
selected_host = "imgur"

[output]
key_base = 0
update_mode = "smart"

[upload]
concurrency = 64

[hosts.imgur]
client_id = "abc"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.selected_host, "imgur");
        assert_eq!(config.output.key_base, 0);
        assert_eq!(config.output.update_mode, UpdateMode::Smart);
        assert_eq!(config.output.group_name, "default");
        assert_eq!(config.upload.concurrency(), MAX_CONCURRENCY);
        let imgur = &config.hosts["imgur"];
        assert_eq!(HostConfig::credential(&imgur.client_id), Some("abc"));
        assert_eq!(imgur.retry_attempts, 3);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mangaup.toml");
        let mut config = Config::default();
        config.upload.item_delay_ms = 250;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.upload.item_delay_ms, 250);
        assert_eq!(loaded.hosts.len(), 4);
        assert!(!loaded.hosts["imgbb"].enabled);
    }

    #[test]
    fn key_base_other_than_zero_or_one_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mangaup.toml");
        fs::write(&path, "[output]\nkey_base = 2\n").unwrap();

        match Config::load(&path) {
            Err(MangaUpError::InvalidInput(msg)) => assert!(msg.contains("key_base"), "{}", msg),
            other => panic!("expected InvalidInput, got {:?}", other.map(|c| c.output.key_base)),
        }
    }

    #[test]
    fn blank_credentials_are_unset() {
        assert_eq!(HostConfig::credential(&Some("  ".to_string())), None);
        assert_eq!(HostConfig::credential(&None), None);
        assert_eq!(HostConfig::credential(&Some(" key ".to_string())), Some("key"));
    }
}
