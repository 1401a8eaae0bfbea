use crate::config::OutputConfig;
use crate::error::Result;
use crate::manifest::Manifest;
use crate::merge::strip_root_group;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Reads and writes manifests under `<root>/<title>/<title>.json`.
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.root.clone())
    }

    pub fn manifest_path(&self, manga_title: &str) -> PathBuf {
        let name = sanitize_filename(manga_title);
        self.root.join(&name).join(format!("{}.json", name))
    }

    pub fn summary_path(&self, manga_title: &str) -> PathBuf {
        self.manifest_path(manga_title).with_extension("yaml")
    }

    pub fn backup_path(path: &Path) -> PathBuf {
        path.with_extension("json.bak")
    }

    /// Returns `None` when the file is missing or cannot be parsed.
    pub async fn load(&self, path: &Path) -> Option<Manifest> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No manifest at {:?}", path);
                return None;
            }
            Err(e) => {
                warn!("⚠️ Could not read manifest {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_str::<Manifest>(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("⚠️ Manifest {:?} is unreadable, starting fresh: {}", path, e);
                None
            }
        }
    }

    /// Write the manifest, keeping the previous file as the single backup.
    pub async fn save(&self, manifest: &Manifest, path: &Path) -> Result<()> {
        let mut manifest = manifest.clone();
        strip_root_group(&mut manifest);
        let content = serde_json::to_string_pretty(&manifest)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(path).await? {
            let backup = Self::backup_path(path);
            tokio::fs::copy(path, &backup).await?;
            debug!("Backed up {:?} to {:?}", path, backup);
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!("💾 Saved manifest with {} chapter(s) to {:?}", manifest.chapters.len(), path);
        Ok(())
    }

    /// YAML summary of a single run's chapters.
    pub async fn save_summary(&self, summary: &Manifest, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(summary)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        debug!("Wrote run summary to {:?}", path);
        Ok(())
    }
}

/// File-system safe form of a title: accents removed, punctuation dropped,
/// whitespace and hyphen runs turned into a single `_`.
pub fn sanitize_filename(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_whitespace() || c == '-' || c == '_' {
            pending_separator = true;
        } else if c.is_alphanumeric() {
            if pending_separator && !result.is_empty() {
                result.push('_');
            }
            pending_separator = false;
            result.push(c);
        }
    }

    if result.is_empty() {
        "untitled".to_string()
    } else {
        result
    }
}
