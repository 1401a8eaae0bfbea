use crate::config::Config;
use crate::error::{MangaUpError, Result};
use crate::manifest::Manifest;
use crate::merge::update_series;
use crate::models::SeriesInfo;
use crate::publish::publish_saved;
use crate::storage::ManifestStore;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct EditReport {
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
    /// False when every supplied field already had its value.
    pub changed: bool,
    pub published: bool,
    pub publish_error: Option<String>,
}

/// Reads and rewrites the series fields of an existing manifest without
/// uploading anything.
pub struct MetadataEditor {
    config: Config,
    store: ManifestStore,
}

impl MetadataEditor {
    pub fn new(config: Config) -> Self {
        Self {
            store: ManifestStore::from_config(&config.output),
            config,
        }
    }

    pub async fn load(&self, manga_title: &str) -> Result<(PathBuf, Manifest)> {
        let path = self.store.manifest_path(manga_title);
        match self.store.load(&path).await {
            Some(manifest) => Ok((path, manifest)),
            None => Err(MangaUpError::invalid_input(format!(
                "no readable manifest for '{}' at {}",
                manga_title,
                path.display()
            ))),
        }
    }

    /// Apply the non-blank fields of `series` and save when something
    /// changed. The file keeps its name even when the title changes.
    pub async fn update(&self, manga_title: &str, series: &SeriesInfo, publish: bool) -> Result<EditReport> {
        let (manifest_path, mut manifest) = self.load(manga_title).await?;

        let mut series = series.clone();
        series.description = series.description.replace("\\n", "\n");
        let changed = update_series(&mut manifest, &series);
        if changed {
            self.store.save(&manifest, &manifest_path).await?;
            info!("📝 Updated metadata of '{}'", manifest.title);
        } else {
            info!("Metadata of '{}' already up to date", manifest.title);
        }

        let mut report = EditReport {
            manifest_path,
            manifest,
            changed,
            published: false,
            publish_error: None,
        };
        if publish {
            let message = format!("Update {} metadata", report.manifest.title);
            match publish_saved(&self.config.github, None, &report.manifest_path, &message).await {
                Ok(()) => report.published = true,
                Err(reason) => report.publish_error = Some(reason),
            }
        }
        Ok(report)
    }
}
