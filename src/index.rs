//! Group hub index: one JSON document listing every series manifest under
//! the output root, with per-series chapter counts and totals.

use crate::config::{Config, GithubConfig};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::models::MangaStatus;
use crate::publish::publish_saved;
use crate::storage::sanitize_filename;
use crate::utils::{natural_cmp, normalize_title};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubIndex {
    pub hub: HubInfo,
    pub series: Vec<IndexedSeries>,
    pub statistics: Statistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubInfo {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedSeries {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub author: String,
    pub artist: String,
    pub description: String,
    pub cover: String,
    pub status: SeriesStatus,
    pub chapters: ChapterCounts,
    pub data: SeriesData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStatus {
    /// "completed" or "ongoing".
    pub translation: String,
    /// Status text as written in the manifest.
    pub original: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterCounts {
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    /// Where readers fetch the manifest; empty without a GitHub repository.
    pub url: String,
    pub format: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub overview: Overview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_series: usize,
    pub completed_series: usize,
    pub ongoing_series: usize,
    pub total_chapters: usize,
}

/// A manifest found while scanning, with its on-disk size.
#[derive(Debug, Clone)]
pub struct ScannedManifest {
    pub path: PathBuf,
    pub size: u64,
    pub manifest: Manifest,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub index_path: PathBuf,
    pub series_count: usize,
    pub chapter_count: usize,
    pub published: bool,
    pub publish_error: Option<String>,
}

pub struct HubIndexer {
    config: Config,
}

impl HubIndexer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn index_dir(&self) -> PathBuf {
        self.config.output.root.join(&self.config.index.folder)
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir().join(index_filename(&self.config.index.hub_name))
    }

    /// Scan, build, save and optionally publish the hub index.
    pub async fn run(&self, publish: bool) -> Result<IndexReport> {
        let scanned = scan_manifests(&self.config.output.root, &self.index_dir()).await?;
        let index = self.build(&scanned, Utc::now());

        let index_path = self.index_path();
        if let Some(parent) = index_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&index_path, serde_json::to_string_pretty(&index)?).await?;
        info!(
            "🗂️ Indexed {} series ({} chapters) into {:?}",
            index.statistics.overview.total_series, index.statistics.overview.total_chapters, index_path
        );

        let mut report = IndexReport {
            index_path,
            series_count: index.statistics.overview.total_series,
            chapter_count: index.statistics.overview.total_chapters,
            published: false,
            publish_error: None,
        };
        if publish {
            let message = format!("Update index: {}", index.hub.title);
            let folder = Some(self.config.index.remote_folder.as_str());
            match publish_saved(&self.config.github, folder, &report.index_path, &message).await {
                Ok(()) => report.published = true,
                Err(reason) => report.publish_error = Some(reason),
            }
        }
        Ok(report)
    }

    pub fn build(&self, scanned: &[ScannedManifest], now: DateTime<Utc>) -> HubIndex {
        let hub_name = match self.config.index.hub_name.trim() {
            "" => "grupo",
            name => name,
        };
        let series: Vec<IndexedSeries> = scanned
            .iter()
            .map(|entry| indexed_series(entry, &self.config.github))
            .collect();

        let completed_series = series.iter().filter(|s| s.status.translation == "completed").count();
        let overview = Overview {
            total_series: series.len(),
            completed_series,
            ongoing_series: series.len() - completed_series,
            total_chapters: series.iter().map(|s| s.chapters.total).sum(),
        };

        HubIndex {
            hub: HubInfo {
                id: slug(hub_name),
                title: hub_name.to_string(),
                slug: slug(hub_name),
                description: self.config.index.hub_description.clone(),
                last_updated: now.to_rfc3339(),
            },
            series,
            statistics: Statistics { overview },
        }
    }
}

/// Find every series manifest below `root`, skipping dot-directories and
/// `skip`. Files that are not manifests, or cannot be read, are logged and
/// left out. The result is in natural title order.
pub async fn scan_manifests(root: &Path, skip: &Path) -> Result<Vec<ScannedManifest>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound && dir.as_path() == root => {
                warn!("Output folder {:?} does not exist, the index will be empty", root);
                return Ok(found);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if !hidden && path.as_path() != skip {
                    pending.push(path);
                }
            } else if file_type.is_file() && path.extension().map_or(false, |ext| ext == "json") {
                if let Some(scanned) = read_manifest(&path).await {
                    found.push(scanned);
                }
            }
        }
    }

    found.sort_by(|a, b| natural_cmp(&a.manifest.title, &b.manifest.title).then_with(|| a.path.cmp(&b.path)));
    debug!("Found {} manifest(s) under {:?}", found.len(), root);
    Ok(found)
}

async fn read_manifest(path: &Path) -> Option<ScannedManifest> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("⚠️ Could not read {:?}: {}", path, e);
            return None;
        }
    };
    let value: Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!("⚠️ Skipping {:?}: {}", path, e);
            return None;
        }
    };
    if !is_manifest(&value) {
        debug!("Skipping {:?}: not a series manifest", path);
        return None;
    }
    match serde_json::from_value::<Manifest>(value) {
        Ok(manifest) => Some(ScannedManifest {
            path: path.to_path_buf(),
            size: content.len() as u64,
            manifest,
        }),
        Err(e) => {
            warn!("⚠️ Skipping {:?}: {}", path, e);
            None
        }
    }
}

fn is_manifest(value: &Value) -> bool {
    value.get("title").is_some() && value.get("chapters").is_some()
}

fn indexed_series(entry: &ScannedManifest, github: &GithubConfig) -> IndexedSeries {
    let manifest = &entry.manifest;
    let translation = if is_completed(&manifest.status) { "completed" } else { "ongoing" };
    let filename = entry
        .path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    IndexedSeries {
        id: slug(&manifest.title),
        title: manifest.title.clone(),
        slug: slug(&manifest.title),
        author: manifest.author.clone(),
        artist: manifest.artist.clone(),
        description: manifest.description.clone(),
        cover: manifest.cover.clone(),
        status: SeriesStatus {
            translation: translation.to_string(),
            original: manifest.status.clone(),
        },
        chapters: ChapterCounts {
            total: manifest.chapters.len(),
            latest: manifest.chapters.values().next_back().map(|c| c.title.clone()),
        },
        data: SeriesData {
            url: cdn_url(github, &filename),
            format: "json".to_string(),
            size: format_size(entry.size),
        },
    }
}

fn is_completed(status: &str) -> bool {
    let status = normalize_title(status);
    ["completo", "completed", "concluído", "concluido"].contains(&status.as_str())
        || status == normalize_title(&MangaStatus::Completed.to_string())
}

/// URL-friendly identifier: "Tower of God" becomes "tower-of-god".
pub fn slug(title: &str) -> String {
    sanitize_filename(title).to_lowercase().replace('_', "-")
}

pub fn index_filename(hub_name: &str) -> String {
    let name = match hub_name.trim() {
        "" => "grupo",
        name => name,
    };
    format!("index_{}.json", sanitize_filename(name))
}

/// jsDelivr URL of a manifest published with the `[github]` settings.
pub fn cdn_url(github: &GithubConfig, filename: &str) -> String {
    let repo = github.repo.trim();
    if repo.is_empty() || filename.is_empty() {
        return String::new();
    }
    let branch = match github.branch.trim() {
        "" => "main",
        branch => branch,
    };
    match github.folder.trim_matches('/') {
        "" => format!("https://cdn.jsdelivr.net/gh/{}@{}/{}", repo, branch, filename),
        folder => format!("https://cdn.jsdelivr.net/gh/{}@{}/{}/{}", repo, branch, folder, filename),
    }
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KB {
        format!("{}B", bytes)
    } else if size < KB * KB {
        format!("{:.1}KB", size / KB)
    } else {
        format!("{:.1}MB", size / (KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ChapterEntry;
    use crate::storage::ManifestStore;
    use chrono::TimeZone;

    fn manifest(title: &str, status: &str, chapters: &[&str]) -> Manifest {
        let mut manifest = Manifest {
            title: title.to_string(),
            author: "Someone".to_string(),
            status: status.to_string(),
            ..Manifest::default()
        };
        for (index, chapter) in chapters.iter().enumerate() {
            manifest.chapters.insert(
                index as u32 + 1,
                ChapterEntry {
                    title: chapter.to_string(),
                    ..ChapterEntry::default()
                },
            );
        }
        manifest
    }

    async fn populate(root: &Path) {
        let store = ManifestStore::new(root);
        for m in [
            manifest("Tower of God", "Em Andamento", &["Cap. 1", "Cap. 2"]),
            manifest("Solo Leveling", "Concluído", &["Cap. 1", "Cap. 2", "Cap. 3"]),
        ] {
            let path = store.manifest_path(&m.title);
            store.save(&m, &path).await.unwrap();
            store.save(&m, &path).await.unwrap();
        }

        std::fs::write(root.join("notes.json"), r#"{"todo": ["more series"]}"#).unwrap();
        std::fs::write(root.join("broken.json"), "{ nope").unwrap();
        std::fs::create_dir_all(root.join(".cache")).unwrap();
        std::fs::write(
            root.join(".cache").join("stale.json"),
            serde_json::to_string(&manifest("Hidden", "", &["x"])).unwrap(),
        )
        .unwrap();
    }

    fn indexer(root: &Path) -> HubIndexer {
        let mut config = Config::default();
        config.output.root = root.to_path_buf();
        config.index.hub_name = "Scan Team".to_string();
        config.index.hub_description = "Traduções".to_string();
        HubIndexer::new(config)
    }

    #[tokio::test]
    async fn scan_finds_only_series_manifests() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path()).await;

        let scanned = scan_manifests(dir.path(), &dir.path().join("indexadores")).await.unwrap();
        let titles: Vec<_> = scanned.iter().map(|s| s.manifest.title.as_str()).collect();
        assert_eq!(titles, vec!["Solo Leveling", "Tower of God"]);
        assert!(scanned.iter().all(|s| s.size > 0));
    }

    #[tokio::test]
    async fn missing_root_gives_empty_scan() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("absent");
        assert!(scan_manifests(&root, &root.join("indexadores")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn build_counts_series_and_chapters() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path()).await;
        let indexer = indexer(dir.path());

        let scanned = scan_manifests(dir.path(), &indexer.index_dir()).await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let index = indexer.build(&scanned, now);

        assert_eq!(index.hub.id, "scan-team");
        assert_eq!(index.hub.title, "Scan Team");
        assert_eq!(index.hub.last_updated, "2024-05-01T12:00:00+00:00");
        assert_eq!(
            index.statistics.overview,
            Overview {
                total_series: 2,
                completed_series: 1,
                ongoing_series: 1,
                total_chapters: 5,
            }
        );

        let solo = &index.series[0];
        assert_eq!(solo.slug, "solo-leveling");
        assert_eq!(solo.status.translation, "completed");
        assert_eq!(solo.status.original, "Concluído");
        assert_eq!(solo.chapters.latest.as_deref(), Some("Cap. 3"));
        assert_eq!(solo.data.url, "");
        assert!(solo.data.size.ends_with('B'));
        assert_eq!(index.series[1].status.translation, "ongoing");

        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(value["statistics"]["overview"]["totalChapters"], 5);
        assert!(value["hub"].get("lastUpdated").is_some());
    }

    #[tokio::test]
    async fn run_writes_index_and_skips_its_own_folder() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path()).await;
        let indexer = indexer(dir.path());

        let first = indexer.run(false).await.unwrap();
        assert_eq!(first.index_path, dir.path().join("indexadores").join("index_Scan_Team.json"));
        assert_eq!(first.series_count, 2);
        assert_eq!(first.chapter_count, 5);

        let second = indexer.run(true).await.unwrap();
        assert_eq!(second.series_count, 2);
        assert!(!second.published);
        assert_eq!(second.publish_error.as_deref(), Some("GitHub publishing is not configured"));

        let written: HubIndex =
            serde_json::from_str(&std::fs::read_to_string(&second.index_path).unwrap()).unwrap();
        assert_eq!(written.series.len(), 2);
    }

    #[test]
    fn cdn_urls_follow_github_settings() {
        let mut github = GithubConfig::default();
        assert_eq!(cdn_url(&github, "S.json"), "");

        github.repo = "owner/index".to_string();
        github.branch = String::new();
        github.folder = "/metadata/".to_string();
        assert_eq!(
            cdn_url(&github, "S.json"),
            "https://cdn.jsdelivr.net/gh/owner/index@main/metadata/S.json"
        );

        github.branch = "pages".to_string();
        github.folder = String::new();
        assert_eq!(cdn_url(&github, "S.json"), "https://cdn.jsdelivr.net/gh/owner/index@pages/S.json");
    }

    #[test]
    fn names_and_sizes() {
        assert_eq!(index_filename("  "), "index_grupo.json");
        assert_eq!(slug("Tower of God: Parte 2"), "tower-of-god-parte-2");
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }
}
