use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One image file of a chapter, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub filename: String,
}

/// Result of one image upload. A retry replaces the outcome rather than
/// adding a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub filename: String,
    /// Empty when the upload failed.
    pub url: String,
    /// Host-side identifier used when creating an album.
    pub upload_id: Option<String>,
    pub succeeded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterUploadResult {
    pub chapter_name: String,
    pub album_url: Option<String>,
    /// Successful uploads only, in the chapter's reading order.
    pub image_urls: Vec<String>,
    pub failed_files: Vec<String>,
    pub succeeded: bool,
}

/// A chapter directory found on disk.
#[derive(Debug, Clone)]
pub struct LocalChapter {
    pub name: String,
    pub path: PathBuf,
    pub images: Vec<ImageAsset>,
}

/// Series-level fields written to the top of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesInfo {
    pub title: String,
    pub description: String,
    pub artist: String,
    pub author: String,
    pub cover: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum MangaStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
    Paused,
}

impl ImageAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { path, filename }
    }
}

impl UploadOutcome {
    pub fn success(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            upload_id: None,
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: String::new(),
            upload_id: None,
            succeeded: false,
            error: Some(error.into()),
        }
    }

    pub fn with_upload_id(mut self, id: impl Into<String>) -> Self {
        self.upload_id = Some(id.into());
        self
    }

    /// Identifier for album creation: the explicit id, else the last path
    /// segment of the URL.
    pub fn group_id(&self) -> Option<String> {
        if let Some(id) = &self.upload_id {
            return Some(id.clone());
        }
        let parsed = url::Url::parse(&self.url).ok()?;
        parsed
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()
            .map(str::to_string)
    }
}

impl ChapterUploadResult {
    /// Build the chapter result from outcomes already in reading order.
    pub fn from_outcomes(
        chapter_name: impl Into<String>,
        outcomes: &[UploadOutcome],
        album_url: Option<String>,
    ) -> Self {
        let mut image_urls = Vec::new();
        let mut failed_files = Vec::new();
        for outcome in outcomes {
            if outcome.succeeded {
                image_urls.push(outcome.url.clone());
            } else {
                failed_files.push(outcome.filename.clone());
            }
        }

        let succeeded = failed_files.is_empty();
        Self {
            chapter_name: chapter_name.into(),
            album_url: album_url.filter(|url| !url.is_empty()),
            image_urls,
            failed_files,
            succeeded,
        }
    }
}

impl std::fmt::Display for MangaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MangaStatus::Ongoing => write!(f, "Em Andamento"),
            MangaStatus::Completed => write!(f, "Concluído"),
            MangaStatus::Hiatus => write!(f, "Hiato"),
            MangaStatus::Cancelled => write!(f, "Cancelado"),
            MangaStatus::Paused => write!(f, "Pausado"),
        }
    }
}
