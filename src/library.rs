use crate::error::{MangaUpError, Result};
use crate::models::{ImageAsset, LocalChapter};
use crate::utils::{natural_cmp, normalize_title};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// Title of a manga directory: its final path component.
pub fn manga_title(manga_dir: &Path) -> String {
    manga_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// List the chapter directories of a manga, naturally sorted, each with its
/// images. When `only` is non-empty just the chapters whose normalized name
/// matches one of its entries are returned.
pub async fn scan_manga_dir(manga_dir: &Path, only: &[String]) -> Result<Vec<LocalChapter>> {
    if !fs::metadata(manga_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(MangaUpError::invalid_input(format!(
            "Not a directory: {}",
            manga_dir.display()
        )));
    }

    let wanted: Vec<String> = only.iter().map(|name| normalize_title(name)).collect();
    let mut chapter_dirs: Vec<(String, PathBuf)> = Vec::new();

    let mut entries = fs::read_dir(manga_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if !wanted.is_empty() && !wanted.contains(&normalize_title(&name)) {
            debug!("Skipping chapter '{}' (not selected)", name);
            continue;
        }
        chapter_dirs.push((name, entry.path()));
    }
    chapter_dirs.sort_by(|(a, _), (b, _)| natural_cmp(a, b).then_with(|| a.cmp(b)));

    let mut chapters = Vec::with_capacity(chapter_dirs.len());
    for (name, path) in chapter_dirs {
        let images = find_images(&path).await?;
        chapters.push(LocalChapter { name, path, images });
    }

    info!(
        "📚 Found {} chapter(s) in {}",
        chapters.len(),
        manga_dir.display()
    );
    Ok(chapters)
}

/// Image files directly inside `dir`, in natural reading order.
pub async fn find_images(dir: &Path) -> Result<Vec<ImageAsset>> {
    let mut images = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if is_image(&path) {
            images.push(ImageAsset::new(path));
        }
    }
    images.sort_by(|a, b| natural_cmp(&a.filename, &b.filename).then_with(|| a.filename.cmp(&b.filename)));
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
