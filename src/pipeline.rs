use crate::config::{Config, UpdateMode};
use crate::error::{MangaUpError, Result};
use crate::library;
use crate::merge::MergeEngine;
use crate::models::{ChapterUploadResult, LocalChapter, MangaStatus, SeriesInfo};
use crate::publish::publish_saved;
use crate::queue::{JobQueue, JobStatus};
use crate::registry::HostRegistry;
use crate::storage::ManifestStore;
use crate::uploader::UploadOrchestrator;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What to upload and how to record it.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Host name; the configured `selected_host` when unset.
    pub host: Option<String>,
    /// Merge mode; the configured `update_mode` when unset.
    pub mode: Option<UpdateMode>,
    /// Chapter directory names to upload; all when empty.
    pub chapters: Vec<String>,
    /// Series fields. An empty title falls back to the directory name.
    pub series: SeriesInfo,
    pub publish: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub manga_title: String,
    pub chapters_uploaded: Vec<String>,
    /// Chapters merged with some images missing.
    pub chapters_partial: Vec<String>,
    /// Chapters that produced nothing usable, with the reason.
    pub chapters_failed: Vec<(String, String)>,
    pub chapters_skipped: Vec<String>,
    /// Set when a manifest was written.
    pub manifest_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
    pub published: bool,
    pub publish_error: Option<String>,
}

/// Runs one upload from chapter discovery to manifest publication.
pub struct UploadPipeline {
    config: Config,
    registry: HostRegistry,
    orchestrator: UploadOrchestrator,
    merge: MergeEngine,
    store: ManifestStore,
    progress: Option<ProgressBar>,
}

impl UploadPipeline {
    pub fn new(config: Config, registry: HostRegistry) -> Self {
        Self {
            orchestrator: UploadOrchestrator::from_config(&config.upload),
            merge: MergeEngine::from_config(&config.output),
            store: ManifestStore::from_config(&config.output),
            config,
            registry,
            progress: None,
        }
    }

    /// Report chapter completion on `progress`; its length is set per run.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(&self, manga_dir: &Path, request: &UploadRequest) -> Result<RunReport> {
        let host_name = request.host.as_deref().unwrap_or(&self.config.selected_host);
        let backend = self.registry.require_host(host_name)?;
        backend
            .check_ready()
            .map_err(|reason| MangaUpError::host_not_ready(format!("{}: {}", backend.name(), reason)))?;
        let mode = request.mode.unwrap_or(self.config.output.update_mode);

        let mut series = request.series.clone();
        if series.title.trim().is_empty() {
            series.title = library::manga_title(manga_dir);
        }
        let mut report = RunReport {
            manga_title: series.title.clone(),
            ..RunReport::default()
        };

        let chapters = library::scan_manga_dir(manga_dir, &request.chapters).await?;
        info!(
            "🚀 Uploading {} chapter(s) of '{}' to {} ({} mode)",
            chapters.len(),
            series.title,
            backend.name(),
            mode
        );
        if let Some(progress) = &self.progress {
            progress.set_length(chapters.len() as u64);
        }

        let queue: JobQueue<Option<ChapterUploadResult>> = JobQueue::start(self.config.upload.job_workers);
        let mut submitted = Vec::with_capacity(chapters.len());
        for LocalChapter { name, images, .. } in chapters {
            let orchestrator = self.orchestrator.clone();
            let backend = backend.clone();
            let title = series.title.clone();
            let chapter_name = name.clone();
            let id = queue.submit(name.clone(), async move {
                Ok(orchestrator
                    .upload_chapter(&title, &chapter_name, &images, backend)
                    .await)
            })?;
            submitted.push((name, id));
        }

        let mut fresh = Vec::new();
        for (name, id) in submitted {
            match queue.await_job(id, self.config.upload.job_timeout()).await {
                Ok(job) if job.status == JobStatus::Completed => {
                    if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
                        debug!(
                            "Job '{}' ran {}ms after waiting {}ms",
                            job.label,
                            (completed - started).num_milliseconds(),
                            (started - job.created_at).num_milliseconds()
                        );
                    }
                    match job.result.flatten() {
                        None => report.chapters_skipped.push(name.clone()),
                        Some(result) if result.image_urls.is_empty() && result.album_url.is_none() => {
                            let reason = format!("all {} image(s) failed", result.failed_files.len());
                            report.chapters_failed.push((name.clone(), reason));
                        }
                        Some(result) => {
                            if result.succeeded {
                                report.chapters_uploaded.push(name.clone());
                            } else {
                                report.chapters_partial.push(name.clone());
                            }
                            fresh.push(result);
                        }
                    }
                }
                Ok(job) => {
                    let reason = job.error.unwrap_or_else(|| "unknown error".to_string());
                    error!("❌ Chapter '{}' failed: {}", name, reason);
                    report.chapters_failed.push((name.clone(), reason));
                }
                Err(e) => {
                    error!("❌ Chapter '{}' failed while {:?}: {}", name, queue.status(id), e);
                    report.chapters_failed.push((name.clone(), e.to_string()));
                }
            }
            if let Some(progress) = &self.progress {
                progress.set_message(name);
                progress.inc(1);
            }
        }
        queue.shutdown(self.config.upload.shutdown_grace()).await;

        if fresh.is_empty() {
            warn!("Nothing was uploaded, manifest for '{}' left untouched", series.title);
            return Ok(report);
        }

        let manifest_path = self.store.manifest_path(&series.title);
        let existing = self.store.load(&manifest_path).await;
        if existing.is_none() && series.status.trim().is_empty() {
            series.status = MangaStatus::Ongoing.to_string();
        }
        let manifest = self.merge.merge(existing, &series, &fresh, mode);
        debug!("Manifest chapters: {:?}", manifest.chapter_titles());
        self.store.save(&manifest, &manifest_path).await?;
        report.manifest_path = Some(manifest_path.clone());

        if self.config.output.write_yaml_summary {
            let summary = self.merge.merge(None, &series, &fresh, UpdateMode::Replace);
            let summary_path = self.store.summary_path(&series.title);
            self.store.save_summary(&summary, &summary_path).await?;
            report.summary_path = Some(summary_path);
        }

        if request.publish {
            let message = format!("Update {} metadata", series.title);
            match publish_saved(&self.config.github, None, &manifest_path, &message).await {
                Ok(()) => report.published = true,
                Err(reason) => report.publish_error = Some(reason),
            }
        }

        Ok(report)
    }
}
