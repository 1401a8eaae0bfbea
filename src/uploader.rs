use crate::config::UploadConfig;
use crate::models::{ChapterUploadResult, ImageAsset, UploadOutcome};
use crate::traits::HostBackend;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Uploads one chapter's pages to a host with a bounded number of requests
/// in flight.
#[derive(Debug, Clone)]
pub struct UploadOrchestrator {
    concurrency: usize,
    item_delay: Duration,
}

impl UploadOrchestrator {
    pub fn new(concurrency: usize, item_delay: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            item_delay,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.concurrency(), config.item_delay())
    }

    /// Upload every asset of a chapter and aggregate the outcomes.
    ///
    /// Returns `None` for a chapter without images: there is nothing to
    /// upload and nothing to record. Otherwise the result lists successful
    /// URLs in the order of `assets`, whatever order the uploads finished in.
    pub async fn upload_chapter(
        &self,
        manga_title: &str,
        chapter_name: &str,
        assets: &[ImageAsset],
        backend: Arc<dyn HostBackend>,
    ) -> Option<ChapterUploadResult> {
        if assets.is_empty() {
            info!("Chapter '{}' has no images, nothing to upload", chapter_name);
            return None;
        }

        if let Err(reason) = backend.check_ready() {
            warn!("[{}] not ready, failing chapter '{}': {}", backend.name(), chapter_name, reason);
            let outcomes: Vec<_> = assets
                .iter()
                .map(|asset| UploadOutcome::failure(&asset.filename, reason.clone()))
                .collect();
            return Some(ChapterUploadResult::from_outcomes(chapter_name, &outcomes, None));
        }

        info!(
            "[{}] uploading '{}' ({} images, {} at a time)",
            backend.name(),
            chapter_name,
            assets.len(),
            self.concurrency
        );

        let outcomes = self.upload_all(assets, backend.as_ref()).await;

        let album_url = if backend.supports_groups() && outcomes.iter().any(|o| o.succeeded) {
            let ids: Vec<String> = outcomes
                .iter()
                .filter(|o| o.succeeded)
                .filter_map(UploadOutcome::group_id)
                .collect();
            let (title, description) = group_labels(manga_title, chapter_name);
            backend.create_group(&title, &description, &ids).await
        } else {
            None
        };

        let result = ChapterUploadResult::from_outcomes(chapter_name, &outcomes, album_url);
        if result.succeeded {
            info!("✅ Chapter '{}' uploaded: {} images", chapter_name, result.image_urls.len());
        } else {
            warn!(
                "Chapter '{}' uploaded partially: {} ok, failed: {:?}",
                chapter_name,
                result.image_urls.len(),
                result.failed_files
            );
        }
        Some(result)
    }

    async fn upload_all(&self, assets: &[ImageAsset], backend: &dyn HostBackend) -> Vec<UploadOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pending: FuturesUnordered<_> = assets
            .iter()
            .enumerate()
            .map(|(index, asset)| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            tokio::time::sleep(self.item_delay).await;
                            match AssertUnwindSafe(backend.upload_image(asset)).catch_unwind().await {
                                Ok(outcome) => outcome,
                                Err(panic) => UploadOutcome::failure(
                                    &asset.filename,
                                    format!("Upload task panicked: {}", panic_message(panic.as_ref())),
                                ),
                            }
                        }
                        Err(_) => UploadOutcome::failure(&asset.filename, "Upload slots closed"),
                    };
                    (index, outcome)
                }
            })
            .collect();

        let mut slots: Vec<Option<UploadOutcome>> = vec![None; assets.len()];
        while let Some((index, outcome)) = pending.next().await {
            slots[index] = Some(outcome);
        }

        slots
            .into_iter()
            .zip(assets)
            .map(|(slot, asset)| slot.unwrap_or_else(|| UploadOutcome::failure(&asset.filename, "Upload did not run")))
            .collect()
    }
}

/// Album title and description for a chapter.
pub fn group_labels(manga_title: &str, chapter_name: &str) -> (String, String) {
    let title = if manga_title.trim().is_empty() {
        chapter_name.to_string()
    } else {
        format!("{} - {}", manga_title.trim(), chapter_name)
    };
    (title, format!("Chapter {}", chapter_name))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted host: per-file latency, files that fail or panic, and an
    /// in-flight high-water mark.
    #[derive(Default)]
    struct FakeHost {
        fail: Vec<String>,
        panic_on: Vec<String>,
        not_ready: Option<String>,
        groups: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        starts: Mutex<Vec<tokio::time::Instant>>,
        group_calls: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    #[async_trait::async_trait]
    impl HostBackend for FakeHost {
        fn name(&self) -> &str {
            "fake"
        }

        fn check_ready(&self) -> std::result::Result<(), String> {
            match &self.not_ready {
                Some(reason) => Err(reason.clone()),
                None => Ok(()),
            }
        }

        fn supports_groups(&self) -> bool {
            self.groups
        }

        async fn upload_image(&self, asset: &ImageAsset) -> UploadOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.starts.lock().unwrap().push(tokio::time::Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            // Later pages finish first.
            let digits: String = asset.filename.chars().filter(|c| c.is_ascii_digit()).collect();
            let n: u64 = digits.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(n * 3))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on.contains(&asset.filename) {
                panic!("decoder exploded on {}", asset.filename);
            }
            if self.fail.contains(&asset.filename) {
                return UploadOutcome::failure(&asset.filename, "HTTP 500");
            }
            UploadOutcome::success(&asset.filename, format!("https://img.test/{}", asset.filename))
        }

        async fn create_group(&self, title: &str, description: &str, ids: &[String]) -> Option<String> {
            self.group_calls
                .lock()
                .unwrap()
                .push((title.to_string(), description.to_string(), ids.to_vec()));
            Some("https://img.test/album/1".to_string())
        }
    }

    fn assets(count: usize) -> Vec<ImageAsset> {
        (1..=count).map(|i| ImageAsset::new(format!("/ch/img{}.jpg", i))).collect()
    }

    fn orchestrator(concurrency: usize) -> UploadOrchestrator {
        UploadOrchestrator::new(concurrency, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn urls_follow_asset_order_not_completion_order() {
        let host = Arc::new(FakeHost::default());
        let result = orchestrator(8)
            .upload_chapter("Manga", "Ch. 1", &assets(10), host.clone())
            .await
            .unwrap();

        let expected: Vec<_> = (1..=10).map(|i| format!("https://img.test/img{}.jpg", i)).collect();
        assert_eq!(result.image_urls, expected);
        assert!(result.succeeded);
        assert_eq!(result.album_url, None);
    }

    #[tokio::test]
    async fn in_flight_uploads_never_exceed_limit() {
        let host = Arc::new(FakeHost::default());
        orchestrator(3)
            .upload_chapter("Manga", "Ch. 1", &assets(12), host.clone())
            .await
            .unwrap();

        assert_eq!(host.calls.load(Ordering::SeqCst), 12);
        let peak = host.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {} exceeded limit", peak);
        assert!(peak >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_are_paced_by_item_delay() {
        let host = Arc::new(FakeHost::default());
        UploadOrchestrator::new(1, Duration::from_millis(100))
            .upload_chapter("Manga", "Ch. 1", &assets(4), host.clone())
            .await
            .unwrap();

        let starts = host.starts.lock().unwrap();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(100), "uploads started {:?} apart", gap);
        }
    }

    #[tokio::test]
    async fn one_failed_page_fails_the_chapter_but_keeps_the_rest() {
        let host = Arc::new(FakeHost {
            fail: vec!["img3.jpg".to_string()],
            ..FakeHost::default()
        });
        let result = orchestrator(5)
            .upload_chapter("Manga", "Ch. 7", &assets(5), host)
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.failed_files, vec!["img3.jpg"]);
        assert_eq!(
            result.image_urls,
            vec![
                "https://img.test/img1.jpg",
                "https://img.test/img2.jpg",
                "https://img.test/img4.jpg",
                "https://img.test/img5.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn panicking_upload_is_contained() {
        let host = Arc::new(FakeHost {
            panic_on: vec!["img2.jpg".to_string()],
            ..FakeHost::default()
        });
        let result = orchestrator(2)
            .upload_chapter("Manga", "Ch. 1", &assets(4), host)
            .await
            .unwrap();

        assert_eq!(result.failed_files, vec!["img2.jpg"]);
        assert_eq!(result.image_urls.len(), 3);
    }

    #[tokio::test]
    async fn empty_chapter_is_skipped() {
        let host = Arc::new(FakeHost::default());
        let result = orchestrator(2).upload_chapter("Manga", "Extras", &[], host.clone()).await;
        assert!(result.is_none());
        assert_eq!(host.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unready_host_fails_without_uploading() {
        let host = Arc::new(FakeHost {
            not_ready: Some("missing api key".to_string()),
            groups: true,
            ..FakeHost::default()
        });
        let result = orchestrator(2)
            .upload_chapter("Manga", "Ch. 1", &assets(3), host.clone())
            .await
            .unwrap();

        assert_eq!(host.calls.load(Ordering::SeqCst), 0);
        assert!(host.group_calls.lock().unwrap().is_empty());
        assert_eq!(result.failed_files, vec!["img1.jpg", "img2.jpg", "img3.jpg"]);
        assert!(result.image_urls.is_empty());
    }

    #[tokio::test]
    async fn album_uses_successful_uploads_only() {
        let host = Arc::new(FakeHost {
            fail: vec!["img1.jpg".to_string()],
            groups: true,
            ..FakeHost::default()
        });
        let result = orchestrator(4)
            .upload_chapter("Solo Leveling", "Ch. 2", &assets(3), host.clone())
            .await
            .unwrap();

        assert_eq!(result.album_url.as_deref(), Some("https://img.test/album/1"));
        let calls = host.group_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Solo Leveling - Ch. 2");
        assert_eq!(calls[0].1, "Chapter Ch. 2");
        assert_eq!(calls[0].2, vec!["img2.jpg", "img3.jpg"]);
    }

    #[tokio::test]
    async fn no_album_when_everything_failed() {
        let host = Arc::new(FakeHost {
            fail: vec!["img1.jpg".to_string()],
            groups: true,
            ..FakeHost::default()
        });
        let result = orchestrator(1)
            .upload_chapter("Manga", "Ch. 1", &assets(1), host.clone())
            .await
            .unwrap();
        assert_eq!(result.album_url, None);
        assert!(host.group_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn labels_without_manga_title() {
        assert_eq!(group_labels("  ", "Ch. 3"), ("Ch. 3".to_string(), "Chapter Ch. 3".to_string()));
    }
}
