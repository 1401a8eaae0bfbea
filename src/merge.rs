use crate::config::{LinkMode, OutputConfig, UpdateMode};
use crate::manifest::{ChapterEntry, GroupLinks, Manifest};
use crate::models::{ChapterUploadResult, SeriesInfo};
use crate::utils::{natural_cmp, normalize_title};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Reconciles freshly uploaded chapters with an existing manifest.
///
/// Chapter identity is the normalized title, never the sequence key. Every
/// merge ends with a re-key pass that orders chapters naturally by title and
/// numbers them contiguously from `key_base`.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    key_base: u32,
    group_name: String,
    link_mode: LinkMode,
}

impl MergeEngine {
    pub fn new(key_base: u32, group_name: impl Into<String>, link_mode: LinkMode) -> Self {
        Self {
            key_base,
            group_name: group_name.into(),
            link_mode,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.key_base, config.group_name.clone(), config.link_mode)
    }

    pub fn merge(
        &self,
        existing: Option<Manifest>,
        series: &SeriesInfo,
        fresh: &[ChapterUploadResult],
        mode: UpdateMode,
    ) -> Manifest {
        self.merge_at(existing, series, fresh, mode, chrono::Utc::now().timestamp())
    }

    /// Same as [`merge`](Self::merge) with an explicit `last_updated` stamp.
    pub fn merge_at(
        &self,
        existing: Option<Manifest>,
        series: &SeriesInfo,
        fresh: &[ChapterUploadResult],
        mode: UpdateMode,
        timestamp: i64,
    ) -> Manifest {
        let mut manifest = existing.unwrap_or_default();
        strip_root_group(&mut manifest);
        apply_series(&mut manifest, series);

        let incoming = self.fresh_entries(fresh, timestamp);
        let previous = std::mem::take(&mut manifest.chapters);
        let slots: Vec<ChapterEntry> = match mode {
            UpdateMode::Replace => {
                if !previous.is_empty() {
                    info!("🔄 Replace mode: dropping {} existing chapter(s)", previous.len());
                }
                incoming.into_iter().map(|(_, entry)| entry).collect()
            }
            UpdateMode::Add => merge_add(previous, incoming),
            UpdateMode::Smart => merge_smart(previous, incoming),
        };

        manifest.chapters = self.rekey(slots);
        debug!("Merged manifest '{}' holds {} chapter(s)", manifest.title, manifest.chapters.len());
        manifest
    }

    /// Strip known corruption and renumber the chapter map.
    pub fn repair(&self, mut manifest: Manifest) -> Manifest {
        strip_root_group(&mut manifest);
        let chapters = std::mem::take(&mut manifest.chapters);
        manifest.chapters = self.rekey(chapters.into_values().collect());
        manifest
    }

    pub fn chapter_entry(&self, result: &ChapterUploadResult, timestamp: i64) -> ChapterEntry {
        let links = match (&self.link_mode, &result.album_url) {
            (LinkMode::Album, Some(album)) => GroupLinks::Album(album.clone()),
            _ => GroupLinks::Images(result.image_urls.clone()),
        };

        let mut groups = BTreeMap::new();
        groups.insert(self.group_name.clone(), links);
        ChapterEntry {
            title: result.chapter_name.clone(),
            volume: String::new(),
            last_updated: timestamp.to_string(),
            groups,
            ..ChapterEntry::default()
        }
    }

    /// Fresh entries keyed by identity; a later result for the same chapter
    /// replaces the earlier one.
    fn fresh_entries(&self, fresh: &[ChapterUploadResult], timestamp: i64) -> Vec<(String, ChapterEntry)> {
        let mut entries: Vec<(String, ChapterEntry)> = Vec::with_capacity(fresh.len());
        for result in fresh {
            let identity = normalize_title(&result.chapter_name);
            let entry = self.chapter_entry(result, timestamp);
            match entries.iter_mut().find(|(id, _)| *id == identity) {
                Some(slot) => {
                    warn!("Chapter '{}' supplied twice, keeping the last result", result.chapter_name);
                    slot.1 = entry;
                }
                None => entries.push((identity, entry)),
            }
        }
        entries
    }

    fn rekey(&self, mut slots: Vec<ChapterEntry>) -> BTreeMap<u32, ChapterEntry> {
        slots.sort_by_cached_key(|entry| SortKey::new(&entry.title));
        slots
            .into_iter()
            .zip(self.key_base..)
            .map(|(entry, key)| (key, entry))
            .collect()
    }
}

/// Overwrite the series fields of `manifest` with the non-blank fields of
/// `series`. Chapters are left as they are. Returns whether anything changed.
pub fn update_series(manifest: &mut Manifest, series: &SeriesInfo) -> bool {
    let before = manifest.clone();
    strip_root_group(manifest);
    apply_series(manifest, series);
    *manifest != before
}

/// Removes the root-level `group` field that older writers leaked into the
/// document. Returns whether anything was removed.
pub fn strip_root_group(manifest: &mut Manifest) -> bool {
    if manifest.extra.remove("group").is_some() {
        warn!("🧹 Removed stray root 'group' field from manifest '{}'", manifest.title);
        true
    } else {
        false
    }
}

fn apply_series(manifest: &mut Manifest, series: &SeriesInfo) {
    let fields = [
        (&mut manifest.title, &series.title),
        (&mut manifest.description, &series.description),
        (&mut manifest.artist, &series.artist),
        (&mut manifest.author, &series.author),
        (&mut manifest.cover, &series.cover),
        (&mut manifest.status, &series.status),
    ];
    for (current, update) in fields {
        if !update.trim().is_empty() {
            *current = update.clone();
        }
    }
}

fn merge_add(previous: BTreeMap<u32, ChapterEntry>, incoming: Vec<(String, ChapterEntry)>) -> Vec<ChapterEntry> {
    let mut slots: Vec<ChapterEntry> = previous
        .into_values()
        .filter(|entry| {
            let identity = normalize_title(&entry.title);
            !incoming.iter().any(|(id, _)| *id == identity)
        })
        .collect();
    slots.extend(incoming.into_iter().map(|(_, entry)| entry));
    slots
}

fn merge_smart(previous: BTreeMap<u32, ChapterEntry>, incoming: Vec<(String, ChapterEntry)>) -> Vec<ChapterEntry> {
    let mut pending: HashMap<String, ChapterEntry> = HashMap::with_capacity(incoming.len());
    let mut order = Vec::with_capacity(incoming.len());
    for (identity, entry) in incoming {
        order.push(identity.clone());
        pending.insert(identity, entry);
    }

    let mut slots = Vec::with_capacity(previous.len() + order.len());
    let mut replaced: Vec<String> = Vec::new();
    for entry in previous.into_values() {
        let identity = normalize_title(&entry.title);
        if let Some(update) = pending.remove(&identity) {
            slots.push(merge_entry(entry, update));
            replaced.push(identity);
        } else if replaced.contains(&identity) {
            debug!("Dropping duplicate of updated chapter '{}'", entry.title);
        } else {
            slots.push(entry);
        }
    }

    slots.extend(order.into_iter().filter_map(|identity| pending.remove(&identity)));
    slots
}

/// Fresh content over the existing entry; extra per-chapter fields and the
/// volume survive when the fresh entry has none.
fn merge_entry(existing: ChapterEntry, update: ChapterEntry) -> ChapterEntry {
    let mut extra = existing.extra;
    extra.extend(update.extra);
    ChapterEntry {
        volume: if update.volume.is_empty() {
            existing.volume
        } else {
            update.volume
        },
        extra,
        ..update
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    identity: NaturalKey,
    raw: String,
}

impl SortKey {
    fn new(title: &str) -> Self {
        Self {
            identity: NaturalKey(normalize_title(title)),
            raw: title.to_string(),
        }
    }
}

#[derive(PartialEq, Eq)]
struct NaturalKey(String);

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        natural_cmp(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}
