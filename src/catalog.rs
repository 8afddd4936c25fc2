use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::decode::Pixmap;
use crate::tags::{TagId, TagStore};

/// File suffixes that make up one screenshot, in screen order:
/// top, stereo right eye, bottom.
const SUFFIXES: [&str; 3] = ["_top.bmp", "_top_right.bmp", "_bot.bmp"];

/// Stable identifier for a record, issued at scan time and never
/// reused. The thumbnail cache keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u32);

/// One logical screenshot: up to three image files sharing a name stem.
///
/// The thumbnail presence flag and the weak image reference are the
/// only fields the prefetch worker writes; consumers read them through
/// [`Record::has_thumbnail`] and [`Record::thumbnail`] without locks on
/// the pixel data.
#[derive(Debug)]
pub struct Record {
    id: RecordId,
    name: String,
    path_top: Option<PathBuf>,
    path_top_right: Option<PathBuf>,
    path_bottom: Option<PathBuf>,
    thumb_present: AtomicBool,
    thumb: Mutex<Weak<Pixmap>>,
}

impl Record {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path_top(&self) -> Option<&Path> {
        self.path_top.as_deref()
    }

    pub fn path_top_right(&self) -> Option<&Path> {
        self.path_top_right.as_deref()
    }

    pub fn path_bottom(&self) -> Option<&Path> {
        self.path_bottom.as_deref()
    }

    /// True while the cache holds a successfully decoded thumbnail for
    /// this record.
    pub fn has_thumbnail(&self) -> bool {
        self.thumb_present.load(Ordering::Acquire)
    }

    /// The cached thumbnail, if still alive. The returned strong
    /// reference keeps the pixels valid even if the cache recycles the
    /// slot meanwhile.
    pub fn thumbnail(&self) -> Option<Arc<Pixmap>> {
        if !self.has_thumbnail() {
            return None;
        }
        self.thumb.lock().unwrap().upgrade()
    }

    pub(crate) fn begin_thumbnail_load(&self) {
        self.thumb_present.store(false, Ordering::Release);
    }

    pub(crate) fn finish_thumbnail_load(&self, image: &Arc<Pixmap>, ok: bool) {
        *self.thumb.lock().unwrap() = if ok {
            Arc::downgrade(image)
        } else {
            Weak::new()
        };
        self.thumb_present.store(ok, Ordering::Release);
    }

    pub(crate) fn clear_thumbnail(&self) {
        self.thumb_present.store(false, Ordering::Release);
        *self.thumb.lock().unwrap() = Weak::new();
    }
}

#[cfg(test)]
impl Record {
    pub(crate) fn for_tests(
        id: u32,
        name: &str,
        top: Option<PathBuf>,
        right: Option<PathBuf>,
        bottom: Option<PathBuf>,
    ) -> Arc<Record> {
        Arc::new(Record {
            id: RecordId(id),
            name: name.to_string(),
            path_top: top,
            path_top_right: right,
            path_bottom: bottom,
            thumb_present: AtomicBool::new(false),
            thumb: Mutex::new(Weak::new()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Tags,
    TagsNewer,
    Older,
    Newer,
}

/// The record table plus the derived shown/hidden partition.
///
/// `shown` is shared as an `Arc` so the prefetch worker can walk it
/// while the consumer navigates; any recompute swaps in a fresh
/// sequence and invalidates previously handed-out indices.
#[derive(Debug, Default)]
pub struct Catalog {
    records: Vec<Arc<Record>>,
    shown: Arc<Vec<Arc<Record>>>,
    hidden: Vec<Arc<Record>>,
    next_id: u32,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists the screenshot directory and groups files sharing a stem
    /// into one record each. Files are sorted first so one stem's
    /// files are contiguous. An unreadable directory yields an empty
    /// catalog.
    pub fn scan(&mut self, dir: &Path) {
        self.records.clear();
        self.shown = Arc::new(Vec::new());
        self.hidden.clear();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("cannot read screenshot dir {}: {}", dir.display(), err);
                return;
            }
        };

        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        files.sort();

        struct Draft {
            name: String,
            top: Option<PathBuf>,
            right: Option<PathBuf>,
            bottom: Option<PathBuf>,
        }
        let mut drafts: Vec<Draft> = Vec::new();

        for file in &files {
            for (kind, suffix) in SUFFIXES.iter().copied().enumerate() {
                let Some(stem) = file.strip_suffix(suffix) else {
                    continue;
                };
                if drafts.last().map(|d| d.name.as_str()) != Some(stem) {
                    drafts.push(Draft {
                        name: stem.to_string(),
                        top: None,
                        right: None,
                        bottom: None,
                    });
                }
                if let Some(draft) = drafts.last_mut() {
                    let path = dir.join(file);
                    match kind {
                        0 => draft.top = Some(path),
                        1 => draft.right = Some(path),
                        _ => draft.bottom = Some(path),
                    }
                }
                break;
            }
        }

        self.records = drafts
            .into_iter()
            .map(|draft| {
                let id = RecordId(self.next_id);
                self.next_id += 1;
                Arc::new(Record {
                    id,
                    name: draft.name,
                    path_top: draft.top,
                    path_top_right: draft.right,
                    path_bottom: draft.bottom,
                    thumb_present: AtomicBool::new(false),
                    thumb: Mutex::new(Weak::new()),
                })
            })
            .collect();

        log::info!(
            "scanned {} screenshots from {}",
            self.records.len(),
            dir.display()
        );
    }

    /// Rebuilds the shown/hidden partition and orders the shown
    /// sequence. A record is shown iff it carries all filter tags (or
    /// the filter is empty) and none of the hidden tags.
    pub fn recompute(&mut self, mode: SortMode, store: &TagStore) {
        let mut filtered = Vec::with_capacity(self.records.len());
        let mut hidden = Vec::new();

        for record in &self.records {
            let tags = store.tags_of(record.name());
            let visible = (store.filter().is_empty() || has_all(tags, store.filter()))
                && !has_any(tags, store.hidden());
            if visible {
                filtered.push(record.clone());
            } else {
                hidden.push(record.clone());
            }
        }

        let shown = match mode {
            SortMode::Older => filtered,
            SortMode::Newer => {
                filtered.reverse();
                filtered
            }
            SortMode::Tags | SortMode::TagsNewer => group_by_first_tag(filtered, mode, store),
        };

        log::debug!("recompute: {} shown, {} hidden", shown.len(), hidden.len());
        self.shown = Arc::new(shown);
        self.hidden = hidden;
    }

    /// Removes the named records and best-effort deletes their backing
    /// files. Individual deletion failures are logged and do not keep
    /// the record in the catalog. The caller recomputes afterwards.
    pub fn delete(&mut self, names: &HashSet<String>) {
        let mut removed = Vec::new();
        self.records.retain(|record| {
            if names.contains(record.name()) {
                removed.push(record.clone());
                false
            } else {
                true
            }
        });

        for record in &removed {
            let paths = [
                record.path_top(),
                record.path_top_right(),
                record.path_bottom(),
            ];
            for path in paths.into_iter().flatten() {
                if let Err(err) = fs::remove_file(path) {
                    log::warn!("failed to delete {}: {}", path.display(), err);
                }
            }
        }
        log::info!("deleted {} screenshots", removed.len());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn shown_count(&self) -> usize {
        self.shown.len()
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }

    pub fn record_at(&self, shown_index: usize) -> Option<Arc<Record>> {
        self.shown.get(shown_index).cloned()
    }

    /// The shown sequence, shared with the prefetch worker.
    pub fn shown(&self) -> Arc<Vec<Arc<Record>>> {
        self.shown.clone()
    }
}

fn has_all(tags: &[TagId], wanted: &HashSet<TagId>) -> bool {
    wanted.iter().all(|t| tags.contains(t))
}

fn has_any(tags: &[TagId], set: &HashSet<TagId>) -> bool {
    tags.iter().any(|t| set.contains(t))
}

/// Buckets records by their first tag. `Tags` emits buckets in global
/// tag order, each sorted by (tag count, tag order index sum), stable
/// beyond that; `TagsNewer` reverses the input first and emits buckets
/// in first-encountered order unsorted. Untagged records always come
/// last, keeping their relative order.
fn group_by_first_tag(
    mut filtered: Vec<Arc<Record>>,
    mode: SortMode,
    store: &TagStore,
) -> Vec<Arc<Record>> {
    if mode == SortMode::TagsNewer {
        filtered.reverse();
    }

    let mut buckets: HashMap<Option<TagId>, Vec<Arc<Record>>> = HashMap::new();
    let mut encounter: Vec<TagId> = Vec::new();

    for record in filtered {
        let first = store.tags_of(record.name()).first().copied();
        if let Some(tag) = first {
            if !buckets.contains_key(&Some(tag)) {
                encounter.push(tag);
            }
        }
        buckets.entry(first).or_default().push(record);
    }

    let mut shown = Vec::new();
    if mode == SortMode::Tags {
        for i in 0..store.tag_count() {
            let Some(tag) = store.tag_at(i) else { break };
            if let Some(mut group) = buckets.remove(&Some(tag)) {
                group.sort_by_key(|record| {
                    let tags = store.tags_of(record.name());
                    let index_sum: usize = tags
                        .iter()
                        .map(|t| store.order_index(*t).unwrap_or(0))
                        .sum();
                    (tags.len(), index_sum)
                });
                shown.extend(group);
            }
        }
    }
    // TagsNewer emission; also catches any bucket whose tag is no
    // longer in the global order, so shown + hidden stays complete.
    for tag in encounter {
        if let Some(group) = buckets.remove(&Some(tag)) {
            shown.extend(group);
        }
    }
    if let Some(untagged) = buckets.remove(&None) {
        shown.extend(untagged);
    }
    shown
}
