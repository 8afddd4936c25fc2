use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::active::{ActiveLoader, LoadCallback};
use crate::catalog::{Catalog, Record, SortMode};
use crate::config::Config;
use crate::decode::BitmapDecoder;
use crate::tags::{Tag, TagId, TagStore};
use crate::thumbs::Prefetcher;

/// Owns the catalog, the tag store, and both background workers, and
/// exposes the surface a UI layer drives.
///
/// Every mutation of the shown sequence (sort, filter, hidden set,
/// tag edits, deletion) is a restart point: both workers are stopped
/// before the catalog changes and restarted over the new sequence, so
/// no in-flight work ever refers to stale ordering.
pub struct Browser {
    config: Config,
    tags: TagStore,
    catalog: Catalog,
    prefetcher: Prefetcher,
    loader: ActiveLoader,
    sort_mode: SortMode,
}

impl Browser {
    pub fn new(config: Config, decoder: Arc<dyn BitmapDecoder>) -> Result<Self> {
        let prefetcher = Prefetcher::new(&config, decoder.clone());
        let loader = ActiveLoader::new(&config, decoder)?;
        Ok(Self {
            sort_mode: config.sort_mode,
            config,
            tags: TagStore::new(),
            catalog: Catalog::new(),
            prefetcher,
            loader,
        })
    }

    /// Scans the screenshot directory and builds the shown sequence.
    pub fn scan(&mut self) -> usize {
        self.halt();
        self.catalog.scan(&self.config.screenshots_dir);
        self.restart();
        self.catalog.len()
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.sort_mode = mode;
        self.refresh();
    }

    pub fn set_filter<I>(&mut self, tags: I)
    where
        I: IntoIterator<Item = TagId>,
    {
        self.tags.set_filter(tags);
        self.refresh();
    }

    pub fn set_hidden<I>(&mut self, tags: I)
    where
        I: IntoIterator<Item = TagId>,
    {
        self.tags.set_hidden(tags);
        self.refresh();
    }

    pub fn add_tag(&mut self, tag: Tag) -> TagId {
        self.tags.add_tag(tag)
    }

    /// Re-tags a record and re-derives the shown sequence, since tag
    /// edits can move it between buckets or behind a filter.
    pub fn set_tags<I>(&mut self, name: &str, tags: I)
    where
        I: IntoIterator<Item = TagId>,
    {
        self.tags.set_tags(name, tags);
        self.refresh();
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    /// Deletes the named screenshots: backing files best-effort, tag
    /// associations, and the records themselves.
    pub fn delete(&mut self, names: &HashSet<String>) {
        self.halt();
        self.catalog.delete(names);
        self.tags.remove_records(names);
        self.restart();
    }

    pub fn shown_count(&self) -> usize {
        self.catalog.shown_count()
    }

    pub fn hidden_count(&self) -> usize {
        self.catalog.hidden_count()
    }

    /// Record at a shown index. Looking one up also nudges the
    /// prefetch window toward it, so browsing keeps the cache warm
    /// without an explicit cursor call.
    pub fn record_at(&self, shown_index: usize) -> Option<Arc<Record>> {
        let record = self.catalog.record_at(shown_index);
        if record.is_some() {
            self.prefetcher.set_cursor(shown_index);
        }
        record
    }

    pub fn set_cursor(&self, shown_index: usize) {
        self.prefetcher.set_cursor(shown_index);
    }

    pub fn num_loaded(&self) -> usize {
        self.prefetcher.num_loaded()
    }

    pub fn request_load(&self, record: Option<Arc<Record>>, callback: LoadCallback) {
        self.loader.request_load(record, callback);
    }

    fn refresh(&mut self) {
        self.halt();
        self.restart();
    }

    fn halt(&mut self) {
        self.prefetcher.stop();
        self.loader.stop();
    }

    fn restart(&mut self) {
        self.catalog.recompute(self.sort_mode, &self.tags);
        if let Err(err) = self.prefetcher.start(self.catalog.shown()) {
            log::error!("cannot restart thumbnail prefetcher: {err:#}");
        }
        if let Err(err) = self.loader.start() {
            log::error!("cannot restart active image loader: {err:#}");
        }
    }
}
