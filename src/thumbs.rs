use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::catalog::{Record, RecordId};
use crate::config::Config;
use crate::decode::{BitmapDecoder, Pixmap};

const NO_SLOT: usize = usize::MAX;

/*
 * (cursor - range) ==== (cursor - boundary) ==== cursor ==== (cursor + boundary) ==== (cursor + range)
 *        ^                      ^                                     ^                      ^
 *        |                      |_____________________________________|                      |
 *        |        set_cursor calls inside this span are ignored; outside it they move        |
 *        |        the window and restart the sweep                                           |
 *        |___________________________________________________________________________________|
 *   the sweep loads thumbnails in this span, starting at the cursor and alternating between
 *   the records ahead of it and the page-aligned records behind it
 */

struct Slot {
    image: Arc<Pixmap>,
    last_used: u64,
    record: Arc<Record>,
    prev: usize,
    next: usize,
}

/// Bounded cache of decoded thumbnails with least-recently-used
/// recycling. Slots live in a slab; recency is an index-linked list
/// (head = coldest, tail = hottest) and membership is a map from
/// record id to slot, so touch and evict are O(1).
///
/// Only the prefetch worker mutates the cache; consumers observe it
/// through each record's presence flag and weak image reference.
struct ThumbCache {
    slots: Vec<Slot>,
    index: HashMap<RecordId, usize>,
    head: usize,
    tail: usize,
    capacity: usize,
    thumb_width: u32,
    thumb_height: u32,
    decoder: Arc<dyn BitmapDecoder>,
    loaded: Arc<AtomicUsize>,
}

impl ThumbCache {
    fn new(
        capacity: usize,
        thumb_width: u32,
        thumb_height: u32,
        decoder: Arc<dyn BitmapDecoder>,
        loaded: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            head: NO_SLOT,
            tail: NO_SLOT,
            capacity: capacity.max(1),
            thumb_width,
            thumb_height,
            decoder,
            loaded,
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn contains(&self, id: RecordId) -> bool {
        self.index.contains_key(&id)
    }

    /// Ensures `record`'s thumbnail is cached. A cached record is just
    /// refreshed to most-recently-used; otherwise a slot is taken
    /// (allocating below capacity, recycling the coldest entry at it)
    /// and the thumbnail is decoded into it. A failed decode keeps the
    /// slot assigned so the sweep does not retry every pass, but the
    /// record's presence flag stays false.
    fn load(&mut self, record: &Arc<Record>, tick: u64) {
        if let Some(&slot) = self.index.get(&record.id()) {
            self.slots[slot].last_used = tick;
            self.touch(slot);
            return;
        }

        let slot = if self.slots.len() < self.capacity {
            self.slots.push(Slot {
                image: Arc::new(Pixmap::new(self.thumb_width, self.thumb_height)),
                last_used: 0,
                record: record.clone(),
                prev: NO_SLOT,
                next: NO_SLOT,
            });
            self.slots.len() - 1
        } else {
            let slot = self.head;
            self.unlink(slot);
            let evicted = self.slots[slot].record.clone();
            evicted.clear_thumbnail();
            self.index.remove(&evicted.id());
            log::trace!(
                "recycling thumbnail of {} (last used at tick {}) for {}",
                evicted.name(),
                self.slots[slot].last_used,
                record.name()
            );
            slot
        };

        record.begin_thumbnail_load();
        let entry = &mut self.slots[slot];
        // A consumer may still hold the recycled image via the evicted
        // record's weak reference; write into a private copy then.
        let pixmap = Arc::make_mut(&mut entry.image);
        let ok = match record.path_top() {
            Some(path) => match self.decoder.decode(path, pixmap) {
                Ok(()) => true,
                Err(err) => {
                    log::debug!("thumbnail decode failed for {}: {}", record.name(), err);
                    false
                }
            },
            None => false,
        };
        record.finish_thumbnail_load(&entry.image, ok);
        entry.last_used = tick;
        entry.record = record.clone();

        self.index.insert(record.id(), slot);
        self.link_back(slot);
        self.loaded.fetch_add(1, Ordering::Release);
    }

    fn link_back(&mut self, slot: usize) {
        self.slots[slot].prev = self.tail;
        self.slots[slot].next = NO_SLOT;
        if self.tail != NO_SLOT {
            self.slots[self.tail].next = slot;
        } else {
            self.head = slot;
        }
        self.tail = slot;
    }

    fn unlink(&mut self, slot: usize) {
        let prev = self.slots[slot].prev;
        let next = self.slots[slot].next;
        if prev != NO_SLOT {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NO_SLOT {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.slots[slot].prev = NO_SLOT;
        self.slots[slot].next = NO_SLOT;
    }

    fn touch(&mut self, slot: usize) {
        self.unlink(slot);
        self.link_back(slot);
    }
}

struct CursorState {
    pos: usize,
    signaled: bool,
}

struct PrefetchShared {
    cursor: Mutex<CursorState>,
    cond: Condvar,
    tick: AtomicU64,
    run: AtomicBool,
    shown_len: AtomicUsize,
    cache: Mutex<ThumbCache>,
}

/// Background thumbnail supplier for the records around the cursor.
///
/// The consumer moves the cursor; the worker sweeps outward from it
/// for `cache_range` steps and fills the cache. Cursor moves smaller
/// than `cache_boundary` are ignored so scrolling within the window
/// does not restart the sweep. Each accepted move bumps a tick; the
/// worker abandons a sweep as soon as it observes a newer tick.
pub struct Prefetcher {
    shared: Arc<PrefetchShared>,
    loaded: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
    per_page: usize,
    cache_range: usize,
    cache_boundary: usize,
}

impl Prefetcher {
    pub fn new(config: &Config, decoder: Arc<dyn BitmapDecoder>) -> Self {
        let loaded = Arc::new(AtomicUsize::new(0));
        let cache = ThumbCache::new(
            config.cache_capacity(),
            config.thumb_width,
            config.thumb_height,
            decoder,
            loaded.clone(),
        );
        Self {
            shared: Arc::new(PrefetchShared {
                cursor: Mutex::new(CursorState {
                    pos: 0,
                    signaled: false,
                }),
                cond: Condvar::new(),
                tick: AtomicU64::new(0),
                run: AtomicBool::new(false),
                shown_len: AtomicUsize::new(0),
                cache: Mutex::new(cache),
            }),
            loaded,
            worker: None,
            per_page: config.per_page(),
            cache_range: config.cache_range,
            cache_boundary: config.cache_boundary,
        }
    }

    /// Arms the window over `shown` and spawns the worker. Cache
    /// contents survive a stop/start pair; the tick restarts at zero
    /// so the next cursor is always accepted.
    pub fn start(&mut self, shown: Arc<Vec<Arc<Record>>>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.shared.tick.store(0, Ordering::Release);
        self.shared.shown_len.store(shown.len(), Ordering::Release);
        self.shared.cursor.lock().unwrap().signaled = false;
        self.shared.run.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let per_page = self.per_page;
        let cache_range = self.cache_range;
        self.worker = Some(
            thread::Builder::new()
                .name("thumb-prefetch".to_string())
                .spawn(move || run_worker(shared, shown, per_page, cache_range))
                .context("failed to spawn thumbnail prefetch thread")?,
        );
        Ok(())
    }

    /// Two-phase shutdown: flag, wake, join.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let _cursor = self.shared.cursor.lock().unwrap();
            self.shared.run.store(false, Ordering::Release);
            self.shared.cond.notify_all();
        }
        let _ = worker.join();
    }

    /// Moves the window cursor. Accepted only when no cursor has been
    /// set yet or the move is at least `cache_boundary` records;
    /// acceptance bumps the tick and wakes the worker.
    pub fn set_cursor(&self, pos: usize) {
        if self.shared.shown_len.load(Ordering::Acquire) == 0 {
            return;
        }
        let mut cursor = self.shared.cursor.lock().unwrap();
        if self.shared.tick.load(Ordering::Acquire) != 0
            && cursor.pos.abs_diff(pos) < self.cache_boundary
        {
            return;
        }
        cursor.pos = pos;
        self.shared.tick.fetch_add(1, Ordering::AcqRel);
        cursor.signaled = true;
        self.shared.cond.notify_one();
    }

    /// Monotone count of decode attempts, for "new thumbnails are
    /// ready" change detection without polling cache internals.
    pub fn num_loaded(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    /// Live cache entries, at most `max(2 * cache_range + 1, floor)`.
    pub fn cached_count(&self) -> usize {
        self.shared.cache.lock().unwrap().len()
    }

    #[cfg(test)]
    fn tick(&self) -> u64 {
        self.shared.tick.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn cache_contains(&self, id: RecordId) -> bool {
        self.shared.cache.lock().unwrap().contains(id)
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    shared: Arc<PrefetchShared>,
    shown: Arc<Vec<Arc<Record>>>,
    per_page: usize,
    cache_range: usize,
) {
    log::debug!("prefetch worker started over {} records", shown.len());
    loop {
        if !shared.run.load(Ordering::Acquire) {
            break;
        }
        let tick = shared.tick.load(Ordering::Acquire);
        if tick != 0 {
            let cursor = {
                let mut cursor = shared.cursor.lock().unwrap();
                cursor.signaled = false;
                cursor.pos
            };
            sweep(&shared, &shown, cursor, tick, per_page, cache_range);
        }

        let mut cursor = shared.cursor.lock().unwrap();
        while shared.run.load(Ordering::Acquire) && !cursor.signaled {
            cursor = shared.cond.wait(cursor).unwrap();
        }
    }
    log::debug!("prefetch worker stopped");
}

/// One pass outward from the cursor: step `i` loads the record `i`
/// ahead and a page-aligned record behind, so the page above the
/// cursor fills about as fast as the pages below it instead of an
/// all-forward sweep starving backward scrolling.
fn sweep(
    shared: &PrefetchShared,
    shown: &[Arc<Record>],
    cursor: usize,
    tick: u64,
    per_page: usize,
    cache_range: usize,
) {
    for i in 0..=cache_range {
        // A newer tick means the cursor moved: abandon this sweep
        // rather than merge it with the next one.
        if !shared.run.load(Ordering::Acquire) || shared.tick.load(Ordering::Acquire) != tick {
            return;
        }
        if let Some(record) = shown.get(cursor + i) {
            shared.cache.lock().unwrap().load(record, tick);
        }
        if i > 0 {
            let back = page_offset(i, per_page);
            if let Some(record) = cursor.checked_sub(back).and_then(|at| shown.get(at)) {
                shared.cache.lock().unwrap().load(record, tick);
            }
        }
    }
}

/// Backward offset for step `i`: walks the page right above the
/// cursor top-down, then the page above that, page by page.
fn page_offset(i: usize, per_page: usize) -> usize {
    ((i - 1) / per_page) * per_page + (per_page - (i - 1) % per_page)
}
