use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::catalog::{Record, RecordId};
use crate::config::Config;
use crate::decode::{BitmapDecoder, Pixmap};

/// Invoked once per accepted load request with the ready image, or
/// `None` for "nothing selected". Superseded requests are dropped and
/// their callbacks never run.
pub type LoadCallback = Box<dyn FnOnce(Option<Arc<ActiveImage>>) + Send + 'static>;

/// Full-resolution image set for the selected record. `stereo` is set
/// iff the right-eye image was present and decoded cleanly.
#[derive(Debug, Clone)]
pub struct ActiveImage {
    pub top: Pixmap,
    pub top_right: Pixmap,
    pub bottom: Pixmap,
    pub stereo: bool,
}

impl ActiveImage {
    fn blank(top_size: (u32, u32), bottom_size: (u32, u32)) -> Self {
        Self {
            top: Pixmap::new(top_size.0, top_size.1),
            top_right: Pixmap::new(top_size.0, top_size.1),
            bottom: Pixmap::new(bottom_size.0, bottom_size.1),
            stereo: false,
        }
    }
}

struct LoadRequest {
    record: Arc<Record>,
    callback: LoadCallback,
}

struct LoaderShared {
    last_requested: Mutex<Option<RecordId>>,
    current: Mutex<Option<Arc<ActiveImage>>>,
    pending: AtomicUsize,
}

/// Background loader for the selected record's full-resolution images.
///
/// The worker decodes into whichever of its two buffers is not the one
/// last handed out, and hands the buffer over only after all three
/// screens are done, so a consumer never sees a half-written image.
/// Requests are coalesced: only the most recent one matters.
pub struct ActiveLoader {
    shared: Arc<LoaderShared>,
    decoder: Arc<dyn BitmapDecoder>,
    tx: Option<Sender<LoadRequest>>,
    worker: Option<JoinHandle<()>>,
    top_size: (u32, u32),
    bottom_size: (u32, u32),
}

impl ActiveLoader {
    pub fn new(config: &Config, decoder: Arc<dyn BitmapDecoder>) -> Result<Self> {
        let mut loader = Self {
            shared: Arc::new(LoaderShared {
                last_requested: Mutex::new(None),
                current: Mutex::new(None),
                pending: AtomicUsize::new(0),
            }),
            decoder,
            tx: None,
            worker: None,
            top_size: (config.top_width, config.top_height),
            bottom_size: (config.bottom_width, config.bottom_height),
        };
        loader.start()?;
        Ok(loader)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (tx, rx) = unbounded::<LoadRequest>();
        let mut worker = LoaderWorker {
            decoder: self.decoder.clone(),
            shared: self.shared.clone(),
            buffers: [
                Arc::new(ActiveImage::blank(self.top_size, self.bottom_size)),
                Arc::new(ActiveImage::blank(self.top_size, self.bottom_size)),
            ],
            current: 0,
            last_completed: None,
        };
        self.worker = Some(
            thread::Builder::new()
                .name("active-loader".to_string())
                .spawn(move || worker.run(rx))
                .context("failed to spawn active image loader thread")?,
        );
        self.tx = Some(tx);
        Ok(())
    }

    /// Closing the channel is the stop signal; the worker drains what
    /// is already queued, then exits, and we join it.
    pub fn stop(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Requests the full-resolution images for `record`.
    ///
    /// `None` reports "nothing selected" synchronously. A repeat of
    /// the most recently requested record with no load in flight is
    /// answered synchronously from the already-loaded buffer.
    pub fn request_load(&self, record: Option<Arc<Record>>, callback: LoadCallback) {
        let Some(record) = record else {
            callback(None);
            return;
        };

        {
            let last = self.shared.last_requested.lock().unwrap();
            if *last == Some(record.id()) && self.shared.pending.load(Ordering::Acquire) == 0 {
                let image = self.shared.current.lock().unwrap().clone();
                if let Some(image) = image {
                    drop(last);
                    callback(Some(image));
                    return;
                }
            }
        }

        *self.shared.last_requested.lock().unwrap() = Some(record.id());
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let sent = match &self.tx {
            Some(tx) => tx.send(LoadRequest { record, callback }).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            log::warn!("active image loader is stopped; dropping load request");
        }
    }
}

impl Drop for ActiveLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoaderWorker {
    decoder: Arc<dyn BitmapDecoder>,
    shared: Arc<LoaderShared>,
    buffers: [Arc<ActiveImage>; 2],
    current: usize,
    last_completed: Option<RecordId>,
}

impl LoaderWorker {
    fn run(&mut self, rx: Receiver<LoadRequest>) {
        log::debug!("active image loader started");
        while let Ok(mut request) = rx.recv() {
            // Coalesce: drop everything but the newest queued request.
            while let Ok(next) = rx.try_recv() {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                request = next;
            }
            self.handle(request);
        }
        log::debug!("active image loader stopped");
    }

    fn handle(&mut self, request: LoadRequest) {
        // A duplicate of the last completed load replays the current
        // buffer without decoding.
        if self.last_completed == Some(request.record.id()) {
            let image = self.buffers[self.current].clone();
            (request.callback)(Some(image));
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        let back = 1 - self.current;
        // The consumer may still hold the buffer from two loads ago;
        // write into a private copy then.
        let buffer = Arc::make_mut(&mut self.buffers[back]);
        decode_screens(self.decoder.as_ref(), &request.record, buffer);

        let image = self.buffers[back].clone();
        *self.shared.current.lock().unwrap() = Some(image.clone());
        self.last_completed = Some(request.record.id());
        (request.callback)(Some(image));
        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
        self.current = back;
    }
}

/// Decodes the three screens in right, top, bottom order. Each screen
/// degrades on its own: a broken right eye just disables stereo, a
/// broken top blanks the whole upper screen pair and disables stereo,
/// a broken bottom blanks only itself.
fn decode_screens(decoder: &dyn BitmapDecoder, record: &Record, image: &mut ActiveImage) {
    image.stereo = match record.path_top_right() {
        Some(path) => match decoder.decode(path, &mut image.top_right) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("right-eye decode failed for {}: {}", record.name(), err);
                image.top_right.clear();
                false
            }
        },
        None => false,
    };

    let top_ok = match record.path_top() {
        Some(path) => match decoder.decode(path, &mut image.top) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("top decode failed for {}: {}", record.name(), err);
                false
            }
        },
        None => false,
    };
    if !top_ok {
        image.top.clear();
        image.top_right.clear();
        image.stereo = false;
    }

    let bottom_ok = match record.path_bottom() {
        Some(path) => match decoder.decode(path, &mut image.bottom) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("bottom decode failed for {}: {}", record.name(), err);
                false
            }
        },
        None => false,
    };
    if !bottom_ok {
        image.bottom.clear();
    }
}
