//! Core of a screenshot browser for a dual-screen handheld.
//!
//! Screenshots come in up to three files per shot (top screen, stereo
//! right eye, bottom screen) sharing a name stem. This crate scans
//! them into a catalog, derives a filtered and tag-sorted view, keeps
//! a bounded window of thumbnails decoded around the browsing cursor,
//! and loads the selected shot's full-resolution images in the
//! background with double buffering. Rendering and input are the
//! caller's business; the crate ends at pixel buffers and callbacks.

pub mod active;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod decode;
pub mod tags;
pub mod thumbs;

pub use active::{ActiveImage, ActiveLoader, LoadCallback};
pub use browser::Browser;
pub use catalog::{Catalog, Record, RecordId, SortMode};
pub use config::Config;
pub use decode::{BitmapDecoder, DecodeError, ImageDecoder, Pixmap};
pub use tags::{Tag, TagId, TagStore};
pub use thumbs::Prefetcher;
