use std::fs;
use std::path::{Path, PathBuf};

use toml::Value as TomlValue;

use crate::catalog::SortMode;

/// Tunables for the browser core. Defaults mirror a 400x240 top /
/// 320x240 bottom dual-screen layout with a 3x3 thumbnail grid page.
#[derive(Debug, Clone)]
pub struct Config {
    pub screenshots_dir: PathBuf,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub top_width: u32,
    pub top_height: u32,
    pub bottom_width: u32,
    pub bottom_height: u32,
    pub thumbs_per_page: usize,
    /// How many records around the cursor the prefetcher keeps warm.
    pub cache_range: usize,
    /// Minimum cursor move before the prefetch window jumps.
    pub cache_boundary: usize,
    /// Lower bound on cache capacity regardless of the range.
    pub cache_floor: usize,
    pub sort_mode: SortMode,
}

impl Default for Config {
    fn default() -> Self {
        let thumbs_per_page = 9;
        Self {
            screenshots_dir: PathBuf::from("screenshots"),
            thumb_width: 100,
            thumb_height: 60,
            top_width: 400,
            top_height: 240,
            bottom_width: 320,
            bottom_height: 240,
            thumbs_per_page,
            cache_range: thumbs_per_page * 15,
            cache_boundary: thumbs_per_page * 5,
            cache_floor: 1000,
            sort_mode: SortMode::default(),
        }
    }
}

impl Config {
    /// A full sweep touches `2 * cache_range + 1` records; capacity at
    /// least that keeps the active window eviction-free.
    pub fn cache_capacity(&self) -> usize {
        (2 * self.cache_range + 1).max(self.cache_floor)
    }

    pub fn per_page(&self) -> usize {
        self.thumbs_per_page.max(1)
    }

    /// Reads the config file, falling back to defaults if it is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(err) => {
                log::debug!("no config at {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    /// Parses a TOML table, keeping defaults for anything missing,
    /// malformed, or unknown.
    pub fn from_toml_str(s: &str) -> Self {
        let mut config = Self::default();
        let table = match toml::from_str::<TomlValue>(s) {
            Ok(TomlValue::Table(table)) => table,
            _ => return config,
        };
        for (key, value) in table {
            match key.as_str() {
                "screenshots_dir" => {
                    if let TomlValue::String(v) = value {
                        config.screenshots_dir = PathBuf::from(v);
                    }
                }
                "thumb_width" => set_u32(&mut config.thumb_width, &value),
                "thumb_height" => set_u32(&mut config.thumb_height, &value),
                "top_width" => set_u32(&mut config.top_width, &value),
                "top_height" => set_u32(&mut config.top_height, &value),
                "bottom_width" => set_u32(&mut config.bottom_width, &value),
                "bottom_height" => set_u32(&mut config.bottom_height, &value),
                "thumbs_per_page" => set_usize(&mut config.thumbs_per_page, &value),
                "cache_range" => set_usize(&mut config.cache_range, &value),
                "cache_boundary" => set_usize(&mut config.cache_boundary, &value),
                "cache_floor" => set_usize(&mut config.cache_floor, &value),
                "sort" => {
                    if let TomlValue::String(v) = &value {
                        if let Some(mode) = parse_sort(v) {
                            config.sort_mode = mode;
                        }
                    }
                }
                _ => {}
            }
        }
        config
    }
}

fn set_u32(field: &mut u32, value: &TomlValue) {
    if let TomlValue::Integer(v) = value {
        if let Ok(v) = u32::try_from(*v) {
            *field = v;
        }
    }
}

fn set_usize(field: &mut usize, value: &TomlValue) {
    if let TomlValue::Integer(v) = value {
        if let Ok(v) = usize::try_from(*v) {
            *field = v;
        }
    }
}

fn parse_sort(s: &str) -> Option<SortMode> {
    match s.to_lowercase().as_str() {
        "tags" => Some(SortMode::Tags),
        "tags_newer" => Some(SortMode::TagsNewer),
        "older" => Some(SortMode::Older),
        "newer" => Some(SortMode::Newer),
        _ => None,
    }
}
