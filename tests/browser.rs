use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use shotbook::{Browser, Config, ImageDecoder, SortMode, Tag};

fn write_bmp(dir: &Path, name: &str, rgb: [u8; 3]) {
    image::RgbImage::from_pixel(8, 8, image::Rgb(rgb))
        .save(dir.join(name))
        .unwrap();
}

/// Five screenshots; shot_003 has a stereo right eye.
fn fixture_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (i, name) in ["shot_001", "shot_002", "shot_003", "shot_004", "shot_005"]
        .iter()
        .enumerate()
    {
        let shade = (40 * (i + 1)) as u8;
        write_bmp(dir.path(), &format!("{name}_top.bmp"), [shade, 0, 0]);
        write_bmp(dir.path(), &format!("{name}_bot.bmp"), [0, 0, shade]);
    }
    write_bmp(dir.path(), "shot_003_top_right.bmp", [0, 120, 0]);
    dir
}

fn browser_over(dir: &TempDir) -> Browser {
    let config = Config {
        screenshots_dir: dir.path().to_path_buf(),
        thumb_width: 8,
        thumb_height: 8,
        top_width: 8,
        top_height: 8,
        bottom_width: 8,
        bottom_height: 8,
        thumbs_per_page: 1,
        cache_range: 2,
        // Wide boundary so record lookups do not move the window
        // underneath the assertions.
        cache_boundary: 10,
        cache_floor: 5,
        sort_mode: SortMode::Older,
    };
    Browser::new(config, Arc::new(ImageDecoder)).unwrap()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn scan_orders_and_prefetches_around_cursor() {
    let dir = fixture_dir();
    let mut browser = browser_over(&dir);
    assert_eq!(browser.scan(), 5);
    assert_eq!(browser.shown_count(), 5);
    assert_eq!(browser.record_at(0).unwrap().name(), "shot_001");

    browser.set_cursor(0);
    assert!(wait_until(Duration::from_secs(5), || browser.num_loaded() >= 3));
    std::thread::sleep(Duration::from_millis(50));

    let records: Vec<_> = (0..5).map(|i| browser.record_at(i).unwrap()).collect();
    for (i, record) in records.iter().enumerate() {
        assert_eq!(
            record.has_thumbnail(),
            i <= 2,
            "unexpected thumbnail state for {}",
            record.name()
        );
    }
    let thumb = records[0].thumbnail().expect("cached thumbnail");
    assert_eq!((thumb.width(), thumb.height()), (8, 8));
    assert!(thumb.data().iter().any(|b| *b != 0));
    assert_eq!(browser.num_loaded(), 3);
}

#[test]
fn active_load_round_trip_with_stereo() {
    let dir = fixture_dir();
    let mut browser = browser_over(&dir);
    browser.scan();

    let stereo_shot = browser.record_at(2).unwrap();
    assert_eq!(stereo_shot.name(), "shot_003");

    let (tx, rx) = mpsc::channel();
    browser.request_load(
        Some(stereo_shot),
        Box::new(move |image| tx.send(image).unwrap()),
    );
    let image = rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("active image should load");
    assert!(image.stereo);
    assert!(image.top.data().iter().any(|b| *b != 0));
    assert!(image.bottom.data().iter().any(|b| *b != 0));

    let flat_shot = browser.record_at(0).unwrap();
    let (tx, rx) = mpsc::channel();
    browser.request_load(
        Some(flat_shot),
        Box::new(move |image| tx.send(image).unwrap()),
    );
    let image = rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .expect("active image should load");
    assert!(!image.stereo);
}

#[test]
fn tag_sort_and_filter_reshape_the_shown_sequence() {
    let dir = fixture_dir();
    let mut browser = browser_over(&dir);
    browser.scan();

    let favorite = browser.add_tag(Tag {
        name: "favorite".to_string(),
        color: 0xffd700,
    });
    browser.set_tags("shot_005", [favorite]);
    browser.set_sort_mode(SortMode::Tags);

    // Tagged bucket first, untagged records after it in scan order.
    assert_eq!(browser.record_at(0).unwrap().name(), "shot_005");
    assert_eq!(browser.record_at(1).unwrap().name(), "shot_001");

    browser.set_filter([favorite]);
    assert_eq!(browser.shown_count(), 1);
    assert_eq!(browser.hidden_count(), 4);
    assert_eq!(browser.record_at(0).unwrap().name(), "shot_005");

    browser.set_filter([]);
    browser.set_hidden([favorite]);
    assert_eq!(browser.shown_count(), 4);
    assert!(!(0..4).any(|i| browser.record_at(i).unwrap().name() == "shot_005"));
}

#[test]
fn delete_removes_files_and_recomputes() {
    let dir = fixture_dir();
    let mut browser = browser_over(&dir);
    browser.scan();
    assert_eq!(browser.shown_count(), 5);

    let names: HashSet<String> = ["shot_001".to_string()].into_iter().collect();
    browser.delete(&names);

    assert_eq!(browser.shown_count(), 4);
    assert_eq!(browser.record_at(0).unwrap().name(), "shot_002");
    assert!(!dir.path().join("shot_001_top.bmp").exists());
    assert!(!dir.path().join("shot_001_bot.bmp").exists());
    assert!(dir.path().join("shot_002_top.bmp").exists());
}

#[test]
fn cached_thumbnails_survive_a_sort_change() {
    let dir = fixture_dir();
    let mut browser = browser_over(&dir);
    browser.scan();

    browser.set_cursor(0);
    assert!(wait_until(Duration::from_secs(5), || browser.num_loaded() >= 3));

    // Reversed order; looking up index 0 re-arms the window there,
    // which decodes shot_005 and shot_004. shot_003 and the rest are
    // already cached, so the decode count settles at five, not six.
    browser.set_sort_mode(SortMode::Newer);
    assert_eq!(browser.record_at(0).unwrap().name(), "shot_005");
    assert!(wait_until(Duration::from_secs(5), || browser.num_loaded() >= 5));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(browser.num_loaded(), 5);

    let shot_001 = browser.record_at(4).unwrap();
    assert_eq!(shot_001.name(), "shot_001");
    assert!(shot_001.has_thumbnail());
}
