use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use shotbook::{Browser, Config, ImageDecoder};

/// Headless smoke run: scan a directory of screenshots, warm the
/// thumbnail window around the first record, load its full-resolution
/// images, and print what happened.
fn main() -> Result<()> {
    env_logger::init();

    let mut config = Config::load(Path::new("shotbook.toml"));
    if let Some(dir) = std::env::args().nth(1) {
        config.screenshots_dir = dir.into();
    }

    let mut browser = Browser::new(config, Arc::new(ImageDecoder))?;
    browser.scan();
    println!(
        "{} shown, {} hidden",
        browser.shown_count(),
        browser.hidden_count()
    );
    if browser.shown_count() == 0 {
        return Ok(());
    }

    browser.set_cursor(0);
    let mut loaded = 0;
    loop {
        std::thread::sleep(Duration::from_millis(200));
        let now = browser.num_loaded();
        if now == loaded {
            break;
        }
        loaded = now;
    }
    println!("{loaded} thumbnails decoded");

    let (tx, rx) = mpsc::channel();
    browser.request_load(
        browser.record_at(0),
        Box::new(move |image| {
            let _ = tx.send(image);
        }),
    );
    match rx.recv_timeout(Duration::from_secs(10)) {
        Ok(Some(image)) => println!(
            "active image ready: top {}x{}, stereo: {}",
            image.top.width(),
            image.top.height(),
            image.stereo
        ),
        Ok(None) => println!("nothing selected"),
        Err(_) => println!("active image load timed out"),
    }
    Ok(())
}
