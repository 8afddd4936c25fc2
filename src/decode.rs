use std::path::{Path, PathBuf};

use thiserror::Error;

/// A caller-owned RGB8 pixel buffer with fixed dimensions.
///
/// Decoders scale into it; the buffer itself never reallocates, so a
/// `Pixmap` sized for a thumbnail or a screen stays that size for the
/// lifetime of its cache slot.
#[derive(Debug, Clone)]
pub struct Pixmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Pixmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB8 pixel data, row-major, `width * height * 3` bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Blanks the buffer to black without changing its dimensions.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Fills the buffer with one color, e.g. for a placeholder.
    pub fn fill(&mut self, rgb: [u8; 3]) {
        for px in self.data.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[at], self.data[at + 1], self.data[at + 2]])
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("i/o error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("not a decodable image: {path}")]
    BadSignature { path: PathBuf },

    #[error("unsupported image layout: {path}")]
    Unsupported { path: PathBuf },
}

/// Decodes an image file into a caller-owned buffer.
///
/// Implementations scale the source to fit inside the target, center
/// it, and leave the uncovered border black. Failures are reported via
/// [`DecodeError`]; callers in this crate narrow them to a boolean.
pub trait BitmapDecoder: Send + Sync {
    fn decode(&self, path: &Path, target: &mut Pixmap) -> Result<(), DecodeError>;
}

/// Production decoder backed by the `image` crate.
#[derive(Debug, Default)]
pub struct ImageDecoder;

impl BitmapDecoder for ImageDecoder {
    fn decode(&self, path: &Path, target: &mut Pixmap) -> Result<(), DecodeError> {
        let img = image::open(path).map_err(|err| map_image_error(path, err))?;
        let scaled = img.thumbnail(target.width, target.height).to_rgb8();

        target.clear();
        let off_x = (target.width.saturating_sub(scaled.width()) / 2) as usize;
        let off_y = (target.height.saturating_sub(scaled.height()) / 2) as usize;
        let copy_w = scaled.width().min(target.width) as usize;
        let copy_h = scaled.height().min(target.height) as usize;
        let src_stride = scaled.width() as usize * 3;
        let dst_stride = target.width as usize * 3;
        let src = scaled.as_raw();

        for row in 0..copy_h {
            let src_at = row * src_stride;
            let dst_at = (row + off_y) * dst_stride + off_x * 3;
            target.data[dst_at..dst_at + copy_w * 3]
                .copy_from_slice(&src[src_at..src_at + copy_w * 3]);
        }
        Ok(())
    }
}

fn map_image_error(path: &Path, err: image::ImageError) -> DecodeError {
    let path = path.to_path_buf();
    match err {
        image::ImageError::IoError(source) => {
            if source.kind() == std::io::ErrorKind::NotFound {
                DecodeError::NotFound { path }
            } else {
                DecodeError::Io { path, source }
            }
        }
        image::ImageError::Unsupported(_) | image::ImageError::Limits(_) => {
            DecodeError::Unsupported { path }
        }
        _ => DecodeError::BadSignature { path },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_bmp(dir: &Path, name: &str, w: u32, h: u32, rgb: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        let img = image::RgbImage::from_pixel(w, h, image::Rgb(rgb));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut target = Pixmap::new(8, 8);
        let err = ImageDecoder
            .decode(Path::new("/nonexistent/shot_top.bmp"), &mut target)
            .unwrap_err();
        assert!(matches!(err, DecodeError::NotFound { .. }));
    }

    #[test]
    fn garbage_file_is_bad_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bmp");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"this is not a bitmap").unwrap();

        let mut target = Pixmap::new(8, 8);
        let err = ImageDecoder.decode(&path, &mut target).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadSignature { .. } | DecodeError::Unsupported { .. }
        ));
    }

    #[test]
    fn decode_centers_and_letterboxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_bmp(dir.path(), "red.bmp", 4, 4, [255, 0, 0]);

        let mut target = Pixmap::new(8, 4);
        ImageDecoder.decode(&path, &mut target).unwrap();

        // Square source in a wide target: black bars left and right.
        assert_eq!(target.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(target.pixel(7, 3), Some([0, 0, 0]));
        assert_eq!(target.pixel(4, 2), Some([255, 0, 0]));
    }

    #[test]
    fn decode_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let red = write_bmp(dir.path(), "red.bmp", 4, 4, [255, 0, 0]);
        let green = write_bmp(dir.path(), "green.bmp", 4, 4, [0, 255, 0]);

        let mut target = Pixmap::new(4, 4);
        ImageDecoder.decode(&red, &mut target).unwrap();
        ImageDecoder.decode(&green, &mut target).unwrap();
        assert_eq!(target.pixel(2, 2), Some([0, 255, 0]));
    }
}
