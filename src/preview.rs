use std::collections::HashSet;
use std::sync::Arc;

use image::imageops::FilterType;
use tracing::debug;

use crate::models::SelectedFile;

/// Edge length, in pixels, of the box the thumbnail is scaled into.
pub const THUMBNAIL_SIZE: u32 = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pixels: Vec<[u8; 3]>,
}

impl Thumbnail {
    /// Decodes the bytes and scales them down, keeping the aspect ratio.
    /// Returns `None` when the bytes are not a decodable image.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let img = image::load_from_memory(bytes).ok()?;
        let rgb = img
            .resize(THUMBNAIL_SIZE, THUMBNAIL_SIZE, FilterType::Triangle)
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = rgb.pixels().map(|p| p.0).collect();
        Some(Self { width, height, pixels })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }
}

/// Display-only handle for a selected file.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewReference {
    pub id: u64,
    pub file_name: String,
    pub size: usize,
    pub thumbnail: Option<Arc<Thumbnail>>,
}

impl PreviewReference {
    pub fn handle(&self) -> String {
        format!("preview:{}/{}", self.id, self.file_name)
    }
}

/// Hands out preview handles and tracks which of them are still live.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    next_id: u64,
    live: HashSet<u64>,
}

impl PreviewRegistry {
    /// Registers a fresh handle for `file`. The thumbnail is decoded by the
    /// caller so that this stays cheap enough to run under the state lock.
    pub fn create(&mut self, file: &SelectedFile, thumbnail: Option<Arc<Thumbnail>>) -> PreviewReference {
        self.next_id += 1;
        let id = self.next_id;
        self.live.insert(id);
        let preview = PreviewReference {
            id,
            file_name: file.name.clone(),
            size: file.size(),
            thumbnail,
        };
        debug!(handle = %preview.handle(), decoded = preview.thumbnail.is_some(), "created preview");
        preview
    }

    pub fn release(&mut self, preview: &PreviewReference) {
        if self.live.remove(&preview.id) {
            debug!(id = preview.id, "released preview");
        }
    }

    #[cfg(test)]
    pub fn is_live(&self, id: u64) -> bool {
        self.live.contains(&id)
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn tiny_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, _| {
            if x < width / 2 { Rgb([255u8, 0, 0]) } else { Rgb([0u8, 0, 255]) }
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn thumbnail_fits_the_box_and_keeps_aspect() {
        let thumb = Thumbnail::from_bytes(&tiny_png(128, 64)).unwrap();
        assert_eq!((thumb.width, thumb.height), (32, 16));
        let left = thumb.pixel(0, 0).unwrap();
        let right = thumb.pixel(31, 15).unwrap();
        assert!(left[0] > 200 && left[2] < 50);
        assert!(right[2] > 200 && right[0] < 50);
        assert_eq!(thumb.pixel(32, 0), None);
    }

    #[test]
    fn garbage_bytes_have_no_thumbnail() {
        assert!(Thumbnail::from_bytes(b"definitely not an image").is_none());
    }

    #[test]
    fn handles_are_fresh_and_released_once() {
        let mut registry = PreviewRegistry::default();
        let file = SelectedFile::new("a.png", "image/png", tiny_png(4, 4));
        let first = registry.create(&file, None);
        let second = registry.create(&file, Thumbnail::from_bytes(&file.bytes).map(Arc::new));
        assert_ne!(first.id, second.id);
        assert_eq!(first.handle(), format!("preview:{}/a.png", first.id));
        assert_eq!(registry.live_count(), 2);
        assert!(first.thumbnail.is_none());
        assert!(second.thumbnail.is_some());

        registry.release(&first);
        registry.release(&first);
        assert!(!registry.is_live(first.id));
        assert!(registry.is_live(second.id));
        assert_eq!(registry.live_count(), 1);
    }
}
