//! In-memory stand-ins for the platform collaborators.

use anyhow::{Result, bail};
use image::RgbaImage;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::platform::{ClipboardBackend, PasteSimulator, Revision};
use crate::snapshot::ImageSources;

#[derive(Default)]
struct ClipState {
    revision: u64,
    // derive the revision from the contents, like the arboard backend
    content_revision: bool,
    text: Option<String>,
    images: ImageSources,
    written_images: Vec<RgbaImage>,
    fail_writes: bool,
    // hold our own writes back until the test publishes them
    defer_publish: bool,
    deferred: Option<(Option<String>, ImageSources)>,
}

impl ClipState {
    fn set_contents(&mut self, text: Option<String>, images: ImageSources) {
        self.text = text;
        self.images = images;
        self.revision += 1;
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeClipboard(Arc<Mutex<ClipState>>);

impl FakeClipboard {
    /// A clipboard whose revision is a hash of what it holds, so writing
    /// the same contents again yields the same revision.
    pub fn content_addressed() -> Self {
        let clipboard = Self::default();
        clipboard.0.lock().content_revision = true;
        clipboard
    }

    pub fn copy_text(&self, text: &str) {
        self.0
            .lock()
            .set_contents(Some(text.to_string()), ImageSources::default());
    }

    pub fn copy_image(&self, pixels: RgbaImage, fallback: Option<&str>) {
        let images = ImageSources {
            pixels: Some(pixels),
            ..Default::default()
        };
        self.0.lock().set_contents(fallback.map(str::to_string), images);
    }

    pub fn copy_nothing(&self) {
        self.0.lock().set_contents(None, ImageSources::default());
    }

    pub fn publish_deferred(&self) {
        let mut s = self.0.lock();
        if let Some((text, images)) = s.deferred.take() {
            s.set_contents(text, images);
        }
    }

    pub fn text(&self) -> Option<String> {
        self.0.lock().text.clone()
    }

    pub fn set_defer_publish(&self, defer: bool) {
        self.0.lock().defer_publish = defer;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.0.lock().fail_writes = fail;
    }

    pub fn written_images(&self) -> Vec<RgbaImage> {
        self.0.lock().written_images.clone()
    }

    fn write(&self, text: Option<String>, images: ImageSources) -> Result<()> {
        let mut s = self.0.lock();
        if s.fail_writes {
            bail!("clipboard locked");
        }
        if s.defer_publish {
            s.deferred = Some((text, images));
        } else {
            s.set_contents(text, images);
        }
        Ok(())
    }
}

impl ClipboardBackend for FakeClipboard {
    fn revision(&mut self) -> Revision {
        let s = self.0.lock();
        if !s.content_revision {
            return Revision::new(s.revision.to_string());
        }

        let mut hasher = blake3::Hasher::new();
        if let Some(text) = &s.text {
            hasher.update(b"text\0");
            hasher.update(text.as_bytes());
        }
        if let Some(pixels) = &s.images.pixels {
            hasher.update(b"image\0");
            hasher.update(pixels.as_raw());
        }
        Revision::new(hasher.finalize().to_hex().to_string())
    }

    fn read_text(&mut self) -> Option<String> {
        self.0.lock().text.clone()
    }

    fn read_image_sources(&mut self) -> ImageSources {
        self.0.lock().images.clone()
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.write(Some(text.to_string()), ImageSources::default())
    }

    fn write_image(&mut self, image: &RgbaImage) -> Result<()> {
        let images = ImageSources {
            pixels: Some(image.clone()),
            ..Default::default()
        };
        self.write(None, images)?;
        self.0.lock().written_images.push(image.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct CountingPaste(Arc<AtomicUsize>);

impl CountingPaste {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl PasteSimulator for CountingPaste {
    fn simulate_paste(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
