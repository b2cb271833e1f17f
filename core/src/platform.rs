//! Platform collaborators: the system clipboard and paste keystroke synthesis.
//!
//! The engine only talks to the [`ClipboardBackend`] and [`PasteSimulator`]
//! traits so it can run headless against in-memory fakes.

use anyhow::{Context, Result, anyhow};
use arboard::{Clipboard, ImageData};
use blake3::Hasher;
use image::RgbaImage;
use log::{debug, warn};
use std::path::PathBuf;
use url::Url;

use crate::snapshot::ImageSources;

/// Opaque clipboard revision marker; only equality is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

pub trait ClipboardBackend: Send {
    fn revision(&mut self) -> Revision;
    fn read_text(&mut self) -> Option<String>;
    fn read_image_sources(&mut self) -> ImageSources;
    fn write_text(&mut self, text: &str) -> Result<()>;
    fn write_image(&mut self, image: &RgbaImage) -> Result<()>;
}

pub trait PasteSimulator: Send {
    /// Fire-and-forget paste chord into whichever application has focus.
    fn simulate_paste(&mut self);
}

/// System clipboard via `arboard`.
///
/// arboard exposes no change counter, so the revision is a fingerprint of
/// the current text and image payload.
pub struct SystemClipboard {
    clipboard: Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self> {
        let clipboard = Clipboard::new().context("Failed to initialize clipboard")?;
        Ok(Self { clipboard })
    }
}

impl ClipboardBackend for SystemClipboard {
    fn revision(&mut self) -> Revision {
        let mut hasher = Hasher::new();

        if let Ok(text) = self.clipboard.get_text() {
            hasher.update(b"text\0");
            hasher.update(text.as_bytes());
        }
        if let Ok(img) = self.clipboard.get_image() {
            hasher.update(b"image\0");
            hasher.update(&(img.width as u64).to_le_bytes());
            hasher.update(&(img.height as u64).to_le_bytes());
            hasher.update(&img.bytes);
        }

        Revision(hasher.finalize().to_hex().to_string())
    }

    fn read_text(&mut self) -> Option<String> {
        match self.clipboard.get_text() {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("No text on clipboard: {}", e);
                None
            }
        }
    }

    fn read_image_sources(&mut self) -> ImageSources {
        let pixels = match self.clipboard.get_image() {
            Ok(img) => RgbaImage::from_raw(img.width as u32, img.height as u32, img.bytes.into_owned()),
            Err(e) => {
                debug!("No image on clipboard: {}", e);
                None
            }
        };

        let file_urls = self
            .clipboard
            .get_text()
            .map(|text| file_urls_in(&text))
            .unwrap_or_default();

        ImageSources {
            pixels,
            file_urls,
            ..Default::default()
        }
    }

    fn write_text(&mut self, text: &str) -> Result<()> {
        self.clipboard
            .set_text(text)
            .context("Failed to write text to clipboard")
    }

    fn write_image(&mut self, image: &RgbaImage) -> Result<()> {
        let data = ImageData {
            width: image.width() as usize,
            height: image.height() as usize,
            bytes: image.as_raw().as_slice().into(),
        };
        self.clipboard
            .set_image(data)
            .context("Failed to write image to clipboard")
    }
}

/// File managers put copied files on the clipboard as `file://` URI lines.
pub fn file_urls_in(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("file://"))
        .filter_map(|line| Url::parse(line).ok()?.to_file_path().ok())
        .collect()
}

/// Paste chord through `enigo`: Cmd+V on macOS, Ctrl+V elsewhere.
#[derive(Default)]
pub struct KeystrokePaste;

impl KeystrokePaste {
    fn press_chord() -> Result<()> {
        use enigo::{Direction, Enigo, Key, Keyboard, Settings};

        #[cfg(target_os = "macos")]
        let modifier = Key::Meta;
        #[cfg(not(target_os = "macos"))]
        let modifier = Key::Control;

        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow!("Failed to open input connection: {}", e))?;
        enigo
            .key(modifier, Direction::Press)
            .map_err(|e| anyhow!("Failed to press modifier: {}", e))?;
        let clicked = enigo
            .key(Key::Unicode('v'), Direction::Click)
            .map_err(|e| anyhow!("Failed to press V: {}", e));
        // always release the modifier, even if the click failed
        enigo
            .key(modifier, Direction::Release)
            .map_err(|e| anyhow!("Failed to release modifier: {}", e))?;
        clicked
    }
}

impl PasteSimulator for KeystrokePaste {
    fn simulate_paste(&mut self) {
        std::thread::spawn(|| {
            if let Err(e) = Self::press_chord() {
                warn!("Paste simulation failed: {:#}", e);
            } else {
                debug!("Simulated paste keystroke");
            }
        });
    }
}
