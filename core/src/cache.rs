use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::debug;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use uuid::Uuid;

use crate::Config;

#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub count: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageCacheSettings {
    pub full: TierLimits,
    pub thumbnails: TierLimits,
    pub thumbnail_size: (u32, u32),
}

impl ImageCacheSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            full: TierLimits {
                count: config.image_cache_count,
                bytes: config.image_cache_bytes,
            },
            thumbnails: TierLimits {
                count: config.thumbnail_cache_count,
                bytes: config.thumbnail_cache_bytes,
            },
            thumbnail_size: (config.thumbnail_width, config.thumbnail_height),
        }
    }
}

impl Default for ImageCacheSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// LRU bounded by entry count and by total decoded pixel bytes.
struct Tier {
    entries: LruCache<Uuid, Arc<RgbaImage>>,
    bytes: usize,
    byte_budget: usize,
}

impl Tier {
    fn new(limits: TierLimits) -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(limits.count).unwrap_or(NonZeroUsize::MIN),
            ),
            bytes: 0,
            byte_budget: limits.bytes,
        }
    }

    fn put(&mut self, id: Uuid, image: Arc<RgbaImage>) {
        let cost = image_cost(&image);
        if cost > self.byte_budget {
            debug!("Image {} ({} bytes) exceeds cache budget, not cached", id, cost);
            return;
        }

        // push hands back either the replaced value or the evicted LRU value
        if let Some((_, old)) = self.entries.push(id, image) {
            self.bytes -= image_cost(&old);
        }
        self.bytes += cost;

        while self.bytes > self.byte_budget {
            match self.entries.pop_lru() {
                Some((_, old)) => self.bytes -= image_cost(&old),
                None => break,
            }
        }
    }

    fn pop(&mut self, id: &Uuid) {
        if let Some(old) = self.entries.pop(id) {
            self.bytes -= image_cost(&old);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }
}

fn image_cost(image: &RgbaImage) -> usize {
    image.as_raw().len()
}

/// Two-tier decoded image cache keyed by entry identifier.
///
/// Cloning yields another handle onto the same tiers, so the engine and any
/// presentation layer can share one instance.
#[derive(Clone)]
pub struct ImageStore {
    full: Arc<RwLock<Tier>>,
    thumbnails: Arc<RwLock<Tier>>,
    thumbnail_size: (u32, u32),
}

impl ImageStore {
    pub fn new(settings: ImageCacheSettings) -> Self {
        Self {
            full: Arc::new(RwLock::new(Tier::new(settings.full))),
            thumbnails: Arc::new(RwLock::new(Tier::new(settings.thumbnails))),
            thumbnail_size: settings.thumbnail_size,
        }
    }

    /// Full-resolution image for `id`, decoding `bytes` on a miss.
    pub fn image(&self, id: Uuid, bytes: Option<&[u8]>) -> Option<Arc<RgbaImage>> {
        if let Some(cached) = self.full.write().entries.get(&id) {
            return Some(cached.clone());
        }

        let decoded = Arc::new(decode(id, bytes?)?);
        self.full.write().put(id, decoded.clone());
        Some(decoded)
    }

    /// Fixed-size thumbnail for `id`, decoding and scaling `bytes` on a miss.
    pub fn thumbnail(&self, id: Uuid, bytes: Option<&[u8]>) -> Option<Arc<RgbaImage>> {
        if let Some(cached) = self.thumbnails.write().entries.get(&id) {
            return Some(cached.clone());
        }

        // reuse a decoded original when one is already resident
        let original = self.full.read().entries.peek(&id).cloned();
        let original = match original {
            Some(img) => img,
            None => Arc::new(decode(id, bytes?)?),
        };

        let (width, height) = self.thumbnail_size;
        let thumb = Arc::new(imageops::resize(
            original.as_ref(),
            width,
            height,
            FilterType::Nearest,
        ));
        self.thumbnails.write().put(id, thumb.clone());
        Some(thumb)
    }

    /// Drop both tiers' entries for identifiers that left the history.
    pub fn forget(&self, ids: &[Uuid]) {
        let mut full = self.full.write();
        let mut thumbnails = self.thumbnails.write();
        for id in ids {
            full.pop(id);
            thumbnails.pop(id);
        }
    }

    pub fn clear_all(&self) {
        self.full.write().clear();
        self.thumbnails.write().clear();
    }

    pub fn contains_image(&self, id: &Uuid) -> bool {
        self.full.read().entries.contains(id)
    }

    pub fn contains_thumbnail(&self, id: &Uuid) -> bool {
        self.thumbnails.read().entries.contains(id)
    }

    pub fn image_count(&self) -> usize {
        self.full.read().entries.len()
    }

    pub fn thumbnail_count(&self) -> usize {
        self.thumbnails.read().entries.len()
    }

    pub fn resident_bytes(&self) -> usize {
        self.full.read().bytes + self.thumbnails.read().bytes
    }
}

fn decode(id: Uuid, bytes: &[u8]) -> Option<RgbaImage> {
    match image::load_from_memory(bytes) {
        Ok(img) => Some(img.to_rgba8()),
        Err(e) => {
            debug!("Failed to decode image for {}: {}", id, e);
            None
        }
    }
}
