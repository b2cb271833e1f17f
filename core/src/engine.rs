//! The clipboard history state machine.
//!
//! A single owner drives every mutation: the periodic [`HistoryEngine::poll`]
//! tick and user commands arrive on the same control flow, so the list needs
//! no locking. Saves are debounced and written off that flow from a snapshot.

use anyhow::{Result, anyhow, bail};
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::Config;
use crate::cache::ImageStore;
use crate::entry::{ClipboardEntry, EntryKind};
use crate::platform::{ClipboardBackend, PasteSimulator, Revision};
use crate::snapshot::{self, Captured};
use crate::store::HistoryStore;

const EVENT_CAPACITY: usize = 64;
const MIN_ID_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEvent {
    Changed,
    VisibilityChanged(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_unpinned: usize,
    pub save_debounce: Duration,
    pub jpeg_quality: u8,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_unpinned: config.max_unpinned,
            save_debounce: Duration::from_millis(config.save_debounce_ms),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct HistoryEngine {
    items: Vec<ClipboardEntry>,
    clipboard: Box<dyn ClipboardBackend>,
    paste: Box<dyn PasteSimulator>,
    images: ImageStore,
    store: HistoryStore,
    settings: EngineSettings,
    last_revision: Revision,
    suppress_next_capture: bool,
    save_due: Option<Instant>,
    visible: bool,
    events: broadcast::Sender<HistoryEvent>,
}

impl HistoryEngine {
    /// Load persisted history and take the clipboard's current revision as
    /// already seen, so content present at startup is not captured.
    pub fn new(
        settings: EngineSettings,
        mut clipboard: Box<dyn ClipboardBackend>,
        paste: Box<dyn PasteSimulator>,
        images: ImageStore,
        store: HistoryStore,
    ) -> Self {
        let items = store.load();
        let last_revision = clipboard.revision();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            items,
            clipboard,
            paste,
            images,
            store,
            settings,
            last_revision,
            suppress_next_capture: false,
            save_due: None,
            visible: false,
            events,
        }
    }

    pub fn items(&self) -> &[ClipboardEntry] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&ClipboardEntry> {
        self.items.iter().find(|e| e.id == id)
    }

    pub fn pinned(&self) -> impl Iterator<Item = &ClipboardEntry> {
        self.items.iter().filter(|e| e.pinned)
    }

    pub fn unpinned(&self) -> impl Iterator<Item = &ClipboardEntry> {
        self.items.iter().filter(|e| !e.pinned)
    }

    pub fn search(&self, query: &str) -> Vec<&ClipboardEntry> {
        self.items.iter().filter(|e| e.matches(query)).collect()
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Resolve a full identifier or an unambiguous prefix of one.
    pub fn resolve(&self, id_or_prefix: &str) -> Result<Uuid> {
        if let Ok(id) = Uuid::parse_str(id_or_prefix) {
            return Ok(id);
        }
        if id_or_prefix.len() < MIN_ID_PREFIX_LEN {
            bail!(
                "Identifier prefix must be at least {} characters",
                MIN_ID_PREFIX_LEN
            );
        }

        let prefix = id_or_prefix.to_ascii_lowercase();
        let mut matches = self
            .items
            .iter()
            .filter(|e| e.id.to_string().starts_with(&prefix));

        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(entry.id),
            (Some(_), Some(_)) => bail!("Identifier prefix {} is ambiguous", id_or_prefix),
            (None, _) => Err(anyhow!("No entry matches {}", id_or_prefix)),
        }
    }

    /// Capture the clipboard if its revision moved since the last look.
    pub fn poll(&mut self) {
        let current = self.clipboard.revision();
        if current == self.last_revision {
            return;
        }
        self.last_revision = current;
        self.capture_from_clipboard();
    }

    pub fn capture_from_clipboard(&mut self) {
        // our own copy_to_clipboard write
        if self.suppress_next_capture {
            self.suppress_next_capture = false;
            debug!("Ignoring self-initiated clipboard change");
            return;
        }

        let images = self.clipboard.read_image_sources();
        let text = self.clipboard.read_text();

        match snapshot::capture(images, text, self.settings.jpeg_quality) {
            Some(Captured::Text(text)) => self.insert(ClipboardEntry::text(text)),
            Some(Captured::Image(jpeg)) => {
                debug!("Captured image ({} bytes)", jpeg.len());
                self.insert(ClipboardEntry::image(jpeg))
            }
            None => debug!("Clipboard change carried no supported content"),
        }
    }

    /// Insert at the head, collapsing any entry with the same dedup key.
    ///
    /// A re-inserted duplicate keeps the identifier, capture time and pin of
    /// the entry already in the list; it only moves to the head.
    pub fn insert(&mut self, mut entry: ClipboardEntry) {
        let mut survivor: Option<ClipboardEntry> = None;
        while let Some(idx) = self
            .items
            .iter()
            .position(|e| e.dedup_key() == entry.dedup_key())
        {
            let mut existing = self.items.remove(idx);
            if survivor.is_none() {
                survivor = Some(existing);
            } else {
                self.images.forget(&[existing.id]);
                existing.scrub();
            }
        }

        let head = match survivor {
            Some(existing) => {
                entry.scrub();
                existing
            }
            None => entry,
        };
        self.items.insert(0, head);

        let evicted = self.evict_overflow();
        if !evicted.is_empty() {
            debug!("Evicted {} entries over capacity", evicted.len());
            self.images.forget(&evicted);
        }

        self.changed();
    }

    // Trim unpinned entries from the tail until the unpinned bound holds.
    fn evict_overflow(&mut self) -> Vec<Uuid> {
        let mut unpinned = self.items.iter().filter(|e| !e.pinned).count();
        let mut evicted = Vec::new();

        while unpinned > self.settings.max_unpinned {
            let Some(idx) = self.items.iter().rposition(|e| !e.pinned) else {
                break;
            };
            let mut entry = self.items.remove(idx);
            evicted.push(entry.id);
            entry.scrub();
            unpinned -= 1;
        }

        evicted
    }

    /// Write an entry back to the system clipboard without re-capturing it.
    ///
    /// Returns whether the clipboard was written; failures are logged.
    pub fn copy_to_clipboard(&mut self, id: Uuid) -> bool {
        // take the payload first, the poll below may evict the entry
        let Some(entry) = self.get(id).cloned() else {
            warn!("Copy requested for unknown entry {}", id);
            return false;
        };

        // observe anything copied since the last tick before overwriting it
        self.poll();
        let before = self.last_revision.clone();
        let held_text = self.clipboard.read_text();
        let held_pixels = self.clipboard.read_image_sources().pixels;

        self.suppress_next_capture = true;
        let (written, unchanged) = match entry.kind {
            EntryKind::Text => {
                let text = entry.text.as_deref().unwrap_or_default();
                let unchanged = held_pixels.is_none() && held_text.as_deref() == Some(text);
                (self.clipboard.write_text(text), unchanged)
            }
            EntryKind::Image => match self.images.image(entry.id, entry.image_data.as_deref()) {
                Some(img) => {
                    let unchanged = held_pixels.as_ref() == Some(&*img);
                    (self.clipboard.write_image(&img), unchanged)
                }
                None => (
                    Err(anyhow!("Image for entry {} could not be decoded", entry.id)),
                    false,
                ),
            },
        };

        if let Err(e) = written {
            self.suppress_next_capture = false;
            warn!("Failed to copy entry to clipboard: {:#}", e);
            return false;
        }

        // Adopt the revision our write produced. Rewriting what the clipboard
        // already held publishes no new revision, so there is nothing to
        // swallow. Otherwise an unchanged revision means the platform has not
        // published the write yet and the armed flag swallows it on a later poll.
        let after = self.clipboard.revision();
        if after != before || unchanged {
            self.last_revision = after;
            self.suppress_next_capture = false;
        }

        debug!("Copied entry {} to clipboard", id);
        true
    }

    pub fn paste_into_active_application(&mut self) {
        self.paste.simulate_paste();
    }

    pub fn pin(&mut self, id: Uuid) -> bool {
        self.set_pinned(id, true)
    }

    pub fn unpin(&mut self, id: Uuid) -> bool {
        self.set_pinned(id, false)
    }

    fn set_pinned(&mut self, id: Uuid, pinned: bool) -> bool {
        match self.items.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.pinned = pinned;
                self.changed();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        match self.items.iter().position(|e| e.id == id) {
            Some(idx) => {
                let mut entry = self.items.remove(idx);
                self.images.forget(&[entry.id]);
                entry.scrub();
                self.changed();
                true
            }
            None => false,
        }
    }

    /// Remove every unpinned entry; survivors keep their order.
    pub fn clear_unpinned(&mut self) {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.items.len());
        for mut entry in self.items.drain(..) {
            if entry.pinned {
                kept.push(entry);
            } else {
                removed.push(entry.id);
                entry.scrub();
            }
        }
        self.items = kept;

        self.images.forget(&removed);
        info!("Cleared {} unpinned entries", removed.len());
        self.changed();
    }

    /// Flip popover visibility; hiding releases decoded images.
    pub fn toggle_visibility(&mut self) {
        self.visible = !self.visible;
        if !self.visible {
            self.images.clear_all();
        }
        let _ = self.events.send(HistoryEvent::VisibilityChanged(self.visible));
    }

    fn changed(&mut self) {
        self.schedule_save();
        let _ = self.events.send(HistoryEvent::Changed);
    }

    // A pending save already covers later mutations.
    fn schedule_save(&mut self) {
        if self.save_due.is_none() {
            self.save_due = Some(Instant::now() + self.settings.save_debounce);
        }
    }

    pub fn save_deadline(&self) -> Option<Instant> {
        self.save_due
    }

    /// Hand a snapshot to the store once the debounce window has elapsed.
    pub fn flush_if_due(&mut self, now: Instant) -> bool {
        match self.save_due {
            Some(due) if due <= now => {
                self.save_due = None;
                self.store.save(self.items.clone());
                true
            }
            _ => false,
        }
    }

    /// Write any pending save synchronously, for shutdown.
    pub fn flush_pending(&mut self) -> Result<()> {
        if self.save_due.take().is_some() {
            self.store.save_blocking(&self.items)?;
        }
        Ok(())
    }
}
