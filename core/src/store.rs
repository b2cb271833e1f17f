use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::ClipboardEntry;

/// JSON persistence for the history list.
///
/// Every save writes a full snapshot, so a save that was overtaken by a later
/// one is skipped rather than written out of order.
#[derive(Clone)]
pub struct HistoryStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    issued: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
            issued: Arc::new(AtomicU64::new(0)),
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted list; any failure yields an empty history.
    pub fn load(&self) -> Vec<ClipboardEntry> {
        match self.read() {
            Ok(items) => {
                info!("Loaded {} history entries from {}", items.len(), self.path.display());
                items
            }
            Err(e) => {
                let missing = e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == ErrorKind::NotFound);
                if missing {
                    debug!("No history at {}, starting empty", self.path.display());
                } else {
                    warn!("Discarding unreadable history: {:#}", e);
                }
                Vec::new()
            }
        }
    }

    fn read(&self) -> Result<Vec<ClipboardEntry>> {
        let data = fs::read(&self.path)?;
        let items = serde_json::from_slice(&data)
            .with_context(|| format!("Malformed history file {}", self.path.display()))?;
        Ok(items)
    }

    /// Persist a snapshot off the calling task. Failures are logged only.
    pub fn save(&self, items: Vec<ClipboardEntry>) {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let store = self.clone();
        let job = move || store.write_ticket(ticket, &items);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            // no runtime (tests, one-shot tools): write inline
            Err(_) => job(),
        }
    }

    fn write_ticket(&self, ticket: u64, items: &[ClipboardEntry]) {
        let _guard = self.write_lock.lock();
        if self.written.load(Ordering::SeqCst) > ticket {
            debug!("Skipping superseded history save #{}", ticket);
            return;
        }

        match self.write_atomic(items) {
            Ok(()) => {
                self.written.store(ticket, Ordering::SeqCst);
                debug!("Saved {} history entries (#{})", items.len(), ticket);
            }
            Err(e) => warn!("Failed to save history: {:#}", e),
        }
    }

    /// Synchronous save, used when flushing on shutdown.
    pub fn save_blocking(&self, items: &[ClipboardEntry]) -> Result<()> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.write_lock.lock();
        self.write_atomic(items)?;
        self.written.store(ticket, Ordering::SeqCst);
        Ok(())
    }

    fn write_atomic(&self, items: &[ClipboardEntry]) -> Result<()> {
        let data = serde_json::to_vec(items).context("Failed to serialize history")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> HistoryStore {
        HistoryStore::new(dir.path().join("Clipboard").join("history.json"))
    }

    fn mixed_items(n: usize) -> Vec<ClipboardEntry> {
        (0..n)
            .map(|i| {
                let mut entry = if i % 3 == 0 {
                    ClipboardEntry::image(vec![0xFF, 0xD8, i as u8, 42, 7])
                } else {
                    ClipboardEntry::text(format!("entry {}", i))
                };
                entry.pinned = i % 4 == 0;
                entry
            })
            .collect()
    }

    fn assert_same_content(a: &[ClipboardEntry], b: &[ClipboardEntry]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.kind, y.kind);
            assert_eq!(x.text, y.text);
            assert_eq!(x.image_data, y.image_data);
            assert_eq!(x.pinned, y.pinned);
            assert_eq!(x.dedup_key(), y.dedup_key());
            assert_eq!(x.date_added, y.date_added);
        }
    }

    #[test]
    fn round_trip_for_various_sizes() {
        for n in [0, 1, 30] {
            let dir = TempDir::new().unwrap();
            let store = store_in(&dir);
            let items = mixed_items(n);

            store.save_blocking(&items).unwrap();
            let loaded = store.load();

            assert_same_content(&items, &loaded);
        }
    }

    #[test]
    fn save_without_runtime_writes_inline() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let items = mixed_items(3);

        store.save(items.clone());

        assert_same_content(&items, &store.load());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn save_inside_runtime_is_offloaded() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let items = mixed_items(2);

        store.save(items.clone());

        for _ in 0..100 {
            if store.path().exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_same_content(&items, &store.load());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().is_empty());
    }

    #[test]
    fn truncated_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save_blocking(&mixed_items(5)).unwrap();

        let data = fs::read(store.path()).unwrap();
        fs::write(store.path(), &data[..data.len() / 2]).unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn non_json_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), b"\x00\x01 definitely not json").unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn reads_hand_written_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[
                {"id":"0b7e6c1a-1d2f-4e3a-8b9c-0d1e2f3a4b5c","kind":"text","text":"hi",
                 "dateAdded":"2026-01-15T10:00:00Z","pinned":false},
                {"id":"1c8f7d2b-2e3a-4f4b-9cad-1e2f3a4b5c6d","kind":"image","imageData":"AQIDBA==",
                 "dateAdded":"2026-01-15T10:00:01Z","pinned":true}
            ]"#,
        )
        .unwrap();

        let items = store.load();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, EntryKind::Text);
        assert_eq!(items[0].dedup_key(), "hi");
        assert_eq!(items[1].image_data.as_deref(), Some(&[1u8, 2, 3, 4][..]));
        assert!(items[1].pinned);
        assert_eq!(items[1].dedup_key(), "4-01020304");
    }

    #[test]
    fn stale_ticket_does_not_overwrite_newer_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let newer = mixed_items(2);

        store.save_blocking(&newer).unwrap();
        // a snapshot issued before the blocking save lands late
        store.write_ticket(0, &mixed_items(7));

        assert_same_content(&newer, &store.load());
    }
}
