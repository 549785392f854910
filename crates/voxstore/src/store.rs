//! Storage engine implementation
//!
//! Directory layout:
//! - `index.vox`: metadata index (see [`crate::format`])
//! - `<fingerprint>-<stamp>.pcm`: one audio payload per entry
//! - `*.tmp`: writes in flight, swept on load
//!
//! Durable steps are ordered so the index never names a missing payload:
//! payload before index on insert, index before payload on removal. A crash
//! can at worst leave an orphan payload or a torn last index line, which the
//! next load deletes.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::entry::{wall_micros, CacheEntry, Slot, StoreClock};
use crate::error::{Error, Result};
use crate::evict::{Candidate, EvictionPolicy};
use crate::format::{decode_index, encode_index, encode_record, DecodedIndex, IndexRecord};
use crate::key::CacheKey;

/// Index file name inside the cache directory
pub const INDEX_FILE: &str = "index.vox";

const PAYLOAD_EXT: &str = "pcm";
const TMP_EXT: &str = "tmp";

/// How far past the wall clock a loaded stamp may lie before the record is
/// treated as corrupt
const MAX_STAMP_SKEW_MICROS: u64 = 3_600_000_000;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Result of a [`AudioStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Entry written; `evicted` older entries were removed to make room
    Stored {
        /// Entries removed by the eviction pass
        evicted: usize,
    },
    /// Key was already stored; the offered bytes were discarded
    AlreadyPresent,
}

/// What the load pass of [`AudioStore::open_with_report`] found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries in the index after loading
    pub loaded: usize,
    /// Records dropped as unreadable, duplicated or missing their payload
    pub dropped: usize,
    /// Stray payload and temp files deleted
    pub orphans_removed: usize,
    /// Entries evicted because the index exceeded the cap
    pub evicted: usize,
}

#[derive(Default)]
struct Index {
    slots: HashMap<CacheKey, Slot, RandomState>,
    total_bytes: u64,
    /// The on-disk index is complete and newline-terminated, so new records
    /// may be appended instead of rewriting the whole file
    appendable: bool,
}

impl Index {
    fn candidates(&self) -> impl Iterator<Item = Candidate<'_>> {
        self.slots.iter().map(|(key, slot)| Candidate {
            key,
            size: slot.size,
            last_used_at: slot.last_used_at(),
            created_at: slot.created_at,
        })
    }

    fn records(&self) -> Vec<IndexRecord> {
        let mut records: Vec<IndexRecord> = self
            .slots
            .iter()
            .map(|(key, slot)| slot.to_record(key))
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

/// Durable store of audio payloads keyed by [`CacheKey`]
pub struct AudioStore {
    /// Path to the cache directory
    path: PathBuf,

    /// Size cap and eviction target
    policy: EvictionPolicy,

    /// In-memory index. Writers (put, remove, eviction) take it exclusively;
    /// hits only need it shared.
    index: RwLock<Index>,

    /// Source of creation and access stamps
    clock: StoreClock,

    /// Hit bookkeeping changed since the index was last written
    dirty: AtomicBool,

    /// Is the store closed?
    closed: AtomicBool,
}

impl AudioStore {
    /// Open or create a store at the given path
    ///
    /// # Arguments
    /// * `path` - Cache directory; created if absent
    /// * `policy` - Size cap and eviction target
    ///
    /// # Returns
    /// * `Result<AudioStore>` - Store handle with the index already loaded
    pub fn open<P: AsRef<Path>>(path: P, policy: EvictionPolicy) -> Result<Self> {
        Self::open_with_report(path, policy).map(|(store, _)| store)
    }

    /// Open or create a store, also returning what the initial load found
    pub fn open_with_report<P: AsRef<Path>>(
        path: P,
        policy: EvictionPolicy,
    ) -> Result<(Self, LoadReport)> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        probe_writable(path)?;

        let store = AudioStore {
            path: path.to_path_buf(),
            policy,
            index: RwLock::new(Index::default()),
            clock: StoreClock::default(),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        let report = store.load()?;
        Ok((store, report))
    }

    /// Build the in-memory index from disk. Runs once, from `open`, before
    /// the store is shared.
    ///
    /// A missing or unreadable index means an empty cache. Records whose
    /// payload is missing or has the wrong size, or whose stamps lie in the
    /// future, are dropped with a warning. Stray payloads and temp files are
    /// deleted afterwards.
    fn load(&self) -> Result<LoadReport> {
        let mut index = self.index.write();
        let mut report = LoadReport::default();
        let mut rewrite = false;

        let decoded = match fs::read(self.index_path()) {
            Ok(bytes) => match decode_index(&bytes) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(error = %e, "cache index unreadable, starting empty");
                    report.dropped += 1;
                    DecodedIndex::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                rewrite = true;
                DecodedIndex::default()
            }
            Err(e) => {
                warn!(error = %e, "failed to read cache index, starting empty");
                rewrite = true;
                DecodedIndex::default()
            }
        };
        report.dropped += decoded.skipped;

        let horizon = wall_micros().saturating_add(MAX_STAMP_SKEW_MICROS);
        let mut fresh = Index::default();
        for record in decoded.records {
            if fresh.slots.contains_key(&record.key) {
                warn!(locator = %record.locator, "dropping duplicate index record");
                report.dropped += 1;
                continue;
            }
            if record.created_at > horizon || record.last_used_at > horizon {
                warn!(
                    locator = %record.locator,
                    created_at = record.created_at,
                    last_used_at = record.last_used_at,
                    "dropping index record stamped in the future"
                );
                report.dropped += 1;
                continue;
            }
            if let Err(e) = self.check_payload(&record.locator, record.size) {
                warn!(locator = %record.locator, error = %e, "dropping index record without usable payload");
                report.dropped += 1;
                continue;
            }

            self.clock
                .advance_past(record.last_used_at.max(record.created_at));
            fresh.total_bytes += record.size;
            let key = record.key.clone();
            fresh.slots.insert(key, Slot::from_record(record));
        }

        let plan = self.policy.plan(fresh.total_bytes, fresh.candidates(), None);
        for victim in &plan.victims {
            if let Some(slot) = fresh.slots.remove(victim) {
                fresh.total_bytes -= slot.size;
            }
        }
        report.evicted = plan.victims.len();
        report.loaded = fresh.slots.len();

        if rewrite || report.dropped > 0 || report.evicted > 0 {
            self.write_index(&fresh.records())?;
        }
        fresh.appendable = true;
        report.orphans_removed = self.sweep_orphans(&fresh);

        *index = fresh;
        self.dirty.store(false, Ordering::Relaxed);

        info!(
            path = %self.path.display(),
            loaded = report.loaded,
            dropped = report.dropped,
            orphans = report.orphans_removed,
            evicted = report.evicted,
            bytes = index.total_bytes,
            "loaded audio cache"
        );
        Ok(report)
    }

    /// Get the audio stored under `key`.
    ///
    /// A hit bumps the entry's last-used stamp and hit count. An entry whose
    /// payload has vanished or shrunk is dropped and reported as absent.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let (locator, err) = {
            let index = self.index.read();
            let slot = match index.slots.get(key) {
                Some(slot) => slot,
                None => return Ok(None),
            };

            match self.read_payload(&slot.locator, slot.size) {
                Ok(audio) => {
                    slot.touch(self.clock.now());
                    self.dirty.store(true, Ordering::Relaxed);
                    return Ok(Some(audio));
                }
                Err(e) => (slot.locator.clone(), e),
            }
        };

        if err.is_not_found() || matches!(err, Error::PayloadMismatch { .. }) {
            warn!(locator = %locator, error = %err, "dropping cache entry with broken payload");
            self.remove_matching(key, Some(locator.as_str()))?;
            return Ok(None);
        }
        Err(err)
    }

    /// Store `audio` under `key`, then run the eviction pass.
    ///
    /// First writer wins: if the key is already present (or another writer
    /// commits it first) the bytes are discarded.
    pub fn put(&self, key: &CacheKey, audio: &[u8]) -> Result<PutOutcome> {
        self.ensure_open()?;

        if self.index.read().slots.contains_key(key) {
            return Ok(PutOutcome::AlreadyPresent);
        }

        let created_at = self.clock.now();
        let size = audio.len() as u64;
        let locator = format!("{}-{}.{}", key.fingerprint(), created_at, PAYLOAD_EXT);
        let payload_path = self.payload_path(&locator);
        write_atomic(&payload_path, audio)?;

        let mut index = self.index.write();
        if index.slots.contains_key(key) {
            drop(index);
            remove_payload(&payload_path);
            return Ok(PutOutcome::AlreadyPresent);
        }

        let incoming = Candidate {
            key,
            size,
            last_used_at: created_at,
            created_at,
        };
        let total = index.total_bytes + size;
        let plan = self
            .policy
            .plan(total, index.candidates().chain(iter::once(incoming)), Some(key));

        let slot = Slot::new(locator, size, created_at);
        let record = slot.to_record(key);

        // Plain inserts append one line; evictions rewrite the whole index
        let append_tried = plan.victims.is_empty() && index.appendable;
        let appended = append_tried
            && match self.append_index(&record) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "index append failed, rewriting index");
                    false
                }
            };

        if !appended {
            let doomed: HashSet<&CacheKey, RandomState> = plan.victims.iter().collect();
            let mut records: Vec<IndexRecord> = index
                .slots
                .iter()
                .filter(|(k, _)| !doomed.contains(k))
                .map(|(k, s)| s.to_record(k))
                .collect();
            records.push(record);

            if let Err(e) = self.write_index(&records) {
                index.appendable = false;
                drop(index);
                // A failed append may still have reached the disk, and then
                // the payload must outlive this call; load sweeps it otherwise.
                if !append_tried {
                    remove_payload(&payload_path);
                }
                return Err(e);
            }
            index.appendable = true;
            self.dirty.store(false, Ordering::Relaxed);
        }

        let mut victim_files = Vec::with_capacity(plan.victims.len());
        for victim in &plan.victims {
            if let Some(old) = index.slots.remove(victim) {
                index.total_bytes -= old.size;
                victim_files.push(self.payload_path(&old.locator));
            }
        }
        index.slots.insert(key.clone(), slot);
        index.total_bytes += size;

        if plan.over_capacity {
            warn!(
                size,
                total = index.total_bytes,
                max = self.policy.max_bytes(),
                "cache over capacity: entry larger than the cap kept until the next insertion"
            );
        }
        drop(index);

        for path in &victim_files {
            remove_payload(path);
        }

        debug!(
            text = key.text(),
            bytes = size,
            evicted = plan.victims.len(),
            freed = plan.freed,
            "stored audio"
        );
        Ok(PutOutcome::Stored {
            evicted: plan.victims.len(),
        })
    }

    /// Remove one entry (index first, then payload)
    ///
    /// # Returns
    /// * `Result<bool>` - Whether the key was present
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.ensure_open()?;
        self.remove_matching(key, None)
    }

    /// Remove every entry
    ///
    /// # Returns
    /// * `Result<usize>` - Number of entries removed
    pub fn clear(&self) -> Result<usize> {
        self.ensure_open()?;

        let mut index = self.index.write();
        self.write_index(&[])?;
        let removed: Vec<Slot> = index.slots.drain().map(|(_, slot)| slot).collect();
        index.total_bytes = 0;
        self.dirty.store(false, Ordering::Relaxed);
        drop(index);

        for slot in &removed {
            remove_payload(&self.payload_path(&slot.locator));
        }
        info!(entries = removed.len(), "cleared audio cache");
        Ok(removed.len())
    }

    /// Check whether `key` is stored (no bookkeeping side effects)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.read().slots.contains_key(key)
    }

    /// Metadata of one entry (no bookkeeping side effects)
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.index.read().slots.get(key).map(|slot| slot.to_entry(key))
    }

    /// Metadata of all entries, least recently used first
    pub fn entries(&self) -> Vec<CacheEntry> {
        let index = self.index.read();
        let mut entries: Vec<CacheEntry> = index
            .slots
            .iter()
            .map(|(key, slot)| slot.to_entry(key))
            .collect();
        entries.sort_by(|a, b| {
            a.last_used_at
                .cmp(&b.last_used_at)
                .then(a.created_at.cmp(&b.created_at))
        });
        entries
    }

    /// Get the number of stored entries
    pub fn len(&self) -> usize {
        self.index.read().slots.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().slots.is_empty()
    }

    /// Sum of all payload sizes
    pub fn total_bytes(&self) -> u64 {
        self.index.read().total_bytes
    }

    /// Eviction thresholds in force
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Cache directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write pending hit bookkeeping to the index
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }

        let index = self.index.write();
        if let Err(e) = self.write_index(&index.records()) {
            self.dirty.store(true, Ordering::Relaxed);
            return Err(e);
        }
        Ok(())
    }

    /// Flush and close the store; further operations fail with `Closed`
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn remove_matching(&self, key: &CacheKey, locator: Option<&str>) -> Result<bool> {
        let mut index = self.index.write();
        let Some(slot) = index.slots.get(key) else {
            return Ok(false);
        };
        if locator.is_some_and(|expected| expected != slot.locator) {
            return Ok(false);
        }

        let records: Vec<IndexRecord> = index
            .slots
            .iter()
            .filter(|(k, _)| *k != key)
            .map(|(k, s)| s.to_record(k))
            .collect();
        self.write_index(&records)?;

        let Some(slot) = index.slots.remove(key) else {
            return Ok(false);
        };
        index.total_bytes -= slot.size;
        drop(index);

        remove_payload(&self.payload_path(&slot.locator));
        debug!(text = key.text(), bytes = slot.size, "removed audio");
        Ok(true)
    }

    fn index_path(&self) -> PathBuf {
        self.path.join(INDEX_FILE)
    }

    fn payload_path(&self, locator: &str) -> PathBuf {
        self.path.join(locator)
    }

    fn write_index(&self, records: &[IndexRecord]) -> Result<()> {
        let image = encode_index(records)?;
        write_atomic(&self.index_path(), &image)
    }

    /// Append one record to the existing index file
    fn append_index(&self, record: &IndexRecord) -> Result<()> {
        let line = encode_record(record)?;
        let mut file = OpenOptions::new().append(true).open(self.index_path())?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn check_payload(&self, locator: &str, expected: u64) -> Result<()> {
        if Path::new(locator).file_name().and_then(|n| n.to_str()) != Some(locator) {
            return Err(Error::Parse(format!("invalid payload locator {:?}", locator)));
        }

        let actual = fs::metadata(self.payload_path(locator))?.len();
        if actual != expected {
            return Err(Error::PayloadMismatch {
                locator: locator.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Read at most one byte past `expected`, so a file that shrank or grew
    /// after it was indexed shows up as a mismatch
    fn read_payload(&self, locator: &str, expected: u64) -> Result<Vec<u8>> {
        let file = File::open(self.payload_path(locator))?;
        let mut audio = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
        file.take(expected.saturating_add(1)).read_to_end(&mut audio)?;

        let actual = audio.len() as u64;
        if actual != expected {
            return Err(Error::PayloadMismatch {
                locator: locator.to_string(),
                expected,
                actual,
            });
        }
        Ok(audio)
    }

    /// Delete payload and temp files the index does not reference
    fn sweep_orphans(&self, index: &Index) -> usize {
        let referenced: HashSet<&str, RandomState> =
            index.slots.values().map(|slot| slot.locator.as_str()).collect();

        let dir = match fs::read_dir(&self.path) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "failed to scan cache directory for orphans");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in dir.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            let ext = path.extension().and_then(|e| e.to_str());
            let orphan = match ext {
                Some(TMP_EXT) => true,
                Some(PAYLOAD_EXT) => !referenced.contains(name),
                _ => false,
            };
            if orphan && path.is_file() {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(file = name, error = %e, "failed to delete orphan file"),
                }
            }
        }
        removed
    }
}

impl Drop for AudioStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to flush audio cache on drop");
        }
    }
}

/// Write `data` to `path` via a temp file in the same directory and a rename,
/// so readers see either the old file or the complete new one.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("payload");
    let tmp_path = parent.join(format!(
        ".{}.{}-{}.{}",
        name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        TMP_EXT
    ));

    let written = (|| -> io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    sync_dir(parent);
    Ok(())
}

/// Make a completed rename durable
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn remove_payload(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(file = %path.display(), error = %e, "failed to delete payload");
        }
    }
}

fn probe_writable(path: &Path) -> Result<()> {
    let probe = path.join(format!(".probe-{}.{}", std::process::id(), TMP_EXT));
    fs::write(&probe, b"")?;
    fs::remove_file(&probe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;
    use std::thread;
    use tempfile::TempDir;

    fn key(text: &str) -> CacheKey {
        derive_key(text, "nova", 1.0, "openai")
    }

    fn small_policy() -> EvictionPolicy {
        EvictionPolicy::new(100, 0.8).unwrap()
    }

    fn payload_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(PAYLOAD_EXT))
            .count()
    }

    #[test]
    fn test_open_absent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache");
        let store = AudioStore::open(&path, EvictionPolicy::default()).unwrap();

        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
        assert!(path.is_dir());
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        let k = key("Hardpoints deployed");
        assert_eq!(store.put(&k, b"pcm-bytes").unwrap(), PutOutcome::Stored { evicted: 0 });

        assert_eq!(store.get(&k).unwrap(), Some(b"pcm-bytes".to_vec()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 9);
        assert_eq!(payload_files(dir.path()), 1);
    }

    #[test]
    fn test_get_not_found() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(store.get(&key("Negative")).unwrap(), None);
    }

    #[test]
    fn test_empty_payload() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        let k = key("Silence");
        store.put(&k, b"").unwrap();
        assert_eq!(store.get(&k).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_hit_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        let k = key("Shields up");
        store.put(&k, b"abc").unwrap();
        let before = store.entry(&k).unwrap();
        assert_eq!(before.hit_count, 0);
        assert_eq!(before.last_used_at, before.created_at);

        store.get(&k).unwrap();
        let after = store.entry(&k).unwrap();
        assert_eq!(after.hit_count, 1);
        assert!(after.last_used_at > before.last_used_at);

        store.get(&k).unwrap();
        assert_eq!(store.entry(&k).unwrap().hit_count, 2);
    }

    #[test]
    fn test_first_writer_wins() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        let k = key("Copy that");
        store.put(&k, b"first").unwrap();
        assert_eq!(store.put(&k, b"second").unwrap(), PutOutcome::AlreadyPresent);

        assert_eq!(store.get(&k).unwrap(), Some(b"first".to_vec()));
        assert_eq!(payload_files(dir.path()), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), small_policy()).unwrap();

        let (a, b, c) = (key("A"), key("B"), key("C"));
        store.put(&a, &[1u8; 40]).unwrap();
        store.put(&b, &[2u8; 40]).unwrap();
        assert_eq!(store.put(&c, &[3u8; 40]).unwrap(), PutOutcome::Stored { evicted: 1 });

        assert!(!store.contains(&a));
        assert!(store.contains(&b));
        assert!(store.contains(&c));
        assert_eq!(store.total_bytes(), 80);
        assert_eq!(payload_files(dir.path()), 2);
    }

    #[test]
    fn test_hit_protects_from_eviction() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), small_policy()).unwrap();

        let (a, b, c) = (key("A"), key("B"), key("C"));
        store.put(&a, &[1u8; 40]).unwrap();
        store.put(&b, &[2u8; 40]).unwrap();
        store.get(&a).unwrap();
        store.put(&c, &[3u8; 40]).unwrap();

        assert!(store.contains(&a));
        assert!(!store.contains(&b));
        assert!(store.contains(&c));
    }

    #[test]
    fn test_oversized_entry() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), small_policy()).unwrap();

        let huge = key("huge");
        store.put(&huge, &[0u8; 150]).unwrap();
        assert!(store.contains(&huge));
        assert_eq!(store.total_bytes(), 150);

        let next = key("next");
        store.put(&next, &[0u8; 10]).unwrap();
        assert!(!store.contains(&huge));
        assert!(store.contains(&next));
        assert_eq!(store.total_bytes(), 10);
    }

    #[test]
    fn test_size_invariant_over_many_puts() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), small_policy()).unwrap();

        for i in 0..50 {
            let size = 5 + (i * 7) % 30;
            store.put(&key(&format!("phrase {}", i)), &vec![0u8; size]).unwrap();
            assert!(store.total_bytes() <= 100);
            let sum: u64 = store.entries().iter().map(|e| e.size).sum();
            assert_eq!(sum, store.total_bytes());
        }
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let k = key("Landing gear down");

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&k, b"gear").unwrap();
            store.get(&k).unwrap();
            store.close().unwrap();
        }

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            assert_eq!(store.len(), 1);
            assert_eq!(store.entry(&k).unwrap().hit_count, 1);
            assert_eq!(store.get(&k).unwrap(), Some(b"gear".to_vec()));
        }
    }

    #[test]
    fn test_drop_flushes() {
        let dir = TempDir::new().unwrap();
        let k = key("Lights on");

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&k, b"on").unwrap();
            store.get(&k).unwrap();
            store.get(&k).unwrap();
        }

        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(store.entry(&k).unwrap().hit_count, 2);
    }

    #[test]
    fn test_stamps_continue_after_reopen() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (key("A"), key("B"));

        let first_created = {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&a, b"a").unwrap();
            store.entry(&a).unwrap().created_at
        };

        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        store.put(&b, b"b").unwrap();
        assert!(store.entry(&b).unwrap().created_at > first_created);
    }

    #[test]
    fn test_load_drops_missing_payload() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (key("A"), key("B"));

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&a, b"aaaa").unwrap();
            store.put(&b, b"bbbb").unwrap();
            let locator = store.entry(&a).unwrap().locator;
            fs::remove_file(dir.path().join(locator)).unwrap();
        }

        let (store, report) =
            AudioStore::open_with_report(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.dropped, 1);
        assert!(!store.contains(&a));
        assert_eq!(store.get(&b).unwrap(), Some(b"bbbb".to_vec()));
        drop(store);

        // The repaired index no longer mentions the lost entry
        let (_, report) =
            AudioStore::open_with_report(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn test_load_drops_truncated_payload() {
        let dir = TempDir::new().unwrap();
        let a = key("A");

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&a, b"aaaa").unwrap();
            let locator = store.entry(&a).unwrap().locator;
            fs::write(dir.path().join(locator), b"aa").unwrap();
        }

        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        assert!(store.is_empty());
        assert_eq!(payload_files(dir.path()), 0);
    }

    #[test]
    fn test_load_garbage_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"\x00\x01 not an index").unwrap();

        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        assert!(store.is_empty());

        let k = key("Understood");
        store.put(&k, b"ok").unwrap();
        assert!(store.contains(&k));
    }

    #[test]
    fn test_load_drops_future_stamps() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (key("A"), key("B"));

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&a, b"aaaa").unwrap();
            store.put(&b, b"bbbb").unwrap();
        }

        let index_path = dir.path().join(INDEX_FILE);
        let mut decoded = decode_index(&fs::read(&index_path).unwrap()).unwrap();
        for record in &mut decoded.records {
            if record.key == a {
                record.last_used_at = u64::MAX;
            }
        }
        fs::write(&index_path, encode_index(&decoded.records).unwrap()).unwrap();

        let (store, report) =
            AudioStore::open_with_report(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.loaded, 1);
        assert!(!store.contains(&a));
        assert_eq!(payload_files(dir.path()), 1);

        assert_eq!(store.get(&b).unwrap(), Some(b"bbbb".to_vec()));
        let c = key("C");
        store.put(&c, b"cccc").unwrap();
        let created = store.entry(&c).unwrap().created_at;
        assert!(created < u64::MAX);
        assert!(created > store.entry(&b).unwrap().created_at);
    }

    #[test]
    fn test_put_appends_to_index() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        let index_path = dir.path().join(INDEX_FILE);

        store.put(&key("A"), b"aaaa").unwrap();
        let before = fs::read(&index_path).unwrap();
        store.put(&key("B"), b"bbbb").unwrap();
        let after = fs::read(&index_path).unwrap();

        assert!(after.starts_with(&before));
        assert_eq!(after.iter().filter(|b| **b == b'\n').count(), 3);
        assert_eq!(decode_index(&after).unwrap().records.len(), 2);
    }

    #[test]
    fn test_eviction_compacts_index() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), small_policy()).unwrap();

        for text in ["A", "B", "C"] {
            store.put(&key(text), &[0u8; 40]).unwrap();
        }

        let decoded = decode_index(&fs::read(dir.path().join(INDEX_FILE)).unwrap()).unwrap();
        let mut keys: Vec<CacheKey> = decoded.records.into_iter().map(|r| r.key).collect();
        keys.sort();
        let mut expected = vec![key("B"), key("C")];
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_torn_index_append() {
        let dir = TempDir::new().unwrap();
        let (a, b, c) = (key("A"), key("B"), key("C"));

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&a, b"aaaa").unwrap();
            store.put(&b, b"bbbb").unwrap();
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(INDEX_FILE))
            .unwrap();
        file.write_all(b"{\"key\":{\"text\":\"C").unwrap();
        drop(file);

        {
            let (store, report) =
                AudioStore::open_with_report(dir.path(), EvictionPolicy::default()).unwrap();
            assert_eq!(report.loaded, 2);
            assert_eq!(report.dropped, 1);
            store.put(&c, b"cccc").unwrap();
        }

        let (store, report) =
            AudioStore::open_with_report(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(report.loaded, 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(store.get(&c).unwrap(), Some(b"cccc".to_vec()));
    }

    #[test]
    fn test_load_truncated_index() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (key("A"), key("B"));

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            store.put(&a, b"aaaa").unwrap();
            store.put(&b, b"bbbb").unwrap();
        }

        let index_path = dir.path().join(INDEX_FILE);
        let image = fs::read(&index_path).unwrap();
        fs::write(&index_path, &image[..image.len() - 5]).unwrap();

        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(payload_files(dir.path()), 1);
    }

    #[test]
    fn test_load_sweeps_orphans() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("deadbeef-1.pcm"), b"stray").unwrap();
        fs::write(dir.path().join(".index.vox.1-1.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        let (store, report) =
            AudioStore::open_with_report(dir.path(), EvictionPolicy::default()).unwrap();
        assert!(store.is_empty());
        assert_eq!(report.orphans_removed, 2);
        assert!(!dir.path().join("deadbeef-1.pcm").exists());
        assert!(!dir.path().join(".index.vox.1-1.tmp").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_reopen_with_smaller_cap_evicts() {
        let dir = TempDir::new().unwrap();
        let keys: Vec<_> = (0..5).map(|i| key(&format!("phrase {}", i))).collect();

        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            for k in &keys {
                store.put(k, &[7u8; 40]).unwrap();
            }
        }

        let (store, report) = AudioStore::open_with_report(dir.path(), small_policy()).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.evicted, 3);
        assert_eq!(store.total_bytes(), 80);
        assert!(store.contains(&keys[3]));
        assert!(store.contains(&keys[4]));
        assert_eq!(payload_files(dir.path()), 2);
    }

    #[test]
    fn test_get_drops_entry_with_missing_payload() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        let k = key("Jump complete");
        store.put(&k, b"jump").unwrap();
        let locator = store.entry(&k).unwrap().locator;
        fs::remove_file(dir.path().join(locator)).unwrap();

        assert_eq!(store.get(&k).unwrap(), None);
        assert!(!store.contains(&k));
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_get_drops_entry_with_resized_payload() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        let (grown, shrunk) = (key("Shields up"), key("Lights off"));

        store.put(&grown, b"shield").unwrap();
        store.put(&shrunk, b"lights").unwrap();
        let grown_path = dir.path().join(store.entry(&grown).unwrap().locator);
        let shrunk_path = dir.path().join(store.entry(&shrunk).unwrap().locator);
        fs::write(&grown_path, b"shield and more").unwrap();
        fs::write(&shrunk_path, b"li").unwrap();

        assert_eq!(store.get(&grown).unwrap(), None);
        assert_eq!(store.get(&shrunk).unwrap(), None);
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        let k = key("Affirmative");
        store.put(&k, b"yes").unwrap();
        assert!(store.remove(&k).unwrap());
        assert!(!store.remove(&k).unwrap());
        assert_eq!(store.get(&k).unwrap(), None);
        assert_eq!(payload_files(dir.path()), 0);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        {
            let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
            for i in 0..4 {
                store.put(&key(&format!("line {}", i)), b"data").unwrap();
            }
            assert_eq!(store.clear().unwrap(), 4);
            assert!(store.is_empty());
            assert_eq!(store.total_bytes(), 0);
        }

        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        assert!(store.is_empty());
        assert_eq!(payload_files(dir.path()), 0);
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        store.close().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn test_put_after_close() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();

        store.close().unwrap();
        assert!(matches!(store.put(&key("late"), b"x"), Err(Error::Closed)));
        assert!(matches!(store.get(&key("late")), Err(Error::Closed)));
    }

    #[test]
    fn test_concurrent_same_key() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::default()).unwrap();
        let k = key("Frameshift drive charging");

        let outcomes: Vec<PutOutcome> = thread::scope(|s| {
            let handles: Vec<_> = (0..8u8)
                .map(|i| {
                    let store = &store;
                    let k = &k;
                    s.spawn(move || store.put(k, &[i; 16]).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let stored = outcomes
            .iter()
            .filter(|o| matches!(o, PutOutcome::Stored { .. }))
            .count();
        assert_eq!(stored, 1);
        assert_eq!(store.total_bytes(), 16);
        assert_eq!(payload_files(dir.path()), 1);
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let store = AudioStore::open(dir.path(), EvictionPolicy::new(1000, 0.8).unwrap()).unwrap();

        thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..25 {
                        let k = key(&format!("thread {} phrase {}", t, i));
                        store.put(&k, &[t as u8; 30]).unwrap();
                        assert!(store.total_bytes() <= 1000);
                    }
                });
            }
        });

        assert!(store.total_bytes() <= 1000);
        let sum: u64 = store.entries().iter().map(|e| e.size).sum();
        assert_eq!(sum, store.total_bytes());
        assert_eq!(payload_files(dir.path()), store.len());
    }
}
