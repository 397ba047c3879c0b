//! Local durable file layer of the opening line store.
//!
//! The whole document is a single JSON object mapping storage keys to
//! snapshots. It is read in full at startup and rewritten in full on flush
//! through a temp file and an atomic rename, so readers never observe a
//! partially written document.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::AppError;
use crate::store::snapshot::LineSnapshot;

struct FileImage {
    entries: HashMap<String, LineSnapshot>,
    /// Modification time of the file when it was last read or written.
    modified: Option<SystemTime>,
    last_check: Instant,
}

struct Document {
    entries: HashMap<String, LineSnapshot>,
    modified: Option<SystemTime>,
}

pub struct DurableFile {
    path: PathBuf,
    tmp_path: PathBuf,
    refresh_every: Duration,
    image: Mutex<FileImage>,
    dirty: AtomicBool,
    /// Serializes flushes; held for the full read-merge-write-rename sequence.
    write_lock: tokio::sync::Mutex<()>,
}

impl DurableFile {
    /// Loads the document at `path`. A missing file starts empty.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, refresh_every: Duration) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");

        let (entries, modified) = match read_document(&path).await? {
            Some(doc) => (doc.entries, doc.modified),
            None => (HashMap::new(), None),
        };

        info!(entries = entries.len(), "opening file loaded");

        Ok(Self {
            path,
            tmp_path: PathBuf::from(tmp),
            refresh_every,
            image: Mutex::new(FileImage {
                entries,
                modified,
                last_check: Instant::now(),
            }),
            dirty: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn get(&self, key: &str) -> Option<LineSnapshot> {
        self.image.lock().entries.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.image.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.image.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Records a capture for the next flush. Returns false if the key is
    /// already in the image.
    pub fn insert_if_absent(&self, key: &str, snap: LineSnapshot) -> bool {
        let mut image = self.image.lock();
        if image.entries.contains_key(key) {
            return false;
        }
        image.entries.insert(key.to_string(), snap);
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Re-reads the file if another writer replaced it since we last looked.
    /// The modification time is checked at most once per `refresh_every`.
    pub async fn refresh_if_stale(&self) {
        {
            let mut image = self.image.lock();
            if image.last_check.elapsed() < self.refresh_every {
                return;
            }
            image.last_check = Instant::now();
        }

        let modified = match fs::metadata(&self.path).await {
            Ok(meta) => meta.modified().ok(),
            Err(_) => return,
        };
        if modified.is_none() || modified == self.image.lock().modified {
            return;
        }

        match read_document(&self.path).await {
            Ok(Some(doc)) => {
                let mut image = self.image.lock();
                let before = image.entries.len();
                for (k, v) in doc.entries {
                    image.entries.entry(k).or_insert(v);
                }
                image.modified = doc.modified;
                debug!(
                    added = image.entries.len() - before,
                    "opening file refreshed from disk"
                );
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "opening file refresh failed"),
        }
    }

    /// Persists the image if anything was captured since the last flush.
    /// Returns whether a write happened.
    ///
    /// Entries another process already flushed to disk are kept as they are;
    /// this process only contributes keys the file does not have yet.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn flush(&self) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;

        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        match self.write_merged().await {
            Ok(count) => {
                debug!(entries = count, "opening file flushed");
                Ok(true)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn write_merged(&self) -> Result<usize, AppError> {
        let on_disk = read_document(&self.path).await?;

        let (bytes, count) = {
            let mut image = self.image.lock();
            if let Some(doc) = on_disk {
                image.entries.extend(doc.entries);
            }
            let sorted: BTreeMap<&String, &LineSnapshot> = image.entries.iter().collect();
            (serde_json::to_vec_pretty(&sorted)?, sorted.len())
        };

        let mut tmp = fs::File::create(&self.tmp_path).await?;
        tmp.write_all(&bytes).await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&self.tmp_path, &self.path).await?;

        let modified = fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        self.image.lock().modified = modified;

        Ok(count)
    }
}

/// Reads and strictly decodes the document. `Ok(None)` when the file does
/// not exist. A document that is not a JSON object is logged and treated as
/// empty; individual malformed entries are skipped.
async fn read_document(path: &Path) -> Result<Option<Document>, AppError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let modified = fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok());

    let raw: HashMap<String, serde_json::Value> = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "opening file is not a valid document; ignoring it");
            HashMap::new()
        }
    };

    let mut entries = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        match LineSnapshot::from_value(&key, value) {
            Ok(snap) => {
                entries.insert(key, snap);
            }
            Err(e) => warn!(error = %e, "skipping malformed opening line"),
        }
    }

    Ok(Some(Document { entries, modified }))
}
