//! Tiered opening line store.
//!
//! Read order: process map, then the local durable file, then one remote
//! read. Captures land synchronously in the process map (and the file
//! image), and reach the remote layer only through the write-behind queue.
//!
//! The process map is the single point of serialization for captures: the
//! check-then-insert in [`OpeningLineStore::set_if_absent`] runs under its
//! lock, so exactly one racing capture wins per key.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::AppError;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::store::file::DurableFile;
use crate::store::key::SelectionKey;
use crate::store::queue::WriteBehindQueue;
use crate::store::remote::RemoteStore;
use crate::store::snapshot::{LineSnapshot, OpeningSnapshot};

/// Concurrent per-key remote reads when the backend has no multi-key read.
const PER_KEY_FANOUT: usize = 16;

struct RemoteLayer {
    store: Arc<dyn RemoteStore>,
    queue: WriteBehindQueue,
    read_timeout: Duration,
}

pub struct OpeningLineStore {
    local: Mutex<HashMap<String, OpeningSnapshot>>,
    file: Option<DurableFile>,
    remote: Option<RemoteLayer>,
    counters: Counters,
}

impl OpeningLineStore {
    /// A store with only the process-local layer.
    pub fn new(counters: Counters) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            file: None,
            remote: None,
            counters,
        }
    }

    pub fn with_file(mut self, file: DurableFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Enables the remote layer. `queue` must be the write-behind queue
    /// draining into `remote`.
    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteStore>,
        queue: WriteBehindQueue,
        read_timeout: Duration,
    ) -> Self {
        self.remote = Some(RemoteLayer {
            store: remote,
            queue,
            read_timeout,
        });
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Number of keys known to this process.
    pub fn len(&self) -> usize {
        self.local.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the opening snapshot for `key`, consulting each layer in turn.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get(&self, key: &SelectionKey) -> Option<OpeningSnapshot> {
        let k = key.as_str();

        if let Some(snap) = self.lookup_local(k) {
            return Some(snap);
        }

        if let Some(file) = &self.file {
            file.refresh_if_stale().await;
        }
        if let Some(snap) = self.lookup_file(k) {
            return Some(snap);
        }

        let found = match &self.remote {
            Some(remote) => self.remote_get(remote, k).await,
            None => None,
        };
        if found.is_none() {
            Counters::incr(&self.counters.misses);
        }
        found
    }

    /// Looks up many keys at once. Equivalent to calling [`get`] per key,
    /// but the remote layer sees a single multi-key read when it supports one.
    ///
    /// [`get`]: OpeningLineStore::get
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn batch_get(
        &self,
        keys: &[SelectionKey],
    ) -> HashMap<SelectionKey, Option<OpeningSnapshot>> {
        let mut out: HashMap<SelectionKey, Option<OpeningSnapshot>> =
            HashMap::with_capacity(keys.len());
        let mut pending: Vec<&SelectionKey> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(keys.len());

        for key in keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match self.lookup_local(key.as_str()) {
                Some(snap) => {
                    out.insert(key.clone(), Some(snap));
                }
                None => pending.push(key),
            }
        }

        if !pending.is_empty() {
            if let Some(file) = &self.file {
                file.refresh_if_stale().await;
            }
            pending.retain(|key| match self.lookup_file(key.as_str()) {
                Some(snap) => {
                    out.insert((*key).clone(), Some(snap));
                    false
                }
                None => true,
            });
        }

        if !pending.is_empty() {
            if let Some(remote) = &self.remote {
                for (key, snap) in self.remote_batch_get(remote, &pending).await {
                    if let Some(snap) = snap {
                        out.insert(key.clone(), Some(snap));
                    }
                }
            }
        }

        for key in pending {
            out.entry(key.clone()).or_insert_with(|| {
                Counters::incr(&self.counters.misses);
                None
            });
        }

        debug!(
            requested = keys.len(),
            found = out.values().filter(|v| v.is_some()).count(),
            "opening lines batch lookup"
        );

        out
    }

    /// Captures `snap` as the opening line for `key` unless one is already
    /// known. Returns whether this call captured it.
    ///
    /// The return value is telemetry: a false result means another capture
    /// won (or `snap` is not a valid decimal price), and callers read the
    /// winner back with [`get`].
    ///
    /// [`get`]: OpeningLineStore::get
    #[instrument(skip_all, fields(key = %key))]
    pub async fn set_if_absent(&self, key: &SelectionKey, snap: OpeningSnapshot) -> bool {
        let k = key.as_str();

        // Only values the read path accepts may become openings.
        if let Err(e) = snap.validate(k) {
            Counters::incr(&self.counters.malformed);
            warn!(error = %e, "refusing to capture invalid opening line");
            return false;
        }

        let captured = {
            let mut local = self.local.lock();
            if local.contains_key(k) {
                false
            } else if let Some(existing) = self.file.as_ref().and_then(|f| f.get(k)) {
                local.insert(k.to_string(), existing);
                false
            } else {
                local.insert(k.to_string(), snap);
                if let Some(file) = &self.file {
                    file.insert_if_absent(k, snap);
                }
                true
            }
        };

        if !captured {
            Counters::incr(&self.counters.capture_conflicts);
            return false;
        }

        Counters::incr(&self.counters.captures);

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.queue.enqueue(k.to_string(), snap).await {
                warn!(error = %e, "remote replication skipped; capture kept locally");
            }
        }

        true
    }

    /// Writes the durable file if anything was captured since the last flush.
    pub async fn flush(&self) -> Result<bool, AppError> {
        match &self.file {
            Some(file) => file.flush().await,
            None => Ok(false),
        }
    }

    fn lookup_local(&self, k: &str) -> Option<OpeningSnapshot> {
        let snap = self.local.lock().get(k).copied()?;
        Counters::incr(&self.counters.local_hits);
        Some(snap)
    }

    fn lookup_file(&self, k: &str) -> Option<OpeningSnapshot> {
        let snap = self.file.as_ref()?.get(k)?;
        Counters::incr(&self.counters.file_hits);
        Some(self.memoize(k, snap))
    }

    /// Inserts into the process map unless a capture got there first, and
    /// returns whichever value the map holds.
    fn memoize(&self, k: &str, snap: OpeningSnapshot) -> OpeningSnapshot {
        *self.local.lock().entry(k.to_string()).or_insert(snap)
    }

    /// Decodes a remote payload; malformed payloads are treated as absent.
    fn accept_remote(&self, k: &str, raw: &str) -> Option<OpeningSnapshot> {
        match LineSnapshot::decode(k, raw) {
            Ok(snap) => {
                Counters::incr(&self.counters.remote_hits);
                Some(self.memoize(k, snap))
            }
            Err(e) => {
                Counters::incr(&self.counters.malformed);
                warn!(error = %e, "ignoring malformed remote opening line");
                None
            }
        }
    }

    fn degraded(&self, reason: String) {
        Counters::incr(&self.counters.remote_read_errors);
        let e = AppError::StoreDegraded(reason);
        warn!(error = %e, "remote read failed; serving local layers only");
    }

    async fn remote_get(&self, remote: &RemoteLayer, k: &str) -> Option<OpeningSnapshot> {
        let read = warn_if_slow("remote_get", remote.read_timeout / 2, remote.store.get(k));

        match timeout(remote.read_timeout, read).await {
            Ok(Ok(Some(raw))) => self.accept_remote(k, &raw),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                self.degraded(format!("{e:#}"));
                None
            }
            Err(_) => {
                self.degraded(format!("timed out after {:?}", remote.read_timeout));
                None
            }
        }
    }

    async fn remote_batch_get<'k>(
        &self,
        remote: &RemoteLayer,
        keys: &[&'k SelectionKey],
    ) -> Vec<(&'k SelectionKey, Option<OpeningSnapshot>)> {
        let wanted: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let read = warn_if_slow(
            "remote_batch_get",
            remote.read_timeout / 2,
            remote.store.batch_get(&wanted),
        );

        match timeout(remote.read_timeout, read).await {
            Ok(Ok(Some(found))) => keys
                .iter()
                .map(|key| {
                    let snap = found
                        .get(key.as_str())
                        .and_then(|raw| self.accept_remote(key.as_str(), raw));
                    (*key, snap)
                })
                .collect(),
            Ok(Ok(None)) => self.remote_get_each(remote, keys).await,
            Ok(Err(e)) => {
                self.degraded(format!("{e:#}"));
                keys.iter().map(|key| (*key, None)).collect()
            }
            Err(_) => {
                self.degraded(format!("batch timed out after {:?}", remote.read_timeout));
                keys.iter().map(|key| (*key, None)).collect()
            }
        }
    }

    /// Per-key fallback for backends without a multi-key read. The whole
    /// fan-out shares one `read_timeout`; keys still unanswered when it
    /// expires are misses.
    async fn remote_get_each<'k>(
        &self,
        remote: &RemoteLayer,
        keys: &[&'k SelectionKey],
    ) -> Vec<(&'k SelectionKey, Option<OpeningSnapshot>)> {
        let wanted: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let store = Arc::clone(&remote.store);
        let mut reads = stream::iter(wanted)
            .map(move |k| {
                let store = Arc::clone(&store);
                async move {
                    let res = store.get(&k).await;
                    (k, res)
                }
            })
            .buffered(PER_KEY_FANOUT);

        let mut answered: HashMap<String, anyhow::Result<Option<String>>> =
            HashMap::with_capacity(keys.len());
        let drained = timeout(remote.read_timeout, async {
            while let Some((k, res)) = reads.next().await {
                answered.insert(k, res);
            }
        })
        .await;

        if drained.is_err() {
            self.degraded(format!(
                "per-key reads timed out after {:?}; {} of {} answered",
                remote.read_timeout,
                answered.len(),
                keys.len()
            ));
        }

        let mut failure: Option<String> = None;
        let out = keys
            .iter()
            .map(|key| {
                let snap = match answered.remove(key.as_str()) {
                    Some(Ok(Some(raw))) => self.accept_remote(key.as_str(), &raw),
                    Some(Ok(None)) | None => None,
                    Some(Err(e)) => {
                        failure.get_or_insert_with(|| format!("{e:#}"));
                        None
                    }
                };
                (*key, snap)
            })
            .collect();

        if let Some(reason) = failure {
            self.degraded(reason);
        }
        out
    }
}
