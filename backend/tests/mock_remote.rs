// Shared between test binaries; not every binary uses every double.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use openline::store::{LineSnapshot, RemoteStore};

/// In-memory remote layer with set-if-absent semantics.
#[derive(Default)]
pub struct MemoryRemote {
    pub rows: Mutex<HashMap<String, String>>,
    /// Serve `batch_get` natively; otherwise callers fall back to `get`.
    pub native_batch: bool,
    pub get_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
}

impl MemoryRemote {
    /// Test convenience: seed a raw payload as if another instance wrote it.
    pub fn insert_raw(&self, key: &str, payload: &str) {
        self.rows.lock().insert(key.to_string(), payload.to_string());
    }

    pub fn snapshot(&self, key: &str) -> Option<LineSnapshot> {
        let raw = self.rows.lock().get(key).cloned()?;
        LineSnapshot::decode(key, &raw).ok()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().get(key).cloned())
    }

    async fn batch_get(&self, keys: &[String]) -> anyhow::Result<Option<HashMap<String, String>>> {
        if !self.native_batch {
            return Ok(None);
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock();
        Ok(Some(
            keys.iter()
                .filter_map(|k| rows.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        ))
    }

    async fn set_if_absent(&self, key: &str, snap: &LineSnapshot) -> anyhow::Result<bool> {
        let payload = snap.encode()?;
        let mut rows = self.rows.lock();
        if rows.contains_key(key) {
            return Ok(false);
        }
        rows.insert(key.to_string(), payload);
        Ok(true)
    }
}

/// Remote layer that fails every call.
pub struct FailingRemote;

#[async_trait]
impl RemoteStore for FailingRemote {
    async fn get(&self, _: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("remote offline")
    }

    async fn batch_get(&self, _: &[String]) -> anyhow::Result<Option<HashMap<String, String>>> {
        anyhow::bail!("remote offline")
    }

    async fn set_if_absent(&self, _: &str, _: &LineSnapshot) -> anyhow::Result<bool> {
        anyhow::bail!("remote offline")
    }
}

/// Remote layer that never answers in time.
pub struct StalledRemote;

#[async_trait]
impl RemoteStore for StalledRemote {
    async fn get(&self, _: &str) -> anyhow::Result<Option<String>> {
        tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
        Ok(None)
    }

    async fn set_if_absent(&self, _: &str, _: &LineSnapshot) -> anyhow::Result<bool> {
        tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;
        Ok(false)
    }
}
