//! Preload cache: a small bounded set of resources prepared ahead of the
//! current track.
//!
//! ```text
//!   warm(url) ──► queue ──► worker (one at a time)
//!                              ├── open + wait_playthrough ok → entry.loaded
//!                              └── failure → re-queue once, sleep retry_delay
//! ```
//!
//! The manager is cheap to clone; all clones share one cache.
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use clipfeed_proto::config::PreloadConfig;
use clipfeed_proto::protocol::is_placeholder;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{AudioBackend, MediaResource};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct PreloadSettings {
    pub capacity: usize,
    pub retry_delay: Duration,
    /// Automatic re-queues after a failed preparation.
    pub max_retries_per_url: u32,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self::from_config(&PreloadConfig::default())
    }
}

impl PreloadSettings {
    pub fn from_config(cfg: &PreloadConfig) -> Self {
        Self {
            capacity: cfg.capacity,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_retries_per_url: cfg.max_retries_per_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadStatus {
    Absent,
    Queued,
    Loading,
    Loaded,
    Errored,
}

struct Entry {
    resource: Option<Arc<dyn MediaResource>>,
    loaded: bool,
    error: bool,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    queue: VecDeque<String>,
    /// True while a worker task is alive.
    busy: bool,
    failures: HashMap<String, u32>,
}

impl Inner {
    fn remove_entry(&mut self, url: &str) -> Option<Entry> {
        self.failures.remove(url);
        self.entries.remove(url)
    }
}

#[derive(Clone)]
pub struct PreloadCacheManager {
    inner: Arc<Mutex<Inner>>,
    backend: Arc<dyn AudioBackend>,
    settings: PreloadSettings,
}

impl PreloadCacheManager {
    pub fn new(backend: Arc<dyn AudioBackend>, settings: PreloadSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            backend,
            settings,
        }
    }

    /// Queue `url` for preparation.  No-op for placeholders, URLs already
    /// cached or queued, and when the cache is full.
    pub async fn warm(&self, url: &str) {
        if is_placeholder(url) {
            return;
        }
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.entries.get(url) {
            if !entry.error {
                return;
            }
            // a fresh request for an errored URL starts over
            debug!("preload: re-warming errored {}", url);
            if let Some(old) = inner.remove_entry(url) {
                stop_entry(old);
            }
        }
        if inner.queue.iter().any(|q| q == url) {
            return;
        }
        if inner.entries.len() >= self.settings.capacity {
            debug!("preload: cache full, dropping warm for {}", url);
            return;
        }

        // neither cached nor queued: whatever failed before is forgotten
        inner.failures.remove(url);
        debug!("preload: queued {}", url);
        inner.queue.push_back(url.to_string());
        if !inner.busy {
            inner.busy = true;
            let this = self.clone();
            tokio::spawn(async move { this.drive().await });
        }
    }

    /// Loaded, unerrored resource for `url`.
    pub async fn get(&self, url: &str) -> Option<Arc<dyn MediaResource>> {
        let inner = self.inner.lock().await;
        match inner.entries.get(url) {
            Some(Entry {
                resource: Some(res),
                loaded: true,
                error: false,
            }) => Some(Arc::clone(res)),
            _ => None,
        }
    }

    /// Hand a loaded resource over to the caller.  The cache forgets it
    /// without stopping it.
    pub async fn take(&self, url: &str) -> Option<Arc<dyn MediaResource>> {
        let mut inner = self.inner.lock().await;
        let ready = matches!(
            inner.entries.get(url),
            Some(Entry { resource: Some(_), loaded: true, error: false })
        );
        if !ready {
            return None;
        }
        inner.remove_entry(url).and_then(|e| e.resource)
    }

    /// Drop `url` from the cache and the queue, stopping its resource.
    pub async fn evict(&self, url: &str) {
        let mut inner = self.inner.lock().await;
        inner.queue.retain(|q| q != url);
        inner.failures.remove(url);
        if let Some(entry) = inner.remove_entry(url) {
            debug!("preload: evicted {}", url);
            stop_entry(entry);
        }
    }

    /// Evict everything outside `window`, cached or queued.
    pub async fn retain(&self, window: &[String]) {
        let mut inner = self.inner.lock().await;
        inner.queue.retain(|q| window.contains(q));
        let Inner {
            entries,
            queue,
            failures,
            ..
        } = &mut *inner;
        failures.retain(|url, _| entries.contains_key(url) || queue.contains(url));
        let stale: Vec<String> = inner
            .entries
            .keys()
            .filter(|url| !window.contains(url))
            .cloned()
            .collect();
        for url in stale {
            debug!("preload: {} left the window", url);
            if let Some(entry) = inner.remove_entry(&url) {
                stop_entry(entry);
            }
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        inner.failures.clear();
        for (_, entry) in inner.entries.drain() {
            stop_entry(entry);
        }
    }

    pub async fn status(&self, url: &str) -> PreloadStatus {
        let inner = self.inner.lock().await;
        match inner.entries.get(url) {
            Some(e) if e.error => PreloadStatus::Errored,
            Some(e) if e.loaded => PreloadStatus::Loaded,
            Some(_) => PreloadStatus::Loading,
            None if inner.queue.iter().any(|q| q == url) => PreloadStatus::Queued,
            None => PreloadStatus::Absent,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ── worker ────────────────────────────────────────────────────────────────

    async fn drive(self) {
        while let Some(url) = self.next_job().await {
            match self.prepare(&url).await {
                Ok(resource) => {
                    let mut inner = self.inner.lock().await;
                    inner.failures.remove(&url);
                    match inner.entries.get_mut(&url) {
                        Some(entry) => {
                            info!("preload: ready {}", url);
                            entry.resource = Some(resource);
                            entry.loaded = true;
                        }
                        None => {
                            // evicted while loading
                            resource.stop();
                        }
                    }
                }
                Err(e) => {
                    warn!("preload: {}", e);
                    {
                        let mut inner = self.inner.lock().await;
                        if inner.entries.contains_key(&url) {
                            let failures = {
                                let count = inner.failures.entry(url.clone()).or_insert(0);
                                *count += 1;
                                *count
                            };
                            if failures <= self.settings.max_retries_per_url {
                                inner.entries.remove(&url);
                                if !inner.queue.contains(&url) {
                                    inner.queue.push_back(url.clone());
                                }
                            } else if let Some(entry) = inner.entries.get_mut(&url) {
                                entry.error = true;
                            }
                        }
                    }
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    /// Pop the next URL worth preparing and register its entry.  Clears
    /// `busy` and returns `None` once the queue is drained.
    async fn next_job(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        while let Some(url) = inner.queue.pop_front() {
            if inner.entries.contains_key(&url) {
                continue;
            }
            if inner.entries.len() >= self.settings.capacity {
                debug!("preload: cache full, skipping {}", url);
                inner.failures.remove(&url);
                continue;
            }
            inner.entries.insert(
                url.clone(),
                Entry {
                    resource: None,
                    loaded: false,
                    error: false,
                },
            );
            return Some(url);
        }
        inner.busy = false;
        None
    }

    async fn prepare(&self, url: &str) -> EngineResult<Arc<dyn MediaResource>> {
        debug!("preload: preparing {}", url);
        let resource = self.backend.open(url).await.map_err(|e| preload_error(url, e))?;
        if let Err(e) = resource.wait_playthrough().await {
            resource.stop();
            return Err(preload_error(url, e));
        }
        Ok(resource)
    }
}

fn preload_error(url: &str, e: EngineError) -> EngineError {
    EngineError::Preload {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

fn stop_entry(entry: Entry) {
    if let Some(res) = entry.resource {
        res.stop();
    }
}
