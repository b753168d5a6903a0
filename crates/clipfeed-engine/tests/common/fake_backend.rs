//! Scripted in-memory audio backend.
//!
//! Resources "download" by sleeping `load_delay` on the tokio clock.  Every
//! open/stop/create/close is counted so tests can check that nothing leaks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clipfeed_engine::analyzer::{Analyzer, AnalyzerHandle, AnalyzerSettings};
use clipfeed_engine::backend::{AudioBackend, ContextState, MediaResource, OutputContext, ReadyState};
use clipfeed_engine::error::{EngineError, EngineResult};
use tokio::sync::watch;

#[derive(Default)]
pub struct Stats {
    pub opens: Mutex<Vec<String>>,
    pub live_resources: AtomicUsize,
    pub contexts_created: AtomicUsize,
    pub live_contexts: AtomicUsize,
    /// Preparations in flight right now, and the most ever seen at once.
    pub preparing: AtomicUsize,
    pub max_preparing: AtomicUsize,
    pub connected: Mutex<Option<String>>,
    pub plays: AtomicUsize,
    pub resumes: AtomicUsize,
    pub pauses: AtomicUsize,
    pub looping: Mutex<Option<bool>>,
}

impl Stats {
    pub fn opens_of(&self, url: &str) -> usize {
        self.opens.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_opens(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn connected(&self) -> Option<String> {
        self.connected.lock().unwrap().clone()
    }

    pub fn live_resources(&self) -> usize {
        self.live_resources.load(Ordering::SeqCst)
    }

    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn max_preparing(&self) -> usize {
        self.max_preparing.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    pub stats: Arc<Stats>,
    load_delay: Duration,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    /// Remaining `play()` calls to refuse with `PlaybackDenied`.
    denials: Arc<AtomicU32>,
    end_tx: watch::Sender<u64>,
}

impl FakeBackend {
    pub fn new(load_delay: Duration) -> Arc<Self> {
        let (end_tx, _) = watch::channel(0);
        Arc::new(Self {
            stats: Arc::new(Stats::default()),
            load_delay,
            failing: Mutex::new(HashSet::new()),
            hanging: Mutex::new(HashSet::new()),
            denials: Arc::new(AtomicU32::new(0)),
            end_tx,
        })
    }

    /// Every preparation of `url` fails.
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn heal(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    /// `url` never reports metadata.
    pub fn hang(&self, url: &str) {
        self.hanging.lock().unwrap().insert(url.to_string());
    }

    pub fn deny_plays(&self, count: u32) {
        self.denials.store(count, Ordering::SeqCst);
    }

    /// Make whatever is connected reach its end.
    pub fn finish_track(&self) {
        self.end_tx.send_modify(|n| *n += 1);
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn open(&self, url: &str) -> EngineResult<Arc<dyn MediaResource>> {
        self.stats.opens.lock().unwrap().push(url.to_string());
        self.stats.live_resources.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeResource {
            url: url.to_string(),
            state: Mutex::new(ReadyState::HaveNothing),
            fail: self.failing.lock().unwrap().contains(url),
            hang: self.hanging.lock().unwrap().contains(url),
            delay: self.load_delay,
            stopped: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        }))
    }

    async fn create_context(&self) -> EngineResult<Box<dyn OutputContext>> {
        self.stats.contexts_created.fetch_add(1, Ordering::SeqCst);
        self.stats.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            state: ContextState::Suspended,
            stats: Arc::clone(&self.stats),
            denials: Arc::clone(&self.denials),
            end_rx: self.end_tx.subscribe(),
            closed: false,
        }))
    }
}

pub struct FakeResource {
    url: String,
    state: Mutex<ReadyState>,
    fail: bool,
    hang: bool,
    delay: Duration,
    stopped: AtomicBool,
    stats: Arc<Stats>,
}

struct PreparingGuard(Arc<Stats>);

impl PreparingGuard {
    fn enter(stats: &Arc<Stats>) -> Self {
        let now = stats.preparing.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_preparing.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for PreparingGuard {
    fn drop(&mut self) {
        self.0.preparing.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaResource for FakeResource {
    fn url(&self) -> &str {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }

    async fn wait_metadata(&self) -> EngineResult<()> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        *state = (*state).max(ReadyState::HaveMetadata);
        Ok(())
    }

    async fn wait_playthrough(&self) -> EngineResult<()> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        let _guard = PreparingGuard::enter(&self.stats);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(EngineError::load(&self.url, "scripted failure"));
        }
        *self.state.lock().unwrap() = ReadyState::HaveEnoughData;
        Ok(())
    }

    fn locator(&self) -> String {
        self.url.clone()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stats.live_resources.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeContext {
    state: ContextState,
    stats: Arc<Stats>,
    denials: Arc<AtomicU32>,
    end_rx: watch::Receiver<u64>,
    closed: bool,
}

#[async_trait]
impl OutputContext for FakeContext {
    fn state(&self) -> ContextState {
        self.state
    }

    async fn resume(&mut self) -> EngineResult<()> {
        self.stats.resumes.fetch_add(1, Ordering::SeqCst);
        self.state = ContextState::Running;
        Ok(())
    }

    fn create_analyzer(&mut self, settings: AnalyzerSettings) -> AnalyzerHandle {
        Analyzer::new(settings)
    }

    async fn connect(&mut self, source: Arc<dyn MediaResource>, _analyzer: AnalyzerHandle) -> EngineResult<()> {
        self.end_rx.borrow_and_update();
        *self.stats.connected.lock().unwrap() = Some(source.url().to_string());
        Ok(())
    }

    async fn disconnect(&mut self) {
        *self.stats.connected.lock().unwrap() = None;
    }

    async fn play(&mut self) -> EngineResult<()> {
        let denied = self
            .denials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if denied {
            return Err(EngineError::PlaybackDenied);
        }
        self.stats.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&mut self) -> EngineResult<()> {
        self.stats.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_looping(&mut self, looping: bool) -> EngineResult<()> {
        *self.stats.looping.lock().unwrap() = Some(looping);
        Ok(())
    }

    async fn ended(&mut self) -> EngineResult<()> {
        if self.end_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.live_contexts.fetch_sub(1, Ordering::SeqCst);
        }
        self.state = ContextState::Closed;
    }
}

