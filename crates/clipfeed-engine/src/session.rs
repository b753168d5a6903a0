//! Playback session controller: owns the single live audio graph.
//!
//! Every `load()` supersedes the previous session:
//!
//! ```text
//!   load(url)
//!     ├── cancel old token, await old task (its teardown has run)
//!     └── spawn SessionTask { generation + 1 }
//!             acquire:  Acquiring → Buffering → Ready
//!             play:     Playing ⇄ Paused, AwaitingGesture, Ended
//!             failure:  teardown, Failed { attempt } → acquire again (bounded)
//!             exit:     teardown (always)
//! ```
//!
//! The task reports through `SessionEvent`s tagged with its generation so the
//! owner can drop anything a superseded session managed to send.
use std::future::Future;
use std::sync::Arc;

use clipfeed_proto::config::PlaybackConfig;
use clipfeed_proto::protocol::SessionPhase;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{AnalyzerHandle, AnalyzerSettings};
use crate::backend::{AudioBackend, ContextState, MediaResource, OutputContext, ReadyState};
use crate::error::{EngineError, EngineResult};
use crate::preload::PreloadCacheManager;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Full re-acquisitions allowed after the first attempt fails.
    pub max_retries: u32,
    pub analyzer: AnalyzerSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(cfg: &PlaybackConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            analyzer: AnalyzerSettings::from_config(cfg),
        }
    }
}

/// What the user currently wants from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackIntent {
    pub playing: bool,
    /// Off means the track loops instead of ending.
    pub autoplay: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Phase(SessionPhase),
    /// The track played to its end.
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: u64,
    pub url: String,
    pub kind: SessionEventKind,
}

struct ActiveSession {
    generation: u64,
    url: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PlaybackSessionController {
    backend: Arc<dyn AudioBackend>,
    preload: PreloadCacheManager,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
    intent_tx: watch::Sender<PlaybackIntent>,
    analyzer_tx: Arc<watch::Sender<Option<AnalyzerHandle>>>,
    gesture: Arc<Notify>,
    generation: u64,
    active: Option<ActiveSession>,
}

impl PlaybackSessionController {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        preload: PreloadCacheManager,
        settings: SessionSettings,
        intent: PlaybackIntent,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (intent_tx, _) = watch::channel(intent);
        let (analyzer_tx, _) = watch::channel(None);
        Self {
            backend,
            preload,
            settings,
            events,
            intent_tx,
            analyzer_tx: Arc::new(analyzer_tx),
            gesture: Arc::new(Notify::new()),
            generation: 0,
            active: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current_url(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.url.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Analyzer of whichever session is live; `None` between sessions.
    pub fn analyzer(&self) -> watch::Receiver<Option<AnalyzerHandle>> {
        self.analyzer_tx.subscribe()
    }

    /// Tear down the current session and, for `Some(url)`, start a new one.
    /// Returns once the old graph is fully released.
    pub async fn load(&mut self, url: Option<String>) {
        self.cancel_active().await;
        let Some(url) = url else {
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();
        info!("session: gen={} loading {}", generation, url);

        let task = SessionTask {
            generation,
            url: url.clone(),
            backend: Arc::clone(&self.backend),
            preload: self.preload.clone(),
            settings: self.settings,
            events: self.events.clone(),
            intent_rx: self.intent_tx.subscribe(),
            analyzer_tx: Arc::clone(&self.analyzer_tx),
            gesture: Arc::clone(&self.gesture),
            token: token.clone(),
            retries: 0,
        };
        let handle = tokio::spawn(task.run());
        self.active = Some(ActiveSession {
            generation,
            url,
            token,
            task: handle,
        });
    }

    pub fn set_playing(&self, playing: bool) {
        self.intent_tx.send_if_modified(|i| {
            let changed = i.playing != playing;
            i.playing = playing;
            changed
        });
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        self.intent_tx.send_if_modified(|i| {
            let changed = i.autoplay != autoplay;
            i.autoplay = autoplay;
            changed
        });
    }

    pub fn intent(&self) -> PlaybackIntent {
        *self.intent_tx.borrow()
    }

    /// A direct user interaction happened; releases a deferred play.
    pub fn notify_gesture(&self) {
        self.gesture.notify_waiters();
    }

    /// Shut down: cancel and tear down whatever is live.
    pub async fn close(&mut self) {
        self.cancel_active().await;
        self.analyzer_tx.send_replace(None);
    }

    async fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("session: gen={} cancelling {}", active.generation, active.url);
            active.token.cancel();
            if let Err(e) = active.task.await {
                warn!("session: gen={} task failed: {}", active.generation, e);
            }
        }
    }
}

impl Drop for PlaybackSessionController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.token.cancel();
        }
    }
}

// ── session task ─────────────────────────────────────────────────────────────

/// Why an attempt stopped.
enum Stop {
    Cancelled,
    /// Play again from the top without spending the retry budget.
    Restart,
    Failed(EngineError),
}

impl From<EngineError> for Stop {
    fn from(e: EngineError) -> Self {
        Stop::Failed(e)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EndState {
    Running,
    Ended,
    /// Ended and since told to pause.
    Settled,
}

/// Everything one attempt has opened.  Released only through `teardown`.
#[derive(Default)]
struct Graph {
    resource: Option<Arc<dyn MediaResource>>,
    context: Option<Box<dyn OutputContext>>,
    analyzer: Option<AnalyzerHandle>,
    connected: bool,
}

impl Graph {
    async fn teardown(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            if self.connected {
                ctx.disconnect().await;
            }
        }
        self.connected = false;
        if let Some(resource) = self.resource.take() {
            resource.stop();
        }
        if let Some(mut ctx) = self.context.take() {
            ctx.close().await;
        }
        self.analyzer = None;
    }
}

struct SessionTask {
    generation: u64,
    url: String,
    backend: Arc<dyn AudioBackend>,
    preload: PreloadCacheManager,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
    intent_rx: watch::Receiver<PlaybackIntent>,
    analyzer_tx: Arc<watch::Sender<Option<AnalyzerHandle>>>,
    gesture: Arc<Notify>,
    token: CancellationToken,
    retries: u32,
}

impl SessionTask {
    async fn run(mut self) {
        let mut graph = Graph::default();
        let result = self.drive(&mut graph).await;
        graph.teardown().await;
        self.analyzer_tx.send_replace(None);

        match result {
            Ok(()) => debug!("session: gen={} cancelled", self.generation),
            Err(e) => {
                warn!(
                    "session: gen={} giving up on {} after {} retries: {}",
                    self.generation, self.url, self.retries, e
                );
                self.emit(SessionEventKind::Phase(SessionPhase::Idle));
            }
        }
    }

    /// Bounded retry loop.  `Ok` means cancelled; `Err` means the retry
    /// budget is spent.
    async fn drive(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        let mut use_cache = true;
        loop {
            let stop = match self.acquire(graph, use_cache).await {
                Ok(()) => self.play(graph).await,
                Err(stop) => stop,
            };
            use_cache = false;

            match stop {
                Stop::Cancelled => return Ok(()),
                Stop::Restart => {
                    debug!("session: gen={} replaying {}", self.generation, self.url);
                    graph.teardown().await;
                }
                Stop::Failed(e) => {
                    graph.teardown().await;
                    if self.retries >= self.settings.max_retries {
                        return Err(e);
                    }
                    self.retries += 1;
                    warn!(
                        "session: gen={} attempt failed ({}), retry {}/{}",
                        self.generation, e, self.retries, self.settings.max_retries
                    );
                    self.emit(SessionEventKind::Phase(SessionPhase::Failed {
                        attempt: self.retries,
                    }));
                }
            }
            if self.token.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// Acquiring → Buffering → Ready.  Every resource is parked in `graph`
    /// before the next suspension point so teardown can always find it.
    async fn acquire(&self, graph: &mut Graph, use_cache: bool) -> Result<(), Stop> {
        self.emit(SessionEventKind::Phase(SessionPhase::Acquiring));

        let cached = if use_cache {
            self.preload.take(&self.url).await
        } else {
            None
        };
        let resource = match cached {
            Some(res) => {
                debug!("session: gen={} using preloaded {}", self.generation, self.url);
                res
            }
            None => {
                // a half-prepared copy would only compete for bandwidth
                self.preload.evict(&self.url).await;
                self.guarded(self.backend.open(&self.url)).await?
            }
        };
        graph.resource = Some(Arc::clone(&resource));
        self.checkpoint()?;

        if resource.ready_state() < ReadyState::HaveMetadata {
            self.guarded(resource.wait_metadata()).await?;
        }
        self.emit(SessionEventKind::Phase(SessionPhase::Buffering));

        if resource.ready_state() < ReadyState::HaveEnoughData {
            self.guarded(resource.wait_playthrough()).await?;
        }

        if graph.context.is_none() {
            let ctx = self.guarded(self.backend.create_context()).await?;
            graph.context = Some(ctx);
        }
        let Some(ctx) = graph.context.as_mut() else {
            return Err(Stop::Failed(EngineError::backend("output context missing")));
        };
        let analyzer = match &graph.analyzer {
            Some(a) => Arc::clone(a),
            None => {
                let a = ctx.create_analyzer(self.settings.analyzer);
                graph.analyzer = Some(Arc::clone(&a));
                a
            }
        };
        if !graph.connected {
            self.guarded(ctx.connect(resource, Arc::clone(&analyzer))).await?;
            graph.connected = true;
        }

        self.analyzer_tx.send_replace(Some(analyzer));
        self.emit(SessionEventKind::Phase(SessionPhase::Ready));
        Ok(())
    }

    /// Follow the play/pause intent until cancelled or something breaks.
    async fn play(&mut self, graph: &mut Graph) -> Stop {
        let mut end = EndState::Running;
        loop {
            let intent = *self.intent_rx.borrow_and_update();
            let Some(ctx) = graph.context.as_mut() else {
                return Stop::Failed(EngineError::backend("output context missing"));
            };
            if let Err(stop) = self.guarded(ctx.set_looping(!intent.autoplay)).await {
                return stop;
            }

            match (intent.playing, end) {
                (true, EndState::Running) => {
                    match ctx.state() {
                        ContextState::Running => {}
                        ContextState::Suspended => {
                            if let Err(stop) = self.guarded(ctx.resume()).await {
                                return stop;
                            }
                        }
                        ContextState::Closed => {
                            return Stop::Failed(EngineError::backend("output context closed"));
                        }
                    }
                    match self.guarded(ctx.play()).await {
                        Ok(()) => {
                            self.retries = 0;
                            self.emit(SessionEventKind::Phase(SessionPhase::Playing));
                        }
                        Err(Stop::Failed(EngineError::PlaybackDenied)) => {
                            info!("session: gen={} playback denied, waiting for a gesture", self.generation);
                            if let Err(stop) = self.await_gesture().await {
                                return stop;
                            }
                            continue;
                        }
                        Err(stop) => return stop,
                    }
                }
                (true, EndState::Settled) => return Stop::Restart,
                (true, EndState::Ended) => {}
                (false, _) => {
                    if let Err(stop) = self.guarded(ctx.pause()).await {
                        return stop;
                    }
                    if end == EndState::Ended {
                        end = EndState::Settled;
                    }
                    self.emit(SessionEventKind::Phase(SessionPhase::Paused));
                }
            }

            let watch_end = intent.playing && end == EndState::Running;
            tokio::select! {
                _ = self.token.cancelled() => return Stop::Cancelled,
                changed = self.intent_rx.changed() => {
                    if changed.is_err() {
                        return Stop::Cancelled;
                    }
                }
                res = ctx.ended(), if watch_end => {
                    if let Err(e) = res {
                        return Stop::Failed(e);
                    }
                    info!("session: gen={} ended {}", self.generation, self.url);
                    end = EndState::Ended;
                    self.emit(SessionEventKind::Phase(SessionPhase::Ended));
                    self.emit(SessionEventKind::Ended);
                }
            }
        }
    }

    async fn await_gesture(&self) -> Result<(), Stop> {
        let notified = self.gesture.notified();
        tokio::pin!(notified);
        // register before announcing so a prompt gesture is not missed
        notified.as_mut().enable();
        self.emit(SessionEventKind::Phase(SessionPhase::AwaitingGesture));
        tokio::select! {
            _ = self.token.cancelled() => Err(Stop::Cancelled),
            _ = notified => Ok(()),
        }
    }

    /// Race a backend step against cancellation.
    async fn guarded<T, F>(&self, fut: F) -> Result<T, Stop>
    where
        F: Future<Output = EngineResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Stop::Cancelled),
            res = fut => {
                let value = res?;
                self.checkpoint()?;
                Ok(value)
            }
        }
    }

    fn checkpoint(&self) -> Result<(), Stop> {
        if self.token.is_cancelled() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, kind: SessionEventKind) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.events.send(SessionEvent {
            generation: self.generation,
            url: self.url.clone(),
            kind,
        });
    }
}
