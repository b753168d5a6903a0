//! FeedCore: single-owner event loop for the feed.
//!
//! The TUI and the HTTP API send `FeedEvent`s; FeedCore owns the
//! `StateManager`, the preload cache, the playback session controller, the
//! object store client and the recorder.  No other task mutates them.
//!
//! ```text
//!   FeedEvent::Command ──┐
//!   TracksFetched ───────┤                 ┌─► PreloadCacheManager (warm window)
//!   UploadFinished ──────┼─► FeedCore ─────┤
//!   SessionEvent ────────┘   (StateManager)└─► PlaybackSessionController::load
//!                                 │
//!                                 └─► broadcast: StateUpdated / TrackChanged / …
//! ```
//!
//! Listing fetches and uploads run on spawned tasks and report back through
//! the event channel, so a slow store never stalls navigation.
use std::sync::Arc;

use clipfeed_proto::config::Config;
use clipfeed_proto::protocol::{Command, SessionPhase, Track, UploadOutcome};
use clipfeed_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::analyzer::AnalyzerHandle;
use crate::backend::AudioBackend;
use crate::error::EngineResult;
use crate::preload::{PreloadCacheManager, PreloadSettings};
use crate::recorder::{ClipRecorder, RecordedClip};
use crate::session::{
    PlaybackIntent, PlaybackSessionController, SessionEvent, SessionEventKind, SessionSettings,
};
use crate::store::{fetch_tracks, ObjectStore};

/// What FeedCore tells its observers.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// `FeedState` changed; receivers should fetch from the StateManager.
    StateUpdated,
    /// A new session was requested for this URL (None = nothing to play).
    TrackChanged(Option<String>),
    /// A log line worth showing to the user.
    Log(String),
    UploadFinished(UploadOutcome),
}

// ── FeedEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the FeedCore loop.
#[derive(Debug)]
pub enum FeedEvent {
    /// A command from the TUI or HTTP API.
    Command(Command),
    /// A listing fetch finished.
    TracksFetched(EngineResult<Vec<Track>>),
    UploadFinished(UploadOutcome),
    Shutdown,
}

// ── FeedCore ──────────────────────────────────────────────────────────────────

pub struct FeedCore {
    config: Config,
    state_manager: Arc<StateManager>,
    store: Arc<dyn ObjectStore>,
    recorder: Box<dyn ClipRecorder>,
    preload: PreloadCacheManager,
    session: PlaybackSessionController,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    /// Weak so the loop still ends once every external sender is gone.
    event_tx: mpsc::WeakSender<FeedEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    fetch_in_flight: bool,
}

impl FeedCore {
    pub fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        store: Arc<dyn ObjectStore>,
        recorder: Box<dyn ClipRecorder>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: &mpsc::Sender<FeedEvent>,
    ) -> Self {
        let autoplay = config.playback.autoplay;
        let state_manager = Arc::new(StateManager::new(autoplay));
        let preload = PreloadCacheManager::new(
            Arc::clone(&backend),
            PreloadSettings::from_config(&config.preload),
        );
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let session = PlaybackSessionController::new(
            backend,
            preload.clone(),
            SessionSettings::from_config(&config.playback),
            PlaybackIntent {
                playing: false,
                autoplay,
            },
            session_tx,
        );

        Self {
            config,
            state_manager,
            store,
            recorder,
            preload,
            session,
            session_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            fetch_in_flight: false,
        }
    }

    /// Borrow the state manager (for the TUI and the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Analyzer of the live session, for the render loop.
    pub fn analyzer(&self) -> watch::Receiver<Option<AnalyzerHandle>> {
        self.session.analyzer()
    }

    pub fn preload(&self) -> &PreloadCacheManager {
        &self.preload
    }

    /// Run the event loop.  Returns on `Shutdown` or once every sender of
    /// the event channel is dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<FeedEvent>) -> anyhow::Result<()> {
        info!("FeedCore: starting event loop");
        self.refresh().await;

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("FeedCore: event channel closed, shutting down");
                        break;
                    }
                    Some(FeedEvent::Shutdown) => {
                        info!("FeedCore: shutdown requested");
                        break;
                    }
                    Some(FeedEvent::Command(cmd)) => {
                        info!("FeedCore: command {:?}", cmd);
                        if let Err(e) = self.handle_command(cmd).await {
                            error!("FeedCore: command error: {}", e);
                        }
                        // released only after the intent above is in place
                        if cmd.is_gesture() {
                            self.session.notify_gesture();
                        }
                        self.broadcast(BroadcastMessage::StateUpdated);
                    }
                    Some(FeedEvent::TracksFetched(res)) => self.on_tracks_fetched(res).await,
                    Some(FeedEvent::UploadFinished(outcome)) => self.on_upload_finished(outcome).await,
                },
                Some(evt) = self.session_rx.recv() => self.handle_session_event(evt).await,
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn broadcast(&self, msg: BroadcastMessage) {
        let _ = self.broadcast_tx.send(msg);
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::PlayPause => {
                let playing = self.state_manager.toggle_playing().await;
                self.session.set_playing(playing);
            }
            Command::Next => {
                self.state_manager.next().await;
                self.load_current().await;
            }
            Command::Previous => {
                self.state_manager.previous().await;
                self.load_current().await;
            }
            Command::Like => match self.state_manager.toggle_like().await {
                Some(liked) => debug!("FeedCore: liked={}", liked),
                None => debug!("FeedCore: nothing to like"),
            },
            Command::RecordStart => {
                self.recorder.start().await?;
                self.state_manager.set_recording(true).await;
            }
            Command::RecordStop => {
                let res = self.recorder.stop().await;
                self.state_manager.set_recording(false).await;
                self.upload(res?);
            }
            Command::ToggleAutoplay => {
                let autoplay = self.state_manager.toggle_autoplay().await;
                info!("FeedCore: autoplay {}", if autoplay { "on" } else { "off" });
                self.session.set_autoplay(autoplay);
            }
            Command::Refresh => self.refresh().await,
            Command::GetState => {
                // state is broadcast after every command
            }
        }
        Ok(())
    }

    /// Point the session at the current track and re-warm the window
    /// around it.  Always rebuilds, even when the URL did not change.
    async fn load_current(&mut self) {
        let state = self.state_manager.get_state().await;
        let url = state.current_track().map(|t| t.url.clone());
        self.session.set_playing(state.sequencer.is_playing());
        self.session.set_autoplay(state.sequencer.autoplay());

        let neighbours = self
            .state_manager
            .neighbours(self.config.preload.lookahead, self.config.preload.lookbehind)
            .await;
        let mut window = neighbours.clone();
        window.extend(url.iter().cloned());
        self.preload.retain(&window).await;

        self.state_manager.set_phase(SessionPhase::Idle).await;
        self.broadcast(BroadcastMessage::TrackChanged(url.clone()));
        self.session.load(url).await;

        for neighbour in &neighbours {
            self.preload.warm(neighbour).await;
        }
        self.broadcast(BroadcastMessage::StateUpdated);
    }

    async fn refresh(&mut self) {
        if self.fetch_in_flight {
            debug!("FeedCore: fetch already in flight");
            return;
        }
        let Some(tx) = self.event_tx.upgrade() else {
            return;
        };
        self.fetch_in_flight = true;
        self.state_manager.set_loading(true).await;
        self.broadcast(BroadcastMessage::StateUpdated);

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let res = fetch_tracks(store.as_ref()).await;
            let _ = tx.send(FeedEvent::TracksFetched(res)).await;
        });
    }

    async fn on_tracks_fetched(&mut self, res: EngineResult<Vec<Track>>) {
        self.fetch_in_flight = false;
        match res {
            Ok(tracks) => {
                info!("FeedCore: {} tracks", tracks.len());
                self.state_manager.replace_tracks(tracks).await;
                self.preload.clear().await;
                self.load_current().await;
            }
            Err(e) => {
                // prior tracks stay playable
                warn!("FeedCore: {}", e);
                self.state_manager.set_load_error(e.to_string()).await;
                self.broadcast(BroadcastMessage::StateUpdated);
            }
        }
    }

    /// Upload in the background; the outcome comes back as a `FeedEvent`.
    /// Not retried.
    fn upload(&self, clip: RecordedClip) {
        let Some(tx) = self.event_tx.upgrade() else {
            return;
        };
        let RecordedClip {
            name,
            bytes,
            content_type,
        } = clip;
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let outcome = match store.upload(&name, bytes, &content_type).await {
                Ok(()) => UploadOutcome::Uploaded { name },
                Err(e) => UploadOutcome::Failed {
                    name,
                    message: e.to_string(),
                },
            };
            let _ = tx.send(FeedEvent::UploadFinished(outcome)).await;
        });
    }

    async fn on_upload_finished(&mut self, outcome: UploadOutcome) {
        match &outcome {
            UploadOutcome::Uploaded { name } => info!("FeedCore: uploaded {}", name),
            UploadOutcome::Failed { name, message } => warn!("FeedCore: upload of {} failed: {}", name, message),
        }
        let uploaded = matches!(outcome, UploadOutcome::Uploaded { .. });
        self.state_manager.set_last_upload(outcome.clone()).await;
        self.broadcast(BroadcastMessage::UploadFinished(outcome));
        self.broadcast(BroadcastMessage::StateUpdated);
        if uploaded {
            self.refresh().await;
        }
    }

    // ── session events ────────────────────────────────────────────────────────

    async fn handle_session_event(&mut self, evt: SessionEvent) {
        if evt.generation != self.session.generation() {
            debug!("FeedCore: dropping stale event from gen={}", evt.generation);
            return;
        }
        match evt.kind {
            SessionEventKind::Phase(phase) => {
                self.state_manager.set_phase(phase).await;
                self.broadcast(BroadcastMessage::StateUpdated);
            }
            SessionEventKind::Ended => {
                let autoplay = self.state_manager.get_state().await.sequencer.autoplay();
                if autoplay {
                    info!("FeedCore: {} ended, advancing", evt.url);
                    self.state_manager.next().await;
                    self.load_current().await;
                } else {
                    self.state_manager.set_playing(false).await;
                    self.session.set_playing(false);
                    self.broadcast(BroadcastMessage::StateUpdated);
                }
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn cleanup(&mut self) {
        info!("FeedCore: cleanup, closing session");
        self.session.close().await;
        self.preload.clear().await;
        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.stop().await {
                debug!("FeedCore: discarding recording: {}", e);
            }
        }
    }
}
