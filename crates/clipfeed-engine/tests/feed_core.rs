#[macro_use]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clipfeed_engine::feed::{BroadcastMessage, FeedCore, FeedEvent};
use clipfeed_proto::config::Config;
use clipfeed_proto::protocol::{Command, SessionPhase, UploadOutcome};
use clipfeed_proto::state::StateManager;
use common::fake_backend::FakeBackend;
use common::fake_store::{FakeRecorder, FakeStore};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const LOAD: Duration = Duration::from_millis(300);
const WAIT: Duration = Duration::from_secs(30);

struct Harness {
    backend: Arc<FakeBackend>,
    store: Arc<FakeStore>,
    state: Arc<StateManager>,
    tx: mpsc::Sender<FeedEvent>,
    broadcasts: broadcast::Receiver<BroadcastMessage>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(store: Arc<FakeStore>) -> Self {
        let backend = FakeBackend::new(LOAD);
        let (broadcast_tx, broadcasts) = broadcast::channel(1024);
        let (tx, rx) = mpsc::channel(64);
        let core = FeedCore::new(
            Config::default(),
            backend.clone(),
            store.clone(),
            Box::new(FakeRecorder::default()),
            broadcast_tx,
            &tx,
        );
        let state = core.state_manager();
        let task = tokio::spawn(core.run(rx));
        Self {
            backend,
            store,
            state,
            tx,
            broadcasts,
            task,
        }
    }

    async fn send(&self, cmd: Command) {
        self.tx.send(FeedEvent::Command(cmd)).await.expect("core running");
    }

    async fn phase(&self) -> SessionPhase {
        self.state.get_state().await.phase
    }

    async fn current_url(&self) -> Option<String> {
        self.state.current_url().await
    }

    /// Wait until the current track is connected and in `phase`.
    async fn settle_on(&self, phase: SessionPhase) {
        eventually!(
            WAIT,
            self.phase().await == phase
                && self.backend.stats.connected().is_some()
                && self.backend.stats.connected() == self.current_url().await
        );
    }
}

fn three_clips() -> Arc<FakeStore> {
    FakeStore::with_objects(&[
        ".emptyFolderPlaceholder",
        "snippet-1.webm",
        "snippet-2.webm",
        "snippet-3.webm",
    ])
}

#[tokio::test(start_paused = true)]
async fn first_fetch_loads_the_first_clip_paused() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;

    let state = h.state.get_state().await;
    assert_eq!(state.sequencer.len(), 3);
    assert!(!state.loading);
    assert!(state.load_error.is_none());
    assert!(!state.sequencer.is_playing());
    assert_eq!(h.backend.stats.plays(), 0);
}

#[tokio::test(start_paused = true)]
async fn next_plays_the_following_clip() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;
    let first = h.current_url().await;

    h.send(Command::Next).await;
    h.settle_on(SessionPhase::Playing).await;

    let state = h.state.get_state().await;
    assert_eq!(state.sequencer.current_index(), 1);
    assert_ne!(h.current_url().await, first);
    assert_eq!(h.backend.stats.live_contexts(), 1);
}

#[tokio::test(start_paused = true)]
async fn neighbours_are_preloaded_and_reused() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;
    let upcoming = h.state.get_state().await.sequencer.upcoming(1);

    // both neighbours warm in the background
    tokio::time::sleep(Duration::from_secs(5)).await;
    for n in 1..=3 {
        let url = FakeStore::url_of(&format!("snippet-{}.webm", n));
        assert_eq!(h.backend.stats.opens_of(&url), 1, "{url}");
    }

    h.send(Command::Next).await;
    h.settle_on(SessionPhase::Playing).await;
    assert_eq!(h.current_url().await.as_ref(), upcoming.first());
    assert_eq!(h.backend.stats.opens_of(&upcoming[0]), 1);
}

#[tokio::test(start_paused = true)]
async fn previous_wraps_to_the_last_clip() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;

    h.send(Command::Previous).await;
    h.settle_on(SessionPhase::Playing).await;
    assert_eq!(h.state.get_state().await.sequencer.current_index(), 2);
}

#[tokio::test(start_paused = true)]
async fn end_of_clip_advances_with_autoplay() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;
    h.send(Command::Next).await;
    h.settle_on(SessionPhase::Playing).await;

    h.backend.finish_track();
    eventually!(WAIT, h.state.get_state().await.sequencer.current_index() == 2);
    h.settle_on(SessionPhase::Playing).await;
}

#[tokio::test(start_paused = true)]
async fn end_of_clip_pauses_without_autoplay() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;
    h.send(Command::ToggleAutoplay).await;
    h.send(Command::Next).await;
    h.settle_on(SessionPhase::Playing).await;
    assert_eq!(*h.backend.stats.looping.lock().unwrap(), Some(true));

    h.backend.finish_track();
    h.settle_on(SessionPhase::Paused).await;

    let state = h.state.get_state().await;
    assert_eq!(state.sequencer.current_index(), 1);
    assert!(!state.sequencer.is_playing());
    assert!(!state.sequencer.autoplay());
}

#[tokio::test(start_paused = true)]
async fn play_pause_toggles_without_rebuilding() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;

    h.send(Command::PlayPause).await;
    h.settle_on(SessionPhase::Playing).await;
    h.send(Command::PlayPause).await;
    h.settle_on(SessionPhase::Paused).await;

    assert_eq!(h.backend.stats.contexts_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn like_marks_only_the_current_clip() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;

    h.send(Command::Like).await;
    eventually!(WAIT, h.state.get_state().await.current_track().map(|t| t.liked) == Some(true));

    let state = h.state.get_state().await;
    let liked = state.sequencer.tracks().iter().filter(|t| t.liked).count();
    assert_eq!(liked, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_the_feed_alive() {
    let store = three_clips();
    store.fail_list.store(true, Ordering::SeqCst);
    let h = Harness::start(store);

    eventually!(WAIT, h.state.get_state().await.load_error.is_some());
    let state = h.state.get_state().await;
    assert!(!state.loading);
    assert!(state.sequencer.is_empty());
    assert_eq!(state.phase, SessionPhase::Idle);

    // navigating an empty feed is harmless
    h.send(Command::Next).await;
    h.send(Command::Like).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.backend.stats.total_opens(), 0);

    h.store.fail_list.store(false, Ordering::SeqCst);
    h.send(Command::Refresh).await;
    h.settle_on(SessionPhase::Playing).await;
    assert!(h.state.get_state().await.load_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn recording_is_uploaded_and_the_feed_refetched() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;
    assert_eq!(h.store.lists(), 1);

    h.send(Command::RecordStart).await;
    eventually!(WAIT, h.state.get_state().await.recording);
    h.send(Command::RecordStop).await;

    eventually!(WAIT, h.state.get_state().await.sequencer.len() == 4);
    let state = h.state.get_state().await;
    assert!(!state.recording);
    assert!(matches!(state.last_upload, Some(UploadOutcome::Uploaded { .. })));
    assert_eq!(h.store.lists(), 2);

    let uploads = h.store.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].0.starts_with("snippet-"));
    assert_eq!(uploads[0].2, "audio/webm");
}

#[tokio::test(start_paused = true)]
async fn failed_upload_is_reported_not_retried() {
    let store = three_clips();
    store.fail_upload.store(true, Ordering::SeqCst);
    let mut h = Harness::start(store);
    h.settle_on(SessionPhase::Paused).await;

    h.send(Command::RecordStart).await;
    h.send(Command::RecordStop).await;
    eventually!(WAIT, h.state.get_state().await.last_upload.is_some());

    let state = h.state.get_state().await;
    assert!(matches!(state.last_upload, Some(UploadOutcome::Failed { .. })));
    assert_eq!(h.store.lists(), 1);

    let mut saw_outcome = false;
    while let Ok(msg) = h.broadcasts.try_recv() {
        if let BroadcastMessage::UploadFinished(UploadOutcome::Failed { message, .. }) = msg {
            assert!(message.contains("413"));
            saw_outcome = true;
        }
    }
    assert!(saw_outcome);
}

#[tokio::test(start_paused = true)]
async fn track_changes_are_broadcast() {
    let mut h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;

    let mut changed = Vec::new();
    while let Ok(msg) = h.broadcasts.try_recv() {
        if let BroadcastMessage::TrackChanged(url) = msg {
            changed.push(url);
        }
    }
    assert_eq!(changed, vec![h.current_url().await]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_the_session() {
    let h = Harness::start(three_clips());
    h.send(Command::PlayPause).await;
    h.settle_on(SessionPhase::Playing).await;

    h.tx.send(FeedEvent::Shutdown).await.unwrap();
    h.task.await.unwrap().unwrap();

    assert_eq!(h.backend.stats.live_contexts(), 0);
    assert_eq!(h.backend.stats.connected(), None);
    assert_eq!(h.backend.stats.live_resources(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_every_sender_stops_the_core() {
    let h = Harness::start(three_clips());
    h.settle_on(SessionPhase::Paused).await;

    let Harness { tx, task, backend, .. } = h;
    drop(tx);
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(backend.stats.live_contexts(), 0);
}
