use crate::protocol::{FeedState, SessionPhase, Track, UploadOutcome};
use crate::sequencer::FeedSequencer;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared feed state.  Every mutation bumps `rev` so observers can tell a
/// fresh snapshot from a stale one.
pub struct StateManager {
    state: Arc<RwLock<FeedState>>,
}

impl StateManager {
    pub fn new(autoplay: bool) -> Self {
        let state = FeedState {
            rev: 1,
            sequencer: FeedSequencer::new(autoplay),
            phase: SessionPhase::Idle,
            loading: false,
            load_error: None,
            recording: false,
            last_upload: None,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn get_state(&self) -> FeedState {
        self.state.read().await.clone()
    }

    pub async fn current_url(&self) -> Option<String> {
        let state = self.state.read().await;
        state.current_track().map(|t| t.url.clone())
    }

    /// Neighbours to warm: `ahead` upcoming URLs followed by `behind`
    /// preceding ones, without duplicates.
    pub async fn neighbours(&self, ahead: usize, behind: usize) -> Vec<String> {
        let state = self.state.read().await;
        let mut urls = state.sequencer.upcoming(ahead);
        for url in state.sequencer.preceding(behind) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    pub async fn set_loading(&self, loading: bool) {
        let mut state = self.state.write().await;
        state.loading = loading;
        state.rev += 1;
    }

    /// Record a failed fetch.  Prior tracks are kept.
    pub async fn set_load_error(&self, message: String) {
        let mut state = self.state.write().await;
        state.loading = false;
        state.load_error = Some(message);
        state.rev += 1;
    }

    /// Install a fresh listing: new shuffled order, position back to 0.
    pub async fn replace_tracks(&self, tracks: Vec<Track>) {
        let mut state = self.state.write().await;
        state.sequencer.replace_tracks(tracks);
        state.loading = false;
        state.load_error = None;
        state.rev += 1;
    }

    /// Advance and return the new current URL.
    pub async fn next(&self) -> Option<String> {
        let mut state = self.state.write().await;
        let url = state.sequencer.next().map(|t| t.url.clone());
        state.rev += 1;
        url
    }

    pub async fn previous(&self) -> Option<String> {
        let mut state = self.state.write().await;
        let url = state.sequencer.previous().map(|t| t.url.clone());
        state.rev += 1;
        url
    }

    pub async fn toggle_like(&self) -> Option<bool> {
        let mut state = self.state.write().await;
        let liked = state.sequencer.toggle_like();
        if liked.is_some() {
            state.rev += 1;
        }
        liked
    }

    pub async fn toggle_playing(&self) -> bool {
        let mut state = self.state.write().await;
        let playing = !state.sequencer.is_playing();
        state.sequencer.set_playing(playing);
        state.rev += 1;
        playing
    }

    pub async fn set_playing(&self, playing: bool) {
        let mut state = self.state.write().await;
        state.sequencer.set_playing(playing);
        state.rev += 1;
    }

    pub async fn toggle_autoplay(&self) -> bool {
        let mut state = self.state.write().await;
        let autoplay = state.sequencer.toggle_autoplay();
        state.rev += 1;
        autoplay
    }

    pub async fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.state.write().await;
        if state.phase == phase {
            return;
        }
        state.phase = phase;
        state.rev += 1;
    }

    pub async fn set_recording(&self, recording: bool) {
        let mut state = self.state.write().await;
        state.recording = recording;
        state.rev += 1;
    }

    pub async fn set_last_upload(&self, outcome: UploadOutcome) {
        let mut state = self.state.write().await;
        state.last_upload = Some(outcome);
        state.rev += 1;
    }
}
