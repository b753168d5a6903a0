use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sequencer::FeedSequencer;

/// Name the object store uses to keep an otherwise empty folder alive.
/// Never a playable clip.
pub const PLACEHOLDER_NAME: &str = ".emptyFolderPlaceholder";

/// Extensions the feed treats as audio clips.
const AUDIO_EXTENSIONS: &[&str] = &["webm", "ogg", "opus", "mp3", "m4a", "mp4", "wav", "aac", "flac"];

/// One playable clip in the feed.  Identity is the URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub url: String,
    pub display_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub liked: bool,
}

impl Track {
    pub fn new(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.into(),
            created_at: None,
            liked: false,
        }
    }
}

/// True for the store's empty-folder marker, given either a bare object name
/// or a full URL ending in it.
pub fn is_placeholder(name_or_url: &str) -> bool {
    let last = name_or_url
        .split(['?', '#'])
        .next()
        .unwrap_or(name_or_url)
        .rsplit('/')
        .next()
        .unwrap_or(name_or_url);
    last == PLACEHOLDER_NAME
}

/// True when the object name carries a known audio extension.
pub fn is_audio_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => AUDIO_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// Commands produced by the gesture layer (keyboard, mouse, HTTP API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    PlayPause,
    Next,
    Previous,
    Like,
    RecordStart,
    RecordStop,
    ToggleAutoplay,
    /// Re-fetch the listing and rebuild the play order.
    Refresh,
    GetState,
}

impl Command {
    /// Whether this command originates from a direct user interaction.
    /// Deferred playback waits for one of these.
    pub fn is_gesture(&self) -> bool {
        !matches!(self, Command::Refresh | Command::GetState)
    }
}

/// Lifecycle phase of the playback session for the current track.
///
/// Transitions:
///   Idle -> Acquiring -> Buffering -> Ready -> Playing <-> Paused
///   Playing -> Ended
///   Acquiring | Buffering | Ready | Playing -> Failed -> Acquiring (retry) | Idle
///   Ready -> AwaitingGesture -> Playing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Waiting for the resource to report metadata.
    Acquiring,
    /// Waiting for enough buffered data to play through.
    Buffering,
    Ready,
    Playing,
    Paused,
    /// Platform refused autonomous playback; waiting for the next gesture.
    AwaitingGesture,
    Ended,
    Failed { attempt: u32 },
}

impl SessionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Acquiring => "connecting",
            SessionPhase::Buffering => "buffering",
            SessionPhase::Ready => "ready",
            SessionPhase::Playing => "playing",
            SessionPhase::Paused => "paused",
            SessionPhase::AwaitingGesture => "tap to play",
            SessionPhase::Ended => "ended",
            SessionPhase::Failed { .. } => "retrying",
        }
    }

    /// True once the graph is built and the track can be heard on demand.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            SessionPhase::Ready
                | SessionPhase::Playing
                | SessionPhase::Paused
                | SessionPhase::AwaitingGesture
        )
    }
}

/// Result of uploading a recorded snippet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum UploadOutcome {
    Uploaded { name: String },
    Failed { name: String, message: String },
}

/// Full state of the feed.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedState {
    #[serde(default)]
    pub rev: u64,
    pub sequencer: FeedSequencer,
    pub phase: SessionPhase,
    /// True while a listing fetch is in flight.
    pub loading: bool,
    pub load_error: Option<String>,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub last_upload: Option<UploadOutcome>,
}

impl FeedState {
    pub fn current_track(&self) -> Option<&Track> {
        self.sequencer.current_track()
    }
}
