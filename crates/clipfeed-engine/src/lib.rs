//! Playback and preload engine for the clip feed.
//!
//! `FeedCore` drives everything: it owns the feed state, warms neighbouring
//! clips through the `PreloadCacheManager`, and hands the current clip to the
//! `PlaybackSessionController`.  The `RenderLoop` only reads the analyzer of
//! whichever session is live.

pub mod analyzer;
pub mod backend;
pub mod error;
pub mod feed;
pub mod http;
pub mod mpv;
pub mod preload;
pub mod recorder;
pub mod render;
pub mod session;
pub mod store;

pub use error::{EngineError, EngineResult};
pub use feed::{BroadcastMessage, FeedCore, FeedEvent};
