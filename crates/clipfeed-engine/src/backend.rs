//! Seams between the engine and whatever actually produces sound.
//!
//! ```text
//!   AudioBackend ── open(url) ──────────► MediaResource   (download / stream)
//!        │
//!        └──────── create_context() ────► OutputContext   (decoder + sink)
//!                                             │
//!                     connect(resource, analyzer): source → analyzer → sink
//! ```
//!
//! The production backend is `crate::mpv`; tests script their own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::analyzer::{AnalyzerHandle, AnalyzerSettings};
use crate::error::EngineResult;

/// How much of a resource is available, ordered from nothing to everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    /// Enough is buffered to play through without stalling.
    HaveEnoughData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// A streamable audio resource.  Shared between the preload cache and the
/// session that ends up playing it, hence `&self` everywhere.
#[async_trait]
pub trait MediaResource: Send + Sync {
    fn url(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    /// Resolves once duration/codec are known.
    async fn wait_metadata(&self) -> EngineResult<()>;

    /// Resolves once the resource can play through without stalling.
    async fn wait_playthrough(&self) -> EngineResult<()>;

    /// What an output context should open: a local path or a URL.
    fn locator(&self) -> String;

    /// Abort any transfer in flight and release backing storage.
    fn stop(&self);
}

/// One audio processing context: a decoder/sink pair with a tap feeding a
/// frequency analyzer.  Owned exclusively by the playback session.
#[async_trait]
pub trait OutputContext: Send {
    fn state(&self) -> ContextState;

    /// Start a suspended context.  Contexts are created suspended.
    async fn resume(&mut self) -> EngineResult<()>;

    fn create_analyzer(&mut self, settings: AnalyzerSettings) -> AnalyzerHandle;

    /// Wire `source → analyzer → sink`.  Replaces any previous source.
    async fn connect(
        &mut self,
        source: Arc<dyn MediaResource>,
        analyzer: AnalyzerHandle,
    ) -> EngineResult<()>;

    async fn disconnect(&mut self);

    /// May fail with `EngineError::PlaybackDenied` when the platform wants a
    /// user gesture first.
    async fn play(&mut self) -> EngineResult<()>;

    async fn pause(&mut self) -> EngineResult<()>;

    async fn set_looping(&mut self, looping: bool) -> EngineResult<()>;

    /// Resolves when the connected source reaches its end.  Cancel-safe:
    /// dropping the future loses nothing.
    async fn ended(&mut self) -> EngineResult<()>;

    async fn close(&mut self);
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start acquiring `url`.  Returns as soon as the transfer is under way;
    /// readiness is awaited through the resource.
    async fn open(&self, url: &str) -> EngineResult<Arc<dyn MediaResource>>;

    async fn create_context(&self) -> EngineResult<Box<dyn OutputContext>>;
}
