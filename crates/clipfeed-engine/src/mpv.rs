//! mpv-backed audio backend.
//!
//! Architecture:
//!
//! ```text
//!   MpvBackend::open(url)       → HttpClip   (reqwest stream → temp file)
//!   MpvBackend::create_context  → MpvContext (one mpv process per context)
//!         │
//!         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
//!         ├── reader_task   ← reads JSON lines from socket
//!         │                      ├── response (has request_id) → matched oneshot::Sender
//!         │                      └── event                     → pump_task
//!         ├── pump_task     ← end-file events → EndSignal watch (drives `ended()`)
//!         └── tap_task      ← ffmpeg -re decode of the same file → analyzer
//! ```
//!
//! mpv never refuses to start without a gesture, so this backend never
//! reports `PlaybackDenied`.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clipfeed_proto::platform;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, AnalyzerHandle, AnalyzerSettings};
use crate::backend::{AudioBackend, ContextState, MediaResource, OutputContext, ReadyState};
use crate::error::{EngineError, EngineResult};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── internal channel types ────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn loadfile(&self, locator: &str) -> anyhow::Result<()> {
        debug!("mpv: loadfile {}", locator);
        self.send(json!(["loadfile", locator, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn set_loop_file(&self, looping: bool) -> anyhow::Result<()> {
        let value = if looping { "inf" } else { "no" };
        self.send(json!(["set_property", "loop-file", value])).await?;
        Ok(())
    }

    pub async fn time_pos(&self) -> Option<f64> {
        let resp = self.send(json!(["get_property", "time-pos"])).await.ok()?;
        resp["data"].as_f64()
    }

    pub async fn quit(&self) {
        let _ = self.send(json!(["quit"])).await;
    }
}

fn start_io_tasks<R, W>(
    read_half: R,
    write_half: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> (MpvHandle, Vec<JoinHandle<()>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    let writer = tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    let reader = tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    (MpvHandle { tx: cmd_tx }, vec![writer, reader])
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can match the reply
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── process ───────────────────────────────────────────────────────────────────

struct MpvProcess {
    child: tokio::process::Child,
    socket: PathBuf,
    handle: MpvHandle,
    io_tasks: Vec<JoinHandle<()>>,
}

impl MpvProcess {
    async fn spawn(event_tx: mpsc::Sender<MpvEvent>) -> EngineResult<Self> {
        let socket = platform::mpv_socket_path();
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&socket).await;

        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| EngineError::backend("mpv binary not found"))?;

        let data_dir = platform::data_dir();
        std::fs::create_dir_all(&data_dir).map_err(EngineError::backend)?;
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join("mpv-stderr.log"))
            .map_err(EngineError::backend)?;

        let child = tokio::process::Command::new(&mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg("--keep-open=no")
            .arg("--quiet")
            .arg(format!("--input-ipc-server={}", socket.display()))
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::backend)?;
        info!("mpv: spawned pid {:?} on {}", child.id(), socket.display());

        let (handle, io_tasks) = connect_ipc(&socket, event_tx).await?;
        Ok(Self {
            child,
            socket,
            handle,
            io_tasks,
        })
    }

    async fn shutdown(mut self) {
        self.handle.quit().await;
        for task in self.io_tasks.drain(..) {
            task.abort();
        }
        let _ = self.child.kill().await;
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket).await;
        debug!("mpv: process on {} shut down", self.socket.display());
    }
}

#[cfg(unix)]
async fn connect_ipc(
    socket: &Path,
    event_tx: mpsc::Sender<MpvEvent>,
) -> EngineResult<(MpvHandle, Vec<JoinHandle<()>>)> {
    use tokio::net::UnixStream;

    for _ in 0..50 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| EngineError::backend(format!("mpv IPC socket: {}", e)))?;
    let (read_half, write_half) = stream.into_split();
    Ok(start_io_tasks(read_half, write_half, event_tx))
}

#[cfg(windows)]
async fn connect_ipc(
    socket: &Path,
    event_tx: mpsc::Sender<MpvEvent>,
) -> EngineResult<(MpvHandle, Vec<JoinHandle<()>>)> {
    use tokio::net::windows::named_pipe::ClientOptions;

    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if let Ok(client) = ClientOptions::new().open(socket) {
            let (read_half, write_half) = tokio::io::split(client);
            return Ok(start_io_tasks(read_half, write_half, event_tx));
        }
    }
    Err(EngineError::backend("mpv named pipe did not appear"))
}

// ── downloaded clip ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Progress {
    state: ReadyState,
    error: Option<String>,
}

/// A clip fetched into a temp file.  mpv and the analyzer tap both read the
/// local copy, so the clip is downloaded once.
pub struct HttpClip {
    url: String,
    locator: String,
    progress: watch::Receiver<Progress>,
    file: std::sync::Mutex<Option<tempfile::TempPath>>,
    token: CancellationToken,
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next().and_then(|name| name.rsplit_once('.')) {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 => format!(".{}", ext),
        _ => String::new(),
    }
}

impl HttpClip {
    pub async fn open(client: &reqwest::Client, url: &str) -> EngineResult<Arc<Self>> {
        let token = CancellationToken::new();

        if !is_remote(url) {
            if !Path::new(url).exists() {
                return Err(EngineError::load(url, "no such file"));
            }
            let (_, progress) = watch::channel(Progress {
                state: ReadyState::HaveEnoughData,
                error: None,
            });
            return Ok(Arc::new(Self {
                url: url.to_string(),
                locator: url.to_string(),
                progress,
                file: std::sync::Mutex::new(None),
                token,
            }));
        }

        let temp = tempfile::Builder::new()
            .prefix("clipfeed-")
            .suffix(&extension_of(url))
            .tempfile()
            .map_err(|e| EngineError::load(url, e))?
            .into_temp_path();
        let locator = temp.to_string_lossy().into_owned();
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&temp)
            .await
            .map_err(|e| EngineError::load(url, e))?;

        let (progress_tx, progress) = watch::channel(Progress {
            state: ReadyState::HaveNothing,
            error: None,
        });
        let request = client.get(url);
        let download_url = url.to_string();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("clip: download of {} stopped", download_url),
                res = download(request, file, &progress_tx) => {
                    if let Err(e) = res {
                        warn!("clip: download of {} failed: {}", download_url, e);
                        progress_tx.send_modify(|p| p.error = Some(e.to_string()));
                    }
                }
            }
        });

        Ok(Arc::new(Self {
            url: url.to_string(),
            locator,
            progress,
            file: std::sync::Mutex::new(Some(temp)),
            token,
        }))
    }

    async fn wait_until(&self, wanted: ReadyState) -> EngineResult<()> {
        let mut rx = self.progress.clone();
        let progress = rx
            .wait_for(|p| p.error.is_some() || p.state >= wanted)
            .await
            .map_err(|_| EngineError::load(&self.url, "download aborted"))?;
        match &progress.error {
            Some(reason) => Err(EngineError::load(&self.url, reason)),
            None => Ok(()),
        }
    }
}

async fn download(
    request: reqwest::RequestBuilder,
    mut file: tokio::fs::File,
    progress: &watch::Sender<Progress>,
) -> anyhow::Result<()> {
    let response = request.send().await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let total = response.content_length();
    progress.send_modify(|p| p.state = ReadyState::HaveMetadata);

    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        let state = match total {
            Some(t) if received * 2 >= t => ReadyState::HaveFutureData,
            _ => ReadyState::HaveCurrentData,
        };
        progress.send_if_modified(|p| {
            let changed = p.state < state;
            if changed {
                p.state = state;
            }
            changed
        });
    }
    file.flush().await?;
    progress.send_modify(|p| p.state = ReadyState::HaveEnoughData);
    Ok(())
}

#[async_trait]
impl MediaResource for HttpClip {
    fn url(&self) -> &str {
        &self.url
    }

    fn ready_state(&self) -> ReadyState {
        self.progress.borrow().state
    }

    async fn wait_metadata(&self) -> EngineResult<()> {
        self.wait_until(ReadyState::HaveMetadata).await
    }

    async fn wait_playthrough(&self) -> EngineResult<()> {
        self.wait_until(ReadyState::HaveEnoughData).await
    }

    fn locator(&self) -> String {
        self.locator.clone()
    }

    fn stop(&self) {
        self.token.cancel();
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // dropping the TempPath deletes the file
        file.take();
    }
}

impl Drop for HttpClip {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ── output context ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct EndSignal {
    seq: u64,
    error: Option<String>,
}

pub struct MpvContext {
    state: ContextState,
    process: Option<MpvProcess>,
    pump: JoinHandle<()>,
    end_rx: watch::Receiver<EndSignal>,
    analyzer: Option<AnalyzerHandle>,
    locator: Option<String>,
    looping: Arc<AtomicBool>,
    /// Last loop-file value mpv acknowledged.
    loop_sent: Option<bool>,
    tap: Option<JoinHandle<()>>,
}

impl MpvContext {
    pub async fn spawn() -> EngineResult<Self> {
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let process = MpvProcess::spawn(event_tx).await?;
        let (end_tx, end_rx) = watch::channel(EndSignal::default());
        let pump = tokio::spawn(pump_task(event_rx, end_tx));
        Ok(Self {
            state: ContextState::Suspended,
            process: Some(process),
            pump,
            end_rx,
            analyzer: None,
            locator: None,
            looping: Arc::new(AtomicBool::new(false)),
            loop_sent: None,
            tap: None,
        })
    }

    fn handle(&self) -> EngineResult<&MpvHandle> {
        self.process
            .as_ref()
            .map(|p| &p.handle)
            .ok_or_else(|| EngineError::backend("output context closed"))
    }

    fn stop_tap(&mut self) {
        if let Some(tap) = self.tap.take() {
            tap.abort();
        }
    }

    async fn start_tap(&mut self) {
        self.stop_tap();
        let (Some(locator), Some(analyzer)) = (self.locator.clone(), self.analyzer.clone()) else {
            return;
        };
        let Some(ffmpeg) = platform::find_ffmpeg_binary() else {
            warn!("mpv: ffmpeg not found, visual stays silent");
            return;
        };
        let start = match self.handle() {
            Ok(h) => h.time_pos().await.unwrap_or(0.0),
            Err(_) => 0.0,
        };
        let looping = Arc::clone(&self.looping);
        self.tap = Some(tokio::spawn(async move {
            let mut start = start;
            loop {
                if let Err(e) = run_tap(&ffmpeg, &locator, start, &analyzer).await {
                    debug!("tap: {}", e);
                    break;
                }
                if !looping.load(Ordering::Relaxed) {
                    break;
                }
                start = 0.0;
            }
        }));
    }
}

/// Turn mpv `end-file` events into end-of-track signals.  Only natural
/// ends and errors count; `stop`/`redirect` come from our own commands.
async fn pump_task(mut event_rx: mpsc::Receiver<MpvEvent>, end_tx: watch::Sender<EndSignal>) {
    while let Some(evt) = event_rx.recv().await {
        if evt.event_name() != Some("end-file") {
            continue;
        }
        match evt.end_reason() {
            Some("eof") => end_tx.send_modify(|s| {
                s.seq += 1;
                s.error = None;
            }),
            Some("error") => {
                let reason = evt
                    .raw
                    .get("file_error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("playback error")
                    .to_string();
                end_tx.send_modify(|s| {
                    s.seq += 1;
                    s.error = Some(reason);
                });
            }
            other => debug!("mpv: end-file reason={:?}", other),
        }
    }
    debug!("mpv: event pump exiting");
}

const TAP_SAMPLE_RATE: u32 = 44100;
const TAP_CHUNK_SAMPLES: usize = 512;

/// Decode `locator` to mono s16le at real-time pace and feed the analyzer.
async fn run_tap(ffmpeg: &Path, locator: &str, start_secs: f64, analyzer: &Analyzer) -> anyhow::Result<()> {
    let rate = TAP_SAMPLE_RATE.to_string();
    let start = format!("{:.3}", start_secs.max(0.0));
    let mut child = tokio::process::Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-re", "-ss"])
        .arg(&start)
        .arg("-i")
        .arg(locator)
        .args(["-vn", "-ac", "1", "-ar", &rate, "-f", "s16le", "pipe:1"])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout unavailable"))?;
    let mut buf = vec![0u8; TAP_CHUNK_SAMPLES * 2];
    let mut carry: Option<u8> = None;
    let mut samples = Vec::with_capacity(TAP_CHUNK_SAMPLES + 1);

    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        samples.clear();
        let mut bytes = buf[..n].iter().copied();
        if let Some(lo) = carry.take() {
            if let Some(hi) = bytes.next() {
                samples.push(i16::from_le_bytes([lo, hi]) as f32 / 32768.0);
            }
        }
        loop {
            match (bytes.next(), bytes.next()) {
                (Some(lo), Some(hi)) => samples.push(i16::from_le_bytes([lo, hi]) as f32 / 32768.0),
                (Some(lo), None) => {
                    carry = Some(lo);
                    break;
                }
                _ => break,
            }
        }
        analyzer.push_samples(&samples);
    }

    let status = child.wait().await?;
    if !status.success() {
        anyhow::bail!("ffmpeg exited: {}", status);
    }
    Ok(())
}

#[async_trait]
impl OutputContext for MpvContext {
    fn state(&self) -> ContextState {
        self.state
    }

    async fn resume(&mut self) -> EngineResult<()> {
        if self.state == ContextState::Closed {
            return Err(EngineError::backend("output context closed"));
        }
        self.state = ContextState::Running;
        Ok(())
    }

    fn create_analyzer(&mut self, settings: AnalyzerSettings) -> AnalyzerHandle {
        let analyzer = Analyzer::new(settings);
        self.analyzer = Some(Arc::clone(&analyzer));
        analyzer
    }

    async fn connect(
        &mut self,
        source: Arc<dyn MediaResource>,
        analyzer: AnalyzerHandle,
    ) -> EngineResult<()> {
        let locator = source.locator();
        self.handle()?
            .loadfile(&locator)
            .await
            .map_err(|e| EngineError::load(source.url(), e))?;
        // anything signalled before this file is stale
        self.end_rx.borrow_and_update();
        self.locator = Some(locator);
        self.analyzer = Some(analyzer);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stop_tap();
        if let Ok(h) = self.handle() {
            let _ = h.stop().await;
        }
        if let Some(a) = &self.analyzer {
            a.reset();
        }
        self.locator = None;
    }

    async fn play(&mut self) -> EngineResult<()> {
        if self.locator.is_none() {
            return Err(EngineError::backend("nothing connected"));
        }
        self.handle()?.set_pause(false).await.map_err(EngineError::backend)?;
        if self.tap.as_ref().map_or(true, |t| t.is_finished()) {
            self.start_tap().await;
        }
        Ok(())
    }

    async fn pause(&mut self) -> EngineResult<()> {
        self.handle()?.set_pause(true).await.map_err(EngineError::backend)?;
        self.stop_tap();
        if let Some(a) = &self.analyzer {
            a.reset();
        }
        Ok(())
    }

    async fn set_looping(&mut self, looping: bool) -> EngineResult<()> {
        if self.loop_sent == Some(looping) {
            return Ok(());
        }
        self.handle()?.set_loop_file(looping).await.map_err(EngineError::backend)?;
        self.looping.store(looping, Ordering::Relaxed);
        self.loop_sent = Some(looping);
        Ok(())
    }

    async fn ended(&mut self) -> EngineResult<()> {
        self.end_rx
            .changed()
            .await
            .map_err(|_| EngineError::backend("mpv event stream closed"))?;
        let signal = self.end_rx.borrow_and_update().clone();
        match signal.error {
            Some(reason) => Err(EngineError::load(self.locator.as_deref().unwrap_or("?"), reason)),
            None => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.stop_tap();
        self.pump.abort();
        if let Some(process) = self.process.take() {
            process.shutdown().await;
        }
        self.state = ContextState::Closed;
    }
}

impl Drop for MpvContext {
    fn drop(&mut self) {
        self.stop_tap();
        self.pump.abort();
        if let Some(process) = &self.process {
            for task in &process.io_tasks {
                task.abort();
            }
        }
    }
}

// ── backend ───────────────────────────────────────────────────────────────────

pub struct MpvBackend {
    client: reqwest::Client,
}

impl MpvBackend {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("clipfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AudioBackend for MpvBackend {
    async fn open(&self, url: &str) -> EngineResult<Arc<dyn MediaResource>> {
        let clip = HttpClip::open(&self.client, url).await?;
        Ok(clip)
    }

    async fn create_context(&self) -> EngineResult<Box<dyn OutputContext>> {
        let ctx = MpvContext::spawn().await?;
        Ok(Box::new(ctx))
    }
}
