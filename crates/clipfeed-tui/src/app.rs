//! App: terminal setup, input mapping and the draw loop.
//!
//! - A blocking task reads keyboard/mouse events into the app channel.
//! - A forwarder task turns `BroadcastMessage`s from the core into
//!   `AppMessage`s (fetching fresh state for `StateUpdated`).
//! - The render tick advances the `RenderLoop` from the live analyzer and
//!   redraws; everything else only updates state.
//! - Commands go out to the core as `FeedEvent::Command`.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ratatui::crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    Frame, Terminal,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use clipfeed_engine::analyzer::AnalyzerHandle;
use clipfeed_engine::feed::{BroadcastMessage, FeedEvent};
use clipfeed_engine::render::{FrameDescription, RenderLoop, RenderSettings};
use clipfeed_proto::config::Config;
use clipfeed_proto::protocol::{Command, FeedState, SessionPhase, UploadOutcome};
use clipfeed_proto::state::StateManager;

use crate::widgets::status_bar::{draw_keys_bar, draw_now_playing, draw_separator};
use crate::widgets::toast::ToastManager;
use crate::widgets::visualizer::{canvas_size, Visualizer};

/// Rows below the visualizer: now playing, separator, keys.
const FOOTER_ROWS: u16 = 3;
const INPUT_POLL: Duration = Duration::from_millis(100);

enum AppMessage {
    Event(Event),
    StateUpdated(Box<FeedState>),
    TrackChanged(Option<String>),
    Log(String),
    UploadFinished(UploadOutcome),
}

/// Key → command.  `recording` picks which half of the record toggle to send.
pub fn command_for_key(key: &KeyEvent, recording: bool) -> Option<Command> {
    match key.code {
        KeyCode::Char(' ') => Some(Command::PlayPause),
        KeyCode::Right | KeyCode::Down | KeyCode::Char('j') => Some(Command::Next),
        KeyCode::Left | KeyCode::Up | KeyCode::Char('k') => Some(Command::Previous),
        KeyCode::Char('l') => Some(Command::Like),
        KeyCode::Char('r') if recording => Some(Command::RecordStop),
        KeyCode::Char('r') => Some(Command::RecordStart),
        KeyCode::Char('a') => Some(Command::ToggleAutoplay),
        KeyCode::Char('g') => Some(Command::Refresh),
        _ => None,
    }
}

/// Left click taps, the wheel swipes.
pub fn command_for_mouse(mouse: &MouseEvent) -> Option<Command> {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => Some(Command::PlayPause),
        MouseEventKind::ScrollDown => Some(Command::Next),
        MouseEventKind::ScrollUp => Some(Command::Previous),
        _ => None,
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
}

/// The visual only animates while a session holds the current track.
fn session_active(phase: SessionPhase) -> bool {
    phase != SessionPhase::Idle
}

fn visualizer_area(area: Rect) -> Rect {
    Rect {
        height: area.height.saturating_sub(FOOTER_ROWS),
        ..area
    }
}

pub struct App {
    state_manager: Arc<StateManager>,
    state: FeedState,
    analyzer: watch::Receiver<Option<AnalyzerHandle>>,
    event_tx: mpsc::Sender<FeedEvent>,
    render: RenderLoop,
    frame: Option<FrameDescription>,
    fps: u32,
    started: Instant,
    toast: ToastManager,
    should_quit: bool,
}

impl App {
    pub fn new(
        config: &Config,
        state_manager: Arc<StateManager>,
        analyzer: watch::Receiver<Option<AnalyzerHandle>>,
        event_tx: mpsc::Sender<FeedEvent>,
    ) -> Self {
        Self {
            state_manager,
            state: FeedState::default(),
            analyzer,
            event_tx,
            render: RenderLoop::new(RenderSettings::from_config(&config.render), 0.0, 0.0),
            frame: None,
            fps: config.render.fps.clamp(1, 240),
            started: Instant::now(),
            toast: ToastManager::new(),
            should_quit: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self, broadcast_rx: broadcast::Receiver<BroadcastMessage>) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        debug!("run(): terminal created, size={:?}", terminal.size());

        let result = self.event_loop(&mut terminal, broadcast_rx).await;

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;

        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<AppMessage>(1024);

        let size = terminal.size()?;
        let (w, h) = canvas_size(visualizer_area(Rect::new(0, 0, size.width, size.height)));
        self.render.resize(w, h);

        // ── Background task: keyboard/mouse events ────────────────────────────
        // Polls so the thread notices the loop is gone and lets the runtime exit.
        let input_tx = tx.clone();
        tokio::task::spawn_blocking(move || {
            while !input_tx.is_closed() {
                match event::poll(INPUT_POLL) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(_) => break,
                }
                match event::read() {
                    Ok(ev) => {
                        if input_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        // ── Background task: broadcast receiver (FeedCore → AppMessage) ───────
        let bc_tx = tx.clone();
        let bc_state_manager = self.state_manager.clone();
        tokio::spawn(async move {
            loop {
                let msg = match broadcast_rx.recv().await {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcast receiver lagged by {} messages", n);
                        // the next StateUpdated catches us up
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let app_msg = match msg {
                    BroadcastMessage::StateUpdated => {
                        AppMessage::StateUpdated(Box::new(bc_state_manager.get_state().await))
                    }
                    BroadcastMessage::TrackChanged(url) => AppMessage::TrackChanged(url),
                    BroadcastMessage::Log(s) => AppMessage::Log(s),
                    BroadcastMessage::UploadFinished(outcome) => AppMessage::UploadFinished(outcome),
                };
                if bc_tx.send(app_msg).await.is_err() {
                    break;
                }
            }
        });
        drop(tx);

        self.apply_state(self.state_manager.get_state().await);

        // ── Periodic timers ───────────────────────────────────────────────────
        let mut render_tick = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        render_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut toast_tick = tokio::time::interval(Duration::from_millis(100));
        toast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("App: entering draw loop at {} fps", self.fps);
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },

                _ = render_tick.tick() => {
                    if session_active(self.state.phase) {
                        self.advance_frame();
                    } else {
                        self.frame = None;
                    }
                    terminal.draw(|f| self.draw(f))?;
                }

                _ = toast_tick.tick() => {
                    self.toast.tick();
                }
            }

            if self.should_quit {
                break;
            }
        }
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    async fn handle_message(&mut self, msg: AppMessage) {
        match msg {
            AppMessage::Event(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if is_quit(&key) {
                    self.should_quit = true;
                } else if let Some(cmd) = command_for_key(&key, self.state.recording) {
                    self.send(cmd).await;
                }
            }
            AppMessage::Event(Event::Mouse(mouse)) => {
                if let Some(cmd) = command_for_mouse(&mouse) {
                    self.send(cmd).await;
                }
            }
            AppMessage::Event(Event::Resize(width, height)) => {
                let (w, h) = canvas_size(visualizer_area(Rect::new(0, 0, width, height)));
                self.render.resize(w, h);
            }
            AppMessage::Event(_) => {}
            AppMessage::StateUpdated(state) => self.apply_state(*state),
            AppMessage::TrackChanged(url) => {
                debug!("App: track changed to {:?}", url);
                self.render.pinch();
            }
            AppMessage::Log(line) => self.toast.warning(line),
            AppMessage::UploadFinished(UploadOutcome::Uploaded { name }) => {
                self.toast.success(format!("uploaded {}", name));
            }
            AppMessage::UploadFinished(UploadOutcome::Failed { name, message }) => {
                self.toast.error(format!("upload of {} failed: {}", name, message));
            }
        }
    }

    fn apply_state(&mut self, state: FeedState) {
        // older snapshots can arrive after newer ones
        if state.rev < self.state.rev {
            return;
        }
        if state.phase.is_ready() {
            self.render.release();
        }
        if state.loading && !self.toast.has_spinner() {
            self.toast.spinner("loading feed");
        } else if !state.loading && self.toast.has_spinner() {
            self.toast.dismiss_spinner();
        }
        self.state = state;
    }

    async fn send(&self, cmd: Command) {
        if self.event_tx.send(FeedEvent::Command(cmd)).await.is_err() {
            warn!("App: feed core is gone, dropping {:?}", cmd);
        }
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    fn advance_frame(&mut self) {
        let spectrum = self
            .analyzer
            .borrow()
            .as_ref()
            .map(|a| a.byte_frequency_data())
            .unwrap_or_default();
        let now_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.frame = Some(self.render.tick(now_ms, &spectrum));
    }

    fn draw(&self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(f.area());

        if let Some(frame) = &self.frame {
            f.render_widget(Visualizer::new(frame), chunks[0]);
        }
        draw_now_playing(f, chunks[1], &self.state);
        draw_separator(f, chunks[2]);
        draw_keys_bar(f, chunks[3], self.state.recording);
        self.toast.draw(f, chunks[0]);
    }
}
