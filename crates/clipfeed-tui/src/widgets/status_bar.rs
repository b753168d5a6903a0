//! Bottom rows: now-playing line, separator, key hints.

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use clipfeed_proto::protocol::{FeedState, SessionPhase};

use crate::theme::{
    style_default, style_muted, style_secondary, C_ACCENT, C_CONNECTING, C_ERROR, C_LIKED,
    C_MUTED, C_PLAYING, C_RECORDING, C_SEPARATOR,
};

fn phase_color(phase: SessionPhase) -> Color {
    match phase {
        SessionPhase::Playing => C_PLAYING,
        SessionPhase::Acquiring | SessionPhase::Buffering | SessionPhase::Ready => C_CONNECTING,
        SessionPhase::AwaitingGesture => C_ACCENT,
        SessionPhase::Failed { .. } => C_ERROR,
        _ => C_MUTED,
    }
}

/// Spans for the now-playing line.
pub fn now_playing_spans(state: &FeedState) -> Vec<Span<'static>> {
    let mut spans = Vec::new();

    if state.recording {
        spans.push(Span::styled(
            "● REC ",
            Style::default().fg(C_RECORDING).add_modifier(Modifier::BOLD),
        ));
    }

    match state.current_track() {
        Some(track) => {
            spans.push(Span::styled(
                format!(
                    "{}/{} ",
                    state.sequencer.current_index() + 1,
                    state.sequencer.len()
                ),
                style_muted(),
            ));
            spans.push(Span::styled(track.display_name.clone(), style_default()));
            if track.liked {
                spans.push(Span::styled(" ♥", Style::default().fg(C_LIKED)));
            }
        }
        None if state.loading => spans.push(Span::styled("loading feed…", style_secondary())),
        None => spans.push(Span::styled("no clips", style_secondary())),
    }

    spans.push(Span::raw("  "));
    spans.push(Span::styled(
        state.phase.label(),
        Style::default().fg(phase_color(state.phase)),
    ));
    spans.push(Span::styled(
        if state.sequencer.autoplay() { "  autoplay" } else { "  loop" },
        style_muted(),
    ));

    if let Some(err) = &state.load_error {
        spans.push(Span::styled(format!("  {}", err), Style::default().fg(C_ERROR)));
    }
    spans
}

pub fn draw_now_playing(frame: &mut Frame, area: Rect, state: &FeedState) {
    frame.render_widget(Paragraph::new(Line::from(now_playing_spans(state))), area);
}

pub fn draw_separator(frame: &mut Frame, area: Rect) {
    let line = Line::from(Span::styled(
        "─".repeat(area.width as usize),
        Style::default().fg(C_SEPARATOR),
    ));
    frame.render_widget(Paragraph::new(line), area);
}

pub fn draw_keys_bar(frame: &mut Frame, area: Rect, recording: bool) {
    let record = if recording { "stop rec" } else { "record" };
    let hints = [
        ("space", "play/pause"),
        ("↑↓", "prev/next"),
        ("l", "like"),
        ("r", record),
        ("a", "autoplay"),
        ("q", "quit"),
    ];
    let mut spans = Vec::with_capacity(hints.len() * 3);
    for (key, label) in hints {
        spans.push(Span::styled(key, style_secondary()));
        spans.push(Span::styled(format!(" {}", label), style_muted()));
        spans.push(Span::raw("  "));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
