//! Paints a `FrameDescription` with upper half blocks: two virtual pixels per
//! terminal cell, each cell standing for an 8×16 patch of the virtual canvas.

use clipfeed_engine::render::{FrameDescription, Rgb};
use ratatui::{buffer::Buffer, layout::Rect, style::Color, widgets::Widget};

pub const CELL_PX_W: f32 = 8.0;
pub const CELL_PX_H: f32 = 16.0;

/// Virtual canvas size for a widget area.
pub fn canvas_size(area: Rect) -> (f32, f32) {
    (area.width as f32 * CELL_PX_W, area.height as f32 * CELL_PX_H)
}

pub struct Visualizer<'a> {
    frame: &'a FrameDescription,
}

impl<'a> Visualizer<'a> {
    pub fn new(frame: &'a FrameDescription) -> Self {
        Self { frame }
    }
}

fn color(c: Rgb) -> Color {
    Color::Rgb(c.r, c.g, c.b)
}

impl Widget for Visualizer<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for row in 0..area.height {
            // sample the middle of each half cell
            let top_y = row as f32 * CELL_PX_H + CELL_PX_H * 0.25;
            let bottom_y = row as f32 * CELL_PX_H + CELL_PX_H * 0.75;
            for col in 0..area.width {
                let x = col as f32 * CELL_PX_W + CELL_PX_W * 0.5;
                let top = self.frame.sample(x, top_y);
                let bottom = self.frame.sample(x, bottom_y);
                if let Some(cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    cell.set_symbol("▀").set_fg(color(top)).set_bg(color(bottom));
                }
            }
        }
    }
}
