//! Audio-reactive visual: a drifting, hue-cycling radial glow with an opaque
//! disc in the middle that pinches shut while the next track loads.
//!
//! `RenderLoop::tick` advances the smoothed state once per display refresh
//! and returns a `FrameDescription`, a pure description of the frame that
//! the UI samples per pixel.  Nothing here touches the audio graph; the
//! caller hands in the latest analyzer bytes.

use clipfeed_proto::config::RenderConfig;

/// Base hue drift, degrees per wall-clock millisecond.
const HUE_DEG_PER_MS: f64 = 0.02;
/// Focal point orbit: radius `ORBIT_BASE + ORBIT_GAIN * avg`.
const ORBIT_BASE: f32 = 50.0;
const ORBIT_GAIN: f32 = 50.0;
const ORBIT_RAD_PER_MS: f64 = 0.001;
/// Glow reach as a fraction of the short side: `GLOW_BASE + GLOW_GAIN * avg`.
const GLOW_BASE: f32 = 0.4;
const GLOW_GAIN: f32 = 0.2;
/// Per-stop alpha at silence and how much the average adds on top.
const STOP_ALPHA_MIN: [f32; 3] = [0.45, 0.25, 0.10];
const STOP_ALPHA_GAIN: [f32; 3] = [0.55, 0.45, 0.30];
const STOP_OFFSETS: [f32; 3] = [0.0, 0.5, 1.0];
const HUE_OFFSETS: [f32; 3] = [0.0, 60.0, 180.0];

pub const BACKGROUND: Rgb = Rgb::new(0, 0, 0);
pub const DISC: Rgb = Rgb::new(14, 14, 18);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn to_unit(self) -> [f32; 3] {
        [self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0]
    }

    fn from_unit(c: [f32; 3]) -> Self {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::new(q(c[0]), q(c[1]), q(c[2]))
    }
}

/// Mean of the analyzer bytes scaled into `0.0..=1.0`.
pub fn normalized_average(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    (sum as f32 / bins.len() as f32 / 256.0).clamp(0.0, 1.0)
}

fn hsl_to_rgb(hue_deg: f32, s: f32, l: f32) -> Rgb {
    let h = hue_deg.rem_euclid(360.0) / 60.0;
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    Rgb::from_unit([r + m, g + m, b + m])
}

/// `1 - (1 - dst)(1 - src·alpha)` per channel.
fn screen(dst: Rgb, src: Rgb, alpha: f32) -> Rgb {
    let d = dst.to_unit();
    let s = src.to_unit();
    let a = alpha.clamp(0.0, 1.0);
    Rgb::from_unit([
        1.0 - (1.0 - d[0]) * (1.0 - s[0] * a),
        1.0 - (1.0 - d[1]) * (1.0 - s[1] * a),
        1.0 - (1.0 - d[2]) * (1.0 - s[2] * a),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub occlusion_radius: f32,
    pub pinched_radius: f32,
    pub radius_smoothing: f32,
    pub focal_smoothing: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

impl RenderSettings {
    pub fn from_config(cfg: &RenderConfig) -> Self {
        Self {
            occlusion_radius: cfg.occlusion_radius,
            pinched_radius: cfg.pinched_radius,
            radius_smoothing: cfg.radius_smoothing.clamp(0.0, 1.0),
            focal_smoothing: cfg.focal_smoothing.clamp(0.0, 1.0),
        }
    }
}

/// Smoothed parameters carried from one frame to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualState {
    pub radius: f32,
    pub radius_target: f32,
    pub focal: (f32, f32),
    pub focal_target: (f32, f32),
    pub hue_base: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub offset: f32,
    pub color: Rgb,
    pub alpha: f32,
}

/// Everything needed to paint one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescription {
    pub width: f32,
    pub height: f32,
    pub center: (f32, f32),
    pub focal: (f32, f32),
    pub glow_radius: f32,
    pub stops: [ColorStop; 3],
    pub occlusion_radius: f32,
    pub average: f32,
}

impl FrameDescription {
    fn glow_at(&self, t: f32) -> Option<(Rgb, f32)> {
        if t >= 1.0 {
            return None;
        }
        let idx = self
            .stops
            .windows(2)
            .position(|w| t <= w[1].offset)
            .unwrap_or(self.stops.len() - 2);
        let (a, b) = (self.stops[idx], self.stops[idx + 1]);
        let span = (b.offset - a.offset).max(f32::EPSILON);
        let k = ((t - a.offset) / span).clamp(0.0, 1.0);
        let ca = a.color.to_unit();
        let cb = b.color.to_unit();
        let color = Rgb::from_unit([
            ca[0] + (cb[0] - ca[0]) * k,
            ca[1] + (cb[1] - ca[1]) * k,
            ca[2] + (cb[2] - ca[2]) * k,
        ]);
        // fade to nothing at the rim
        let alpha = (a.alpha + (b.alpha - a.alpha) * k) * (1.0 - t);
        Some((color, alpha))
    }

    /// Colour of the virtual pixel at `(x, y)`.
    pub fn sample(&self, x: f32, y: f32) -> Rgb {
        let (cx, cy) = self.center;
        if (x - cx).hypot(y - cy) <= self.occlusion_radius {
            return DISC;
        }
        let (fx, fy) = self.focal;
        let t = (x - fx).hypot(y - fy) / self.glow_radius.max(f32::EPSILON);
        match self.glow_at(t) {
            Some((color, alpha)) => screen(BACKGROUND, color, alpha),
            None => BACKGROUND,
        }
    }
}

pub struct RenderLoop {
    settings: RenderSettings,
    width: f32,
    height: f32,
    pending_size: Option<(f32, f32)>,
    state: VisualState,
}

impl RenderLoop {
    pub fn new(settings: RenderSettings, width: f32, height: f32) -> Self {
        let center = (width / 2.0, height / 2.0);
        Self {
            settings,
            width,
            height,
            pending_size: None,
            state: VisualState {
                radius: settings.occlusion_radius,
                radius_target: settings.occlusion_radius,
                focal: center,
                focal_target: center,
                hue_base: 0.0,
            },
        }
    }

    pub fn state(&self) -> &VisualState {
        &self.state
    }

    pub fn size(&self) -> (f32, f32) {
        self.pending_size.unwrap_or((self.width, self.height))
    }

    /// Picked up on the next tick.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.pending_size = Some((width, height));
    }

    /// Collapse the disc; called when the track changes.
    pub fn pinch(&mut self) {
        self.state.radius_target = self.settings.pinched_radius;
    }

    /// Open the disc again once the new track is ready.
    pub fn release(&mut self) {
        self.state.radius_target = self.settings.occlusion_radius;
    }

    /// Advance one frame.  `spectrum` is the analyzer's byte output (empty
    /// when nothing is connected).
    pub fn tick(&mut self, now_ms: f64, spectrum: &[u8]) -> FrameDescription {
        if let Some((w, h)) = self.pending_size.take() {
            self.width = w;
            self.height = h;
        }
        let avg = normalized_average(spectrum);
        let center = (self.width / 2.0, self.height / 2.0);
        let s = &mut self.state;

        s.radius += (s.radius_target - s.radius) * self.settings.radius_smoothing;

        let angle = (now_ms * ORBIT_RAD_PER_MS) as f32;
        let orbit = ORBIT_BASE + ORBIT_GAIN * avg;
        s.focal_target = (center.0 + orbit * angle.cos(), center.1 + orbit * angle.sin());
        let k = self.settings.focal_smoothing;
        s.focal.0 += (s.focal_target.0 - s.focal.0) * k;
        s.focal.1 += (s.focal_target.1 - s.focal.1) * k;

        s.hue_base = ((now_ms * HUE_DEG_PER_MS) % 360.0) as f32;

        let short_side = self.width.min(self.height);
        let glow_radius = (GLOW_BASE + GLOW_GAIN * avg) * short_side;

        let stops = std::array::from_fn(|i| ColorStop {
            offset: STOP_OFFSETS[i],
            color: hsl_to_rgb(s.hue_base + HUE_OFFSETS[i], 0.8, 0.55),
            alpha: STOP_ALPHA_MIN[i] + STOP_ALPHA_GAIN[i] * avg,
        });

        FrameDescription {
            width: self.width,
            height: self.height,
            center,
            focal: s.focal,
            glow_radius,
            stops,
            occlusion_radius: s.radius.max(0.0),
            average: avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: f64 = 1000.0 / 60.0;

    #[test]
    fn average_of_bytes() {
        assert_eq!(normalized_average(&[]), 0.0);
        assert_eq!(normalized_average(&[0; 128]), 0.0);
        let loud = normalized_average(&[255; 128]);
        assert!(loud > 0.99 && loud < 1.0);
        assert!((normalized_average(&[128, 0]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn silence_relaxes_to_baseline_with_minimum_alphas() {
        let settings = RenderSettings::default();
        let mut r = RenderLoop::new(settings, 640.0, 384.0);
        r.pinch();
        for i in 0..20 {
            r.tick(i as f64 * FRAME_MS, &[0; 128]);
        }
        assert!(r.state().radius < settings.occlusion_radius * 0.5);

        r.release();
        let mut frame = r.tick(0.0, &[0; 128]);
        for i in 0..200 {
            frame = r.tick(i as f64 * FRAME_MS, &[0; 128]);
        }
        assert!((frame.occlusion_radius - settings.occlusion_radius).abs() < 0.01);
        assert_eq!(frame.average, 0.0);
        for (stop, min) in frame.stops.iter().zip(STOP_ALPHA_MIN) {
            assert_eq!(stop.alpha, min);
        }
        assert!((frame.glow_radius - 0.4 * 384.0).abs() < 1e-3);
    }

    #[test]
    fn radius_eases_by_a_tenth_per_tick() {
        let settings = RenderSettings::default();
        let mut r = RenderLoop::new(settings, 640.0, 384.0);
        r.pinch();
        let frame = r.tick(0.0, &[]);
        let expected = 60.0 + (6.0 - 60.0) * 0.1;
        assert!((frame.occlusion_radius - expected).abs() < 1e-4);
    }

    #[test]
    fn focal_point_lags_its_orbit() {
        let mut r = RenderLoop::new(RenderSettings::default(), 640.0, 384.0);
        let frame = r.tick(0.0, &[0; 128]);
        // angle 0, orbit 50: target is 50px right of centre, focal moved 2% of it
        assert_eq!(r.state().focal_target, (370.0, 192.0));
        assert!((frame.focal.0 - 321.0).abs() < 1e-4);
        assert!((frame.focal.1 - 192.0).abs() < 1e-4);

        let loud = r.tick(0.0, &[255; 128]);
        let orbit = r.state().focal_target.0 - 320.0;
        assert!(orbit > 99.0);
        assert!(loud.glow_radius > frame.glow_radius);
    }

    #[test]
    fn resize_applies_on_next_tick() {
        let mut r = RenderLoop::new(RenderSettings::default(), 640.0, 384.0);
        r.resize(200.0, 100.0);
        assert_eq!(r.size(), (200.0, 100.0));
        let frame = r.tick(0.0, &[]);
        assert_eq!(frame.center, (100.0, 50.0));
        assert!((frame.glow_radius - 40.0).abs() < 1e-4);
    }

    #[test]
    fn disc_covers_the_true_centre() {
        let mut r = RenderLoop::new(RenderSettings::default(), 640.0, 384.0);
        let frame = r.tick(500.0, &[200; 128]);
        assert_eq!(frame.sample(320.0, 192.0), DISC);
        // far corner lies outside the glow
        assert_eq!(frame.sample(0.0, 0.0), BACKGROUND);
        // just outside the disc the glow shows through
        let lit = frame.sample(320.0 + frame.occlusion_radius + 4.0, 192.0);
        assert_ne!(lit, BACKGROUND);
        assert_ne!(lit, DISC);
    }

    #[test]
    fn hues_cycle_with_wall_clock() {
        let mut r = RenderLoop::new(RenderSettings::default(), 640.0, 384.0);
        let a = r.tick(0.0, &[]);
        let b = r.tick(3000.0, &[]);
        assert_ne!(a.stops[0].color, b.stops[0].color);
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), Rgb::new(255, 0, 0));
        assert_eq!(hsl_to_rgb(360.0 + 120.0, 1.0, 0.5), Rgb::new(0, 255, 0));
    }
}
