//! Feed sequencer: the track list, its shuffled traversal order and the
//! current position.
//!
//! `current_index` is always kept reduced modulo the play-order length, so
//! `tracks[play_order[current_index]]` is the current track whenever the list
//! is non-empty.  Every operation is total on an empty list.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::protocol::Track;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedSequencer {
    tracks: Vec<Track>,
    play_order: Vec<usize>,
    current_index: usize,
    /// Continue to the next track when one finishes.
    autoplay: bool,
    /// The user wants sound right now (play/pause intent).
    playing: bool,
}

/// Uniform random permutation of `0..n` (Fisher–Yates via `SliceRandom`).
pub fn shuffled_order<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    order
}

impl FeedSequencer {
    pub fn new(autoplay: bool) -> Self {
        Self {
            autoplay,
            ..Self::default()
        }
    }

    /// Build a sequencer with an explicit play order.  Fails unless `order`
    /// is a permutation of `0..tracks.len()`.
    pub fn with_order(tracks: Vec<Track>, order: Vec<usize>, autoplay: bool) -> anyhow::Result<Self> {
        anyhow::ensure!(
            order.len() == tracks.len(),
            "play order has {} entries for {} tracks",
            order.len(),
            tracks.len()
        );
        let mut seen = vec![false; tracks.len()];
        for &idx in &order {
            anyhow::ensure!(idx < tracks.len(), "play order index {} out of range", idx);
            anyhow::ensure!(!seen[idx], "play order repeats index {}", idx);
            seen[idx] = true;
        }
        Ok(Self {
            tracks,
            play_order: order,
            current_index: 0,
            autoplay,
            playing: false,
        })
    }

    /// Replace the whole list with a fresh fetch: new shuffled order,
    /// position back to the start.
    pub fn replace_tracks(&mut self, tracks: Vec<Track>) {
        self.replace_tracks_with(tracks, &mut rand::thread_rng());
    }

    pub fn replace_tracks_with<R: Rng + ?Sized>(&mut self, tracks: Vec<Track>, rng: &mut R) {
        self.play_order = shuffled_order(tracks.len(), rng);
        self.tracks = tracks;
        self.current_index = 0;
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn play_order(&self) -> &[usize] {
        &self.play_order
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn len(&self) -> usize {
        self.play_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.play_order.is_empty()
    }

    /// Track at `offset` steps from the current position, wrapping.
    fn track_at_offset(&self, offset: isize) -> Option<&Track> {
        let n = self.play_order.len();
        if n == 0 {
            return None;
        }
        let pos = (self.current_index as isize + offset).rem_euclid(n as isize) as usize;
        self.tracks.get(self.play_order[pos])
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.track_at_offset(0)
    }

    /// Advance one position with wraparound.  Always sets the playing intent.
    pub fn next(&mut self) -> Option<&Track> {
        let n = self.play_order.len();
        if n > 0 {
            self.current_index = (self.current_index % n + 1) % n;
        }
        self.playing = true;
        self.current_track()
    }

    /// Step back one position with wraparound.  Always sets the playing intent.
    pub fn previous(&mut self) -> Option<&Track> {
        let n = self.play_order.len();
        if n > 0 {
            self.current_index = (self.current_index % n + n - 1) % n;
        }
        self.playing = true;
        self.current_track()
    }

    /// Flip `liked` on the current track.  Returns the new value.
    pub fn toggle_like(&mut self) -> Option<bool> {
        let n = self.play_order.len();
        if n == 0 {
            return None;
        }
        let idx = self.play_order[self.current_index % n];
        let current = self.tracks.get(idx)?;
        let updated = Track {
            liked: !current.liked,
            ..current.clone()
        };
        let liked = updated.liked;
        self.tracks[idx] = updated;
        Some(liked)
    }

    /// URLs of the next `count` tracks in play order, excluding the current
    /// one and never repeating.
    pub fn upcoming(&self, count: usize) -> Vec<String> {
        let limit = count.min(self.len().saturating_sub(1));
        (1..=limit as isize)
            .filter_map(|off| self.track_at_offset(off))
            .map(|t| t.url.clone())
            .collect()
    }

    /// URLs of the previous `count` tracks in play order (nearest first).
    pub fn preceding(&self, count: usize) -> Vec<String> {
        let limit = count.min(self.len().saturating_sub(1));
        (1..=limit as isize)
            .filter_map(|off| self.track_at_offset(-off))
            .map(|t| t.url.clone())
            .collect()
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    pub fn toggle_autoplay(&mut self) -> bool {
        self.autoplay = !self.autoplay;
        self.autoplay
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }
}
