//! Single-slot playback state shared between the speech path and the avatar window.
//!
//! One writer (the chat path) and one reader (the display loop). Both fields
//! are packed into one `AtomicU64`, so a read always sees a pair that was
//! written together. Relaxed ordering is enough: the window only needs to see
//! the newest state eventually, and nothing else is published through it.

use std::sync::atomic::{AtomicU64, Ordering};

const PLAYING_BIT: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub duration_secs: f32,
}

impl PlaybackState {
    pub const IDLE: Self = Self {
        is_playing: false,
        duration_secs: -1.0,
    };

    pub fn playing(duration_secs: f32) -> Self {
        Self {
            is_playing: true,
            duration_secs,
        }
    }

    fn pack(self) -> u64 {
        let flag = if self.is_playing { PLAYING_BIT } else { 0 };
        flag | u64::from(self.duration_secs.to_bits())
    }

    fn unpack(bits: u64) -> Self {
        Self {
            is_playing: bits & PLAYING_BIT != 0,
            duration_secs: f32::from_bits(bits as u32),
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::IDLE
    }
}

#[derive(Debug)]
pub struct PlaybackCell(AtomicU64);

impl PlaybackCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(PlaybackState::IDLE.pack()))
    }

    /// Overwrite the current state.
    pub fn set(&self, state: PlaybackState) {
        self.0.store(state.pack(), Ordering::Relaxed);
    }

    pub fn get(&self) -> PlaybackState {
        PlaybackState::unpack(self.0.load(Ordering::Relaxed))
    }
}

impl Default for PlaybackCell {
    fn default() -> Self {
        Self::new()
    }
}
