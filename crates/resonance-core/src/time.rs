//! Frame clock for the Resonance audio engine
//!
//! Tracks scaled game time alongside an unscaled clock. Audio runs off the
//! unscaled delta so fades and timers keep advancing while the game is paused.

use serde::{Deserialize, Serialize};

/// Configuration for the frame clock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// How many game seconds pass per real second
    pub time_scale: f32,
    /// Maximum delta time accepted for a single frame
    pub max_delta_time: f32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            max_delta_time: 0.25,
        }
    }
}

/// Per-frame time tracking
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    /// Configuration
    pub config: ClockConfig,
    /// Scaled game time since start in seconds (stops while paused)
    pub total_time: f64,
    /// Unscaled time since start in seconds (never stops)
    pub unscaled_time: f64,
    /// Scaled delta for this frame
    pub delta_time: f32,
    /// Unscaled delta for this frame
    pub unscaled_delta_time: f32,
    /// Frame counter
    pub frame_count: u64,
    /// Whether the game is paused
    pub paused: bool,
}

impl FrameClock {
    /// Create a new clock with custom config
    pub fn new(config: ClockConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Advance the clock with the raw delta from the previous frame.
    ///
    /// Returns the unscaled delta, which is what per-frame audio ticks consume.
    pub fn tick(&mut self, raw_delta: f32) -> f32 {
        self.unscaled_delta_time = raw_delta.clamp(0.0, self.config.max_delta_time);
        self.unscaled_time += self.unscaled_delta_time as f64;
        self.frame_count += 1;

        if self.paused {
            self.delta_time = 0.0;
        } else {
            self.delta_time = self.unscaled_delta_time * self.config.time_scale;
            self.total_time += self.delta_time as f64;
        }

        self.unscaled_delta_time
    }

    /// Pause scaled time
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume scaled time
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Set the time scale (0.0 = frozen, 1.0 = normal)
    pub fn set_time_scale(&mut self, scale: f32) {
        self.config.time_scale = scale.max(0.0);
    }
}
