//! Resonance Core - Frame time and timers for the Resonance audio engine
//!
//! This crate provides the services the playback engine is driven by:
//! - Frame clock with an unscaled delta that ignores game pause
//! - One-shot delayed timers with cancellable handles

pub mod time;
pub mod timer;

pub use time::{ClockConfig, FrameClock};
pub use timer::{TimerHandle, TimerQueue};
