//! Raised-cosine fade curve shared by fade-in, fade-out, pause and resume
//! transitions and by the music duck ramp.

use std::f32::consts::PI;

/// Raised-cosine ease: `sin(π(t − 0.5))·0.5 + 0.5`.
///
/// Zero slope at both ends. The endpoints are exact: `t <= 0` gives 0 and
/// `t >= 1` gives 1.
pub fn raised_cosine(t: f32) -> f32 {
    if t <= 0.0 {
        0.0
    } else if t >= 1.0 {
        1.0
    } else {
        (PI * (t - 0.5)).sin() * 0.5 + 0.5
    }
}

/// Interpolate between `from` and `to` at normalized progress `t` using the
/// raised-cosine ease. `t` is clamped to [0, 1] and the ends land exactly on
/// `from` and `to`.
pub fn sample(from: f32, to: f32, t: f32) -> f32 {
    if t <= 0.0 {
        return from;
    }
    if t >= 1.0 {
        return to;
    }
    from + (to - from) * raised_cosine(t)
}

/// Result of advancing a [`Fade`] by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeStep {
    /// Volume to apply this tick.
    pub value: f32,
    /// Whether the fade reached its end on this tick.
    pub done: bool,
}

/// A single fade from one volume to another over a fixed duration.
///
/// Pure function of accumulated elapsed time. Elapsed may start negative to
/// hold at `from` until a delayed sound becomes audible.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fade {
    elapsed: f32,
    rate: f32,
    from: f32,
    to: f32,
}

impl Fade {
    pub fn new(duration: f32, from: f32, to: f32) -> Self {
        let rate = if duration > 0.0 {
            1.0 / duration
        } else {
            f32::MAX
        };
        Self {
            elapsed: 0.0,
            rate,
            from,
            to,
        }
    }

    /// Start the fade with some time already elapsed (negative delays it).
    pub fn starting_at(mut self, elapsed: f32) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Unclamped progress `elapsed * rate`; the fade is done at 1.
    pub fn progress(&self) -> f32 {
        self.elapsed * self.rate
    }

    pub fn is_done(&self) -> bool {
        self.progress() >= 1.0
    }

    /// Volume at the current elapsed time.
    pub fn value(&self) -> f32 {
        sample(self.from, self.to, self.progress())
    }

    /// Advance by `delta` seconds and report the new volume.
    pub fn advance(&mut self, delta: f32) -> FadeStep {
        self.elapsed += delta.max(0.0);
        FadeStep {
            value: self.value(),
            done: self.is_done(),
        }
    }
}
