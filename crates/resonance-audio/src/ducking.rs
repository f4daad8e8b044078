use crate::fade::Fade;

/// Animated ceiling on the music bus, lowered while voice lines play.
#[derive(Debug, Clone)]
pub struct MusicDuck {
    limit: f32,
    ramp: Option<Fade>,
    ducked_limit: f32,
    duration: f32,
}

impl MusicDuck {
    pub fn new(ducked_limit: f32, duration: f32) -> Self {
        Self {
            limit: 1.0,
            ramp: None,
            ducked_limit,
            duration,
        }
    }

    /// Current ceiling (0.0–1.0).
    pub fn limit(&self) -> f32 {
        self.limit
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    /// Start ramping down toward the ducked ceiling from wherever we are now.
    pub fn duck(&mut self) {
        self.ramp = Some(Fade::new(self.duration, self.limit, self.ducked_limit));
    }

    /// Start ramping back up to full volume.
    pub fn release(&mut self) {
        self.ramp = Some(Fade::new(self.duration, self.limit, 1.0));
    }

    /// Advance the ramp. Returns the new ceiling while a ramp is running,
    /// including the tick it finishes on.
    pub fn update(&mut self, delta: f32) -> Option<f32> {
        let ramp = self.ramp.as_mut()?;
        let step = ramp.advance(delta);
        self.limit = step.value;
        if step.done {
            self.ramp = None;
        }
        Some(self.limit)
    }
}
