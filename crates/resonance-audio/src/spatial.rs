use std::fs;
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Listener state for spatial audio calculations.
#[derive(Debug, Clone)]
pub struct Listener {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: -Vec3::Z,
            up: Vec3::Y,
        }
    }
}

/// One key of a rolloff curve, with Hermite tangents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
    #[serde(default)]
    pub in_tangent: f32,
    #[serde(default)]
    pub out_tangent: f32,
}

impl Keyframe {
    pub const fn new(time: f32, value: f32) -> Self {
        Self {
            time,
            value,
            in_tangent: 0.0,
            out_tangent: 0.0,
        }
    }

    pub const fn with_tangents(time: f32, value: f32, in_tangent: f32, out_tangent: f32) -> Self {
        Self {
            time,
            value,
            in_tangent,
            out_tangent,
        }
    }
}

/// Gain as a function of normalized distance (`distance / max_distance`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RolloffCurve {
    keys: Vec<Keyframe>,
}

impl RolloffCurve {
    /// Build a curve from keys; they are sorted by time.
    pub fn new(mut keys: Vec<Keyframe>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    /// Evaluate with cubic Hermite interpolation, holding the end values
    /// outside the key range. An empty curve is silent.
    pub fn evaluate(&self, t: f32) -> f32 {
        let (Some(first), Some(last)) = (self.keys.first(), self.keys.last()) else {
            return 0.0;
        };
        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }

        let upper = self.keys.partition_point(|k| k.time <= t);
        let k0 = self.keys[upper - 1];
        let k1 = self.keys[upper];
        let dt = k1.time - k0.time;
        if dt <= f32::EPSILON {
            return k1.value;
        }

        let s = (t - k0.time) / dt;
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        h00 * k0.value + h10 * dt * k0.out_tangent + h01 * k1.value + h11 * dt * k1.in_tangent
    }
}

/// How a 3D sound loses gain with distance. Handed to the device as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Attenuation {
    /// Inverse-distance falloff starting at `min_distance`, frozen past `max_distance`.
    Logarithmic { min_distance: f32, max_distance: f32 },
    /// Designer-authored curve over `distance / max_distance`.
    Custom {
        min_distance: f32,
        max_distance: f32,
        curve: RolloffCurve,
    },
}

impl Attenuation {
    pub fn min_distance(&self) -> f32 {
        match self {
            Self::Logarithmic { min_distance, .. } | Self::Custom { min_distance, .. } => {
                *min_distance
            }
        }
    }

    pub fn max_distance(&self) -> f32 {
        match self {
            Self::Logarithmic { max_distance, .. } | Self::Custom { max_distance, .. } => {
                *max_distance
            }
        }
    }

    /// Gain factor (0.0–1.0) at the given distance from the listener.
    pub fn gain_at(&self, distance: f32) -> f32 {
        match self {
            Self::Logarithmic {
                min_distance,
                max_distance,
            } => {
                let min = min_distance.max(f32::EPSILON);
                let clamped = distance.clamp(min, max_distance.max(min));
                (min / clamped).clamp(0.0, 1.0)
            }
            Self::Custom {
                max_distance,
                curve,
                ..
            } => {
                let t = if *max_distance > 0.0 {
                    distance / max_distance
                } else {
                    1.0
                };
                curve.evaluate(t.clamp(0.0, 1.0)).clamp(0.0, 1.0)
            }
        }
    }
}

/// Designer-facing 3D attenuation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spatial3dSettings {
    /// Distance inside which sounds play at full gain.
    pub min_distance: f32,
    /// Distance at which the rolloff curve ends.
    pub max_distance: f32,
    /// Rolloff keys over the `[min, max]` range, normalized to `[0, 1]`.
    pub rolloff: Vec<Keyframe>,
}

impl Default for Spatial3dSettings {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            max_distance: 20.0,
            rolloff: vec![
                Keyframe::with_tangents(0.0, 1.0, 0.0, -3.0),
                Keyframe::new(1.0, 0.0),
            ],
        }
    }
}

impl Spatial3dSettings {
    /// Parse settings from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, AudioError> {
        toml::from_str(content).map_err(|e| AudioError::Settings(e.to_string()))
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AudioError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AudioError::Settings(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Rolloff curve over the full `[0, max]` range.
    ///
    /// The authored keys cover `[min, max]`; when `min_distance > 0` they are
    /// squeezed into `[min/max, 1]` behind a flat full-gain key at 0.
    pub fn rolloff_curve(&self) -> RolloffCurve {
        if self.min_distance <= 0.0 || self.max_distance <= 0.0 {
            return RolloffCurve::new(self.rolloff.clone());
        }

        let t0 = (self.min_distance / self.max_distance).min(1.0);
        let t1 = 1.0 - t0;
        let rt1 = if t1 > f32::EPSILON { 1.0 / t1 } else { 0.0 };

        let mut keys = Vec::with_capacity(self.rolloff.len() + 1);
        keys.push(Keyframe::new(0.0, 1.0));
        keys.extend(self.rolloff.iter().map(|k| Keyframe {
            time: k.time * t1 + t0,
            value: k.value,
            in_tangent: k.in_tangent * rt1,
            out_tangent: k.out_tangent * rt1,
        }));
        RolloffCurve::new(keys)
    }

    /// The attenuation handed to the device for 3D sounds.
    pub fn attenuation(&self) -> Attenuation {
        Attenuation::Custom {
            min_distance: self.min_distance,
            max_distance: self.max_distance,
            curve: self.rolloff_curve(),
        }
    }
}

/// Parameters computed for a sound emitter relative to the listener.
#[derive(Debug, Clone, Copy)]
pub struct SpatialParams {
    /// Volume attenuation factor (0.0–1.0).
    pub volume: f32,
    /// Stereo panning (-1.0 = full left, 0.0 = center, 1.0 = full right).
    pub panning: f32,
}

/// Compute spatial audio parameters for an emitter position relative to a listener.
///
/// Gain follows `attenuation`. Panning is derived from the angle between the
/// listener's right vector and the direction to the emitter.
pub fn compute_spatial(
    listener: &Listener,
    emitter_pos: Vec3,
    attenuation: &Attenuation,
) -> SpatialParams {
    let to_emitter = emitter_pos - listener.position;
    let distance = to_emitter.length();

    if distance < f32::EPSILON {
        return SpatialParams {
            volume: 1.0,
            panning: 0.0,
        };
    }

    let right = listener.forward.cross(listener.up).normalize();
    let direction = to_emitter.normalize();
    let panning = direction.dot(right);

    SpatialParams {
        volume: attenuation.gain_at(distance),
        panning: panning.clamp(-1.0, 1.0),
    }
}
