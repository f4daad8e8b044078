/// Tunable constants for the playback engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Crossfade used when one music track replaces another (seconds).
    pub music_crossfade: f32,
    /// Fade used by `pause(.., true)` and `resume(.., true)` (seconds).
    pub pause_fade: f32,
    /// Ceiling applied to the music bus while voice lines play (0.0–1.0).
    pub duck_limit: f32,
    /// Length of the duck and un-duck ramps (seconds).
    pub duck_duration: f32,
    /// Attenuation range used for 3D sounds when no 3D settings are installed.
    pub default_min_distance: f32,
    pub default_max_distance: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            music_crossfade: 1.0,
            pause_fade: 1.0,
            duck_limit: 0.2,
            duck_duration: 2.0,
            default_min_distance: 1.0,
            default_max_distance: 1000.0,
        }
    }
}

/// Silence, in decibels.
pub const DB_FLOOR: f32 = -80.0;

/// Settings-store key for the persisted music volume.
pub const KEY_MUSIC_VOLUME: &str = "music_volume";

/// Settings-store key for the persisted sound volume.
pub const KEY_SOUND_VOLUME: &str = "sound_volume";

/// Convert a linear volume to mixer gain in decibels, floored at -80 dB.
///
/// Zero, negative and NaN volumes all map to the floor.
pub fn volume_db(linear: f32) -> f32 {
    if linear.is_nan() || linear <= 0.0 {
        return DB_FLOOR;
    }
    (20.0 * linear.log10()).max(DB_FLOOR)
}

/// Convert mixer gain in decibels back to a linear amplitude.
pub fn db_to_amplitude(db: f32) -> f32 {
    if db <= DB_FLOOR {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// User volumes, as persisted in the settings store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volumes {
    /// Music volume multiplier (0.0–1.0).
    pub music: f32,
    /// Sound volume multiplier (0.0–1.0), shared by effects and voice.
    pub sound: f32,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            music: 1.0,
            sound: 1.0,
        }
    }
}

impl Volumes {
    /// Music bus gain with the duck ceiling applied.
    pub fn music_db(&self, duck_limit: f32) -> f32 {
        volume_db(self.music * duck_limit)
    }

    /// Sound bus gain.
    pub fn sound_db(&self) -> f32 {
        volume_db(self.sound)
    }
}
