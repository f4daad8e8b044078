//! Resonance Audio - Pooled, asynchronously-loaded playback engine
//!
//! The [`SoundManager`] owns every playback from load request to recycle:
//! fades, pause and resume, music crossfades, voice ducking, persisted bus
//! volumes and 3D attenuation. Devices, clip loaders, timers and settings
//! are plugged in through the traits in [`backend`] and [`settings`]; the
//! kira implementations live in [`kira_backend`].

pub mod backend;
mod config;
mod ducking;
mod error;
mod fade;
pub mod kira_backend;
mod manager;
mod pool;
mod record;
pub mod settings;
mod spatial;

#[cfg(test)]
mod testing;

pub use backend::{
    AudioBackend, AudioClip, ChannelSettings, ClipLoader, LoadTicket, LoadedClip, MixerBus,
    PlaybackChannel, TimerEvent, TimerKind, TimerService,
};
pub use config::{
    db_to_amplitude, volume_db, EngineConfig, Volumes, DB_FLOOR, KEY_MUSIC_VOLUME,
    KEY_SOUND_VOLUME,
};
pub use ducking::MusicDuck;
pub use error::AudioError;
pub use fade::{raised_cosine, Fade, FadeStep};
pub use kira_backend::{FileClipLoader, KiraBackend, KiraChannel, KiraClip};
pub use manager::SoundManager;
pub use pool::SlotIndex;
pub use record::{
    CompletionCallback, FadeOutcome, FadeStatus, PlaybackRecord, SfxRequest, SoundId,
};
pub use settings::{MemorySettings, SettingsStore, TomlSettingsStore};
pub use spatial::{
    compute_spatial, Attenuation, Keyframe, Listener, RolloffCurve, Spatial3dSettings,
    SpatialParams,
};
