//! Capabilities the playback engine is driven by: the output device, the clip
//! loader and the timer service.
//!
//! The engine never touches audio hardware, files or wall-clock time itself.
//! Everything goes through these traits so a kira device, a file loader or a
//! test double can be plugged in.

use glam::Vec3;
use resonance_core::{TimerHandle, TimerQueue};

use crate::record::SoundId;
use crate::spatial::Attenuation;

/// Mixer group a channel is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixerBus {
    Music,
    Sound,
    /// Child of `Sound` whose pitch follows the device pitch parameter.
    Pitch,
    /// Child of `Sound` carrying dialogue.
    Voice,
}

/// A decoded clip as delivered by a [`ClipLoader`].
pub trait AudioClip {
    fn name(&self) -> &str;

    /// Length in seconds.
    fn length(&self) -> f32;
}

/// Per-playback channel configuration, applied before loading starts.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings<'a> {
    pub position: Vec3,
    /// 0.0 = plain stereo, 1.0 = fully positioned.
    pub spatial_blend: f32,
    pub volume: f32,
    pub looping: bool,
    pub bus: MixerBus,
    /// Distance falloff; only set for 3D sounds.
    pub attenuation: Option<&'a Attenuation>,
}

/// One hardware playback voice. Owned by a single pooled record at a time.
pub trait PlaybackChannel {
    type Clip: AudioClip;

    /// Enable or park the channel. Parked channels stay allocated for reuse.
    fn set_active(&mut self, active: bool);

    fn configure(&mut self, settings: &ChannelSettings<'_>);

    fn bind_clip(&mut self, clip: Self::Clip);

    /// Unbind and return the clip, if any.
    fn take_clip(&mut self) -> Option<Self::Clip>;

    fn clip(&self) -> Option<&Self::Clip>;

    /// Start the bound clip after `delay` seconds (0 = immediately).
    fn play(&mut self, delay: f32);

    fn pause(&mut self);

    fn unpause(&mut self);

    fn stop(&mut self);

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    /// Playback position within the clip, in seconds.
    fn position(&self) -> f32;

    /// Clip seconds played per wall-clock second (1.0 = unpitched).
    fn playback_rate(&self) -> f32;
}

/// The output device: allocates channels and owns the mixer parameters.
pub trait AudioBackend {
    type Clip: AudioClip;
    type Channel: PlaybackChannel<Clip = Self::Clip>;

    fn create_channel(&mut self) -> Self::Channel;

    fn destroy_channel(&mut self, channel: Self::Channel);

    /// Set a bus gain in decibels. Only `Music` and `Sound` are driven by the
    /// engine; `Pitch` and `Voice` inherit from `Sound`.
    fn set_bus_volume(&mut self, bus: MixerBus, db: f32);

    /// Set the pitch parameter applied to the `Pitch` bus.
    fn set_pitch(&mut self, pitch: f32);
}

/// Identifies one outstanding load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket {
    pub(crate) slot: usize,
    pub(crate) id: SoundId,
}

impl LoadTicket {
    /// The playback this load belongs to.
    pub fn sound_id(&self) -> SoundId {
        self.id
    }
}

/// A finished load. `clip` is `None` when the load failed.
#[derive(Debug)]
pub struct LoadedClip<C> {
    pub ticket: LoadTicket,
    pub clip: Option<C>,
}

/// Asynchronous clip source.
pub trait ClipLoader {
    type Clip: AudioClip;

    /// Begin loading `folder/name`. The result is reported through
    /// [`ClipLoader::poll_loaded`] carrying the same ticket.
    fn load_audio(&mut self, folder: &str, name: &str, ticket: LoadTicket);

    /// Loads that finished since the last poll.
    fn poll_loaded(&mut self) -> Vec<LoadedClip<Self::Clip>>;

    /// Give a delivered clip back. Called exactly once per delivered clip.
    fn release_audio(&mut self, clip: Self::Clip);
}

/// What a timer registration means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// A non-looping sound reached its end.
    Finished,
    /// A looping sound with a callback wrapped around.
    LoopBoundary,
}

/// Payload carried by engine timers. The id guards against a slot having
/// been recycled since the timer was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub slot: usize,
    pub id: SoundId,
    pub kind: TimerKind,
}

/// One-shot delayed callbacks.
pub trait TimerService {
    fn register(&mut self, seconds: f32, event: TimerEvent) -> TimerHandle;

    /// Cancel a registration. Unknown or expired handles are ignored.
    fn unregister(&mut self, handle: TimerHandle);

    /// Advance time and return the events that came due.
    fn advance(&mut self, delta: f32) -> Vec<TimerEvent>;
}

impl TimerService for TimerQueue<TimerEvent> {
    fn register(&mut self, seconds: f32, event: TimerEvent) -> TimerHandle {
        TimerQueue::register(self, seconds, event)
    }

    fn unregister(&mut self, handle: TimerHandle) {
        TimerQueue::unregister(self, handle);
    }

    fn advance(&mut self, delta: f32) -> Vec<TimerEvent> {
        TimerQueue::advance(self, delta)
    }
}
