use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use resonance_core::TimerHandle;
use tracing::error;

use crate::backend::{MixerBus, PlaybackChannel, TimerService};
use crate::fade::Fade;

/// Logical handle to one playback. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundId(i64);

impl SoundId {
    /// Returned for rejected requests and held by pooled records.
    pub const INVALID: SoundId = SoundId(-1);

    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw id value.
    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for SoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Called with the sound's id when it finishes on its own (or wraps, for
/// looping sounds). Never called for explicit stops or failed loads.
pub type CompletionCallback = Box<dyn FnMut(SoundId)>;

/// A request to play one clip.
pub struct SfxRequest {
    pub folder: String,
    pub name: String,
    /// Base gain, 1.0 = unity.
    pub volume: f32,
    /// Seconds before playback starts.
    pub delay: f32,
    /// Seconds to fade in from silence; 0 disables the fade.
    pub fade_in: f32,
    pub looping: bool,
    pub on_complete: Option<CompletionCallback>,
}

impl SfxRequest {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
            volume: 1.0,
            delay: 0.0,
            fade_in: 0.0,
            looping: false,
            on_complete: None,
        }
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = non_negative(volume);
        self
    }

    pub fn delay(mut self, seconds: f32) -> Self {
        self.delay = non_negative(seconds);
        self
    }

    pub fn fade_in(mut self, seconds: f32) -> Self {
        self.fade_in = non_negative(seconds);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn on_complete(mut self, callback: impl FnMut(SoundId) + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

/// Clamp to `[0, f32::MAX]`, mapping NaN and infinities to 0.
fn non_negative(value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

impl fmt::Debug for SfxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SfxRequest")
            .field("folder", &self.folder)
            .field("name", &self.name)
            .field("volume", &self.volume)
            .field("delay", &self.delay)
            .field("fade_in", &self.fade_in)
            .field("looping", &self.looping)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Which transition a record's fade is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeStatus {
    #[default]
    None,
    /// Fade-in or resume-fade; nothing happens at the end.
    Fading,
    /// Pause the channel when the fade ends.
    FadingForPause,
    /// Stop and recycle when the fade ends.
    FadingForStop,
}

/// What a record's fade tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeOutcome {
    /// Still fading.
    Running,
    /// Plain fade reached its target.
    Completed,
    /// Pause-fade finished; the channel is now paused.
    Paused,
    /// Stop-fade finished; the owner must run the stop path.
    StopRequested,
    /// The record was not fading.
    Idle,
}

/// Per-request fields copied onto a record when it leaves the pool.
pub(crate) struct RecordInit {
    pub id: SoundId,
    pub folder: String,
    pub name: String,
    pub volume: f32,
    pub bus: MixerBus,
    pub looping: bool,
    pub fade_in: f32,
    pub scheduled_start: f64,
    pub callback: Option<CompletionCallback>,
}

/// A pooled playback: one channel bound to one in-flight or active sound.
pub struct PlaybackRecord<C> {
    id: SoundId,
    folder: Option<String>,
    name: Option<String>,
    volume: f32,
    bus: MixerBus,
    looping: bool,
    fade_in: f32,
    scheduled_start: f64,
    paused: bool,
    pending_start: bool,
    callback: Option<CompletionCallback>,
    timer: Option<TimerHandle>,
    fade_status: FadeStatus,
    fade: Fade,
    channel: C,
}

impl<C: PlaybackChannel> PlaybackRecord<C> {
    pub(crate) fn new(channel: C) -> Self {
        Self {
            id: SoundId::INVALID,
            folder: None,
            name: None,
            volume: 1.0,
            bus: MixerBus::Sound,
            looping: false,
            fade_in: 0.0,
            scheduled_start: 0.0,
            paused: false,
            pending_start: false,
            callback: None,
            timer: None,
            fade_status: FadeStatus::None,
            fade: Fade::default(),
            channel,
        }
    }

    pub(crate) fn init(&mut self, init: RecordInit) {
        self.id = init.id;
        self.folder = Some(init.folder);
        self.name = Some(init.name);
        self.volume = init.volume;
        self.bus = init.bus;
        self.looping = init.looping;
        self.fade_in = init.fade_in;
        self.scheduled_start = init.scheduled_start;
        self.callback = init.callback;
        self.paused = false;
        self.pending_start = false;
    }

    pub fn id(&self) -> SoundId {
        self.id
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Base volume the sound plays at when not fading.
    pub fn base_volume(&self) -> f32 {
        self.volume
    }

    /// Mixer bus the sound was routed to.
    pub fn bus(&self) -> MixerBus {
        self.bus
    }

    pub fn is_voice(&self) -> bool {
        self.bus == MixerBus::Voice
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn fade_in(&self) -> f32 {
        self.fade_in
    }

    pub fn scheduled_start(&self) -> f64 {
        self.scheduled_start
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Whether the clip arrived while paused and has not been started yet.
    pub fn is_pending_start(&self) -> bool {
        self.pending_start
    }

    pub(crate) fn set_pending_start(&mut self, pending: bool) {
        self.pending_start = pending;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn fade_status(&self) -> FadeStatus {
        self.fade_status
    }

    pub fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }

    pub(crate) fn set_timer(&mut self, handle: TimerHandle) {
        self.timer = Some(handle);
    }

    /// Drop the handle of a timer that has already fired.
    pub(crate) fn forget_timer(&mut self) {
        self.timer = None;
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub(crate) fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub(crate) fn into_channel(self) -> C {
        self.channel
    }

    /// Cancel the armed timer, if any.
    pub(crate) fn cancel_timer(&mut self, timers: &mut dyn TimerService) {
        if let Some(handle) = self.timer.take() {
            timers.unregister(handle);
        }
    }

    /// Replace whatever fade is running with a new one.
    pub(crate) fn begin_fade(&mut self, status: FadeStatus, fade: Fade) {
        self.fade_status = status;
        self.fade = fade;
    }

    /// Abandon the running fade, leaving the volume where it is.
    pub(crate) fn cancel_fade(&mut self) {
        self.fade_status = FadeStatus::None;
    }

    /// Advance the fade by one tick and push the volume to the channel.
    pub(crate) fn update_fade(&mut self, delta: f32) -> FadeOutcome {
        if self.fade_status == FadeStatus::None {
            return FadeOutcome::Idle;
        }

        let step = self.fade.advance(delta);
        self.channel.set_volume(step.value);
        if !step.done {
            return FadeOutcome::Running;
        }

        let outcome = match self.fade_status {
            FadeStatus::FadingForPause => {
                self.channel.pause();
                FadeOutcome::Paused
            }
            FadeStatus::FadingForStop => FadeOutcome::StopRequested,
            FadeStatus::Fading | FadeStatus::None => FadeOutcome::Completed,
        };
        self.fade_status = FadeStatus::None;
        outcome
    }

    /// Run the completion callback, containing any panic it raises.
    pub(crate) fn notify_complete(&mut self) {
        let id = self.id;
        let Some(callback) = self.callback.as_mut() else {
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| callback(id)));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Completion callback for sound {} panicked: {}", id, message);
        }
    }

    /// Reset to the pooled state and park the channel. Returns the clip that
    /// was bound so the caller can hand it back to the loader.
    pub(crate) fn clear(&mut self) -> Option<C::Clip> {
        let clip = self.channel.take_clip();
        self.channel.set_active(false);
        self.id = SoundId::INVALID;
        self.folder = None;
        self.name = None;
        self.bus = MixerBus::Sound;
        self.callback = None;
        self.timer = None;
        self.paused = false;
        self.pending_start = false;
        self.fade_status = FadeStatus::None;
        self.fade = Fade::default();
        clip
    }
}
