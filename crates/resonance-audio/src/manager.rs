use std::collections::HashMap;

use glam::Vec3;
use tracing::{debug, error, info};

use crate::backend::{
    AudioBackend, AudioClip, ChannelSettings, ClipLoader, LoadTicket, LoadedClip, MixerBus,
    PlaybackChannel, TimerEvent, TimerKind, TimerService,
};
use crate::config::{EngineConfig, Volumes, KEY_MUSIC_VOLUME, KEY_SOUND_VOLUME};
use crate::ducking::MusicDuck;
use crate::error::AudioError;
use crate::fade::Fade;
use crate::pool::{RecordPool, SlotIndex};
use crate::record::{FadeOutcome, FadeStatus, PlaybackRecord, RecordInit, SfxRequest, SoundId};
use crate::settings::SettingsStore;
use crate::spatial::{Attenuation, Spatial3dSettings};

/// The background track currently requested through `play_music`.
#[derive(Debug, Clone)]
struct CurrentMusic {
    folder: String,
    name: String,
    id: SoundId,
}

/// How a submitted request is routed to the device.
#[derive(Debug, Clone, Copy)]
struct Route {
    bus: MixerBus,
    position: Option<Vec3>,
}

impl Route {
    fn bus(bus: MixerBus) -> Self {
        Self {
            bus,
            position: None,
        }
    }
}

/// Wall-clock seconds until the bound clip reaches its end at the channel's
/// current playback rate. `None` without a clip or while the rate is stalled.
fn time_to_end<C: PlaybackChannel>(channel: &C) -> Option<f32> {
    let clip = channel.clip()?;
    let rate = channel.playback_rate();
    if rate.is_nan() || rate <= 0.0 {
        return None;
    }
    Some(((clip.length() - channel.position()) / rate).max(0.0))
}

/// The playback engine. Owns every playback record and drives their
/// lifecycle from load request to recycle.
///
/// Single-threaded: call [`SoundManager::update`] once per frame with the
/// unscaled frame delta. Loader completions and timer expiries are processed
/// inside `update`.
pub struct SoundManager<B, L>
where
    B: AudioBackend,
    L: ClipLoader<Clip = B::Clip>,
{
    backend: B,
    loader: L,
    timers: Box<dyn TimerService>,
    settings: Box<dyn SettingsStore>,
    config: EngineConfig,
    spatial: Option<Spatial3dSettings>,
    attenuation: Attenuation,
    now: f64,
    last_id: i64,
    pool: RecordPool<B::Channel>,
    loading: HashMap<SoundId, SlotIndex>,
    playing: HashMap<SoundId, SlotIndex>,
    fading: Vec<SlotIndex>,
    voices: Vec<SlotIndex>,
    duck: MusicDuck,
    volumes: Volumes,
    current_music: Option<CurrentMusic>,
}

impl<B, L> SoundManager<B, L>
where
    B: AudioBackend,
    L: ClipLoader<Clip = B::Clip>,
{
    /// Create the engine with default tuning. Persisted volumes are read from
    /// `settings` and applied to the device immediately.
    pub fn new(
        backend: B,
        loader: L,
        timers: impl TimerService + 'static,
        settings: impl SettingsStore + 'static,
    ) -> Self {
        Self::with_config(backend, loader, timers, settings, EngineConfig::default())
    }

    pub fn with_config(
        backend: B,
        loader: L,
        timers: impl TimerService + 'static,
        settings: impl SettingsStore + 'static,
        config: EngineConfig,
    ) -> Self {
        let volumes = Volumes {
            music: settings
                .get_f32(KEY_MUSIC_VOLUME)
                .unwrap_or(1.0)
                .clamp(0.0, 1.0),
            sound: settings
                .get_f32(KEY_SOUND_VOLUME)
                .unwrap_or(1.0)
                .clamp(0.0, 1.0),
        };
        let attenuation = Attenuation::Logarithmic {
            min_distance: config.default_min_distance,
            max_distance: config.default_max_distance,
        };

        let mut manager = Self {
            backend,
            loader,
            timers: Box::new(timers),
            settings: Box::new(settings),
            duck: MusicDuck::new(config.duck_limit, config.duck_duration),
            config,
            spatial: None,
            attenuation,
            now: 0.0,
            last_id: 0,
            pool: RecordPool::new(),
            loading: HashMap::new(),
            playing: HashMap::new(),
            fading: Vec::new(),
            voices: Vec::new(),
            volumes,
            current_music: None,
        };
        manager.apply_music_volume();
        manager.apply_sound_volume();

        info!(
            "Sound manager initialized (music {:.2}, sound {:.2})",
            volumes.music, volumes.sound
        );
        manager
    }

    /// Install (or remove) the 3D attenuation settings used by `play_3d`.
    pub fn set_spatial_settings(&mut self, spatial: Option<Spatial3dSettings>) {
        self.attenuation = match &spatial {
            Some(settings) => settings.attenuation(),
            None => Attenuation::Logarithmic {
                min_distance: self.config.default_min_distance,
                max_distance: self.config.default_max_distance,
            },
        };
        self.spatial = spatial;
    }

    /// Audible range of 3D sounds.
    pub fn max_distance(&self) -> f32 {
        self.spatial
            .as_ref()
            .map_or(self.config.default_max_distance, |s| s.max_distance)
    }

    // ---- Volume ----

    pub fn volume_music(&self) -> f32 {
        self.volumes.music
    }

    /// Set and persist the music volume (0.0–1.0).
    pub fn set_volume_music(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        if self.volumes.music == volume {
            return;
        }
        self.volumes.music = volume;
        self.settings.set_f32(KEY_MUSIC_VOLUME, volume);
        self.apply_music_volume();
    }

    pub fn volume_sound(&self) -> f32 {
        self.volumes.sound
    }

    /// Set and persist the sound volume (0.0–1.0).
    pub fn set_volume_sound(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        if self.volumes.sound == volume {
            return;
        }
        self.volumes.sound = volume;
        self.settings.set_f32(KEY_SOUND_VOLUME, volume);
        self.apply_sound_volume();
    }

    /// Current ceiling on the music bus from voice ducking.
    pub fn music_duck_limit(&self) -> f32 {
        self.duck.limit()
    }

    fn apply_music_volume(&mut self) {
        let db = self.volumes.music_db(self.duck.limit());
        self.backend.set_bus_volume(MixerBus::Music, db);
    }

    fn apply_sound_volume(&mut self) {
        let db = self.volumes.sound_db();
        self.backend.set_bus_volume(MixerBus::Sound, db);
    }

    // ---- Submission ----

    /// Play a 2D sound effect. Returns [`SoundId::INVALID`] if the request
    /// was rejected.
    pub fn play(&mut self, sfx: SfxRequest) -> SoundId {
        if self.muted_for(&sfx) {
            return SoundId::INVALID;
        }
        self.submit(sfx, Route::bus(MixerBus::Sound))
    }

    /// Play a sound effect positioned in the world.
    pub fn play_3d(&mut self, sfx: SfxRequest, position: Vec3) -> SoundId {
        if self.muted_for(&sfx) {
            return SoundId::INVALID;
        }
        let route = Route {
            position: Some(position),
            ..Route::bus(MixerBus::Sound)
        };
        self.submit(sfx, route)
    }

    /// Play a sound effect on the pitch-shifted bus.
    pub fn play_pitched(&mut self, sfx: SfxRequest, pitch: f32) -> SoundId {
        if self.muted_for(&sfx) {
            return SoundId::INVALID;
        }
        self.backend.set_pitch(pitch);
        self.retime_pitched();
        self.submit(sfx, Route::bus(MixerBus::Pitch))
    }

    /// Play a dialogue line. Music is ducked while any voice is active.
    pub fn play_voice(&mut self, sfx: SfxRequest) -> SoundId {
        if self.muted_for(&sfx) {
            return SoundId::INVALID;
        }
        self.submit(sfx, Route::bus(MixerBus::Voice))
    }

    /// Switch the background track. Requesting the current track is a no-op;
    /// otherwise the old track fades out while the new one waits out the
    /// crossfade before starting. Music always loops.
    pub fn play_music(&mut self, mut sfx: SfxRequest) {
        if let Some(current) = &self.current_music {
            if current.folder == sfx.folder && current.name == sfx.name {
                return;
            }
        }

        let crossfade = self.config.music_crossfade;
        if let Some(previous) = self.current_music.take() {
            if self.fade_out_stop(previous.id, crossfade) {
                sfx.delay += crossfade;
            }
        }

        sfx.looping = true;
        let folder = sfx.folder.clone();
        let name = sfx.name.clone();
        let id = self.submit(sfx, Route::bus(MixerBus::Music));
        if id.is_valid() {
            info!("Playing music '{}/{}' as {}", folder, name, id);
            self.current_music = Some(CurrentMusic { folder, name, id });
        }
    }

    /// Fade out and drop the current background track.
    pub fn stop_music(&mut self) {
        if let Some(current) = self.current_music.take() {
            self.fade_out_stop(current.id, self.config.music_crossfade);
        }
    }

    pub fn pause_music(&mut self, fade: bool) {
        if let Some(id) = self.current_music() {
            self.pause(id, fade);
        }
    }

    pub fn resume_music(&mut self, fade: bool) {
        if let Some(id) = self.current_music() {
            self.resume(id, fade);
        }
    }

    /// Id of the current background track, if any.
    pub fn current_music(&self) -> Option<SoundId> {
        self.current_music.as_ref().map(|m| m.id)
    }

    fn muted_for(&self, sfx: &SfxRequest) -> bool {
        self.volumes.sound <= 0.0 && !sfx.looping
    }

    fn submit(&mut self, sfx: SfxRequest, route: Route) -> SoundId {
        if sfx.name.is_empty() {
            debug!("Ignoring sound request without a clip name");
            return SoundId::INVALID;
        }

        self.last_id += 1;
        let id = SoundId::new(self.last_id);

        let backend = &mut self.backend;
        let slot = self.pool.acquire(|| backend.create_channel());

        let settings = ChannelSettings {
            position: route.position.unwrap_or(Vec3::ZERO),
            spatial_blend: if route.position.is_some() { 1.0 } else { 0.0 },
            volume: sfx.volume,
            looping: sfx.looping,
            bus: route.bus,
            attenuation: route.position.map(|_| &self.attenuation),
        };

        let SfxRequest {
            folder,
            name,
            volume,
            delay,
            fade_in,
            looping,
            on_complete,
        } = sfx;

        let Some(record) = self.pool.get_mut(slot) else {
            return SoundId::INVALID;
        };
        record.init(RecordInit {
            id,
            folder: folder.clone(),
            name: name.clone(),
            volume,
            bus: route.bus,
            looping,
            fade_in,
            scheduled_start: self.now + delay as f64,
            callback: on_complete,
        });
        record.channel_mut().configure(&settings);

        if route.bus == MixerBus::Voice {
            self.voices.push(slot);
            if self.voices.len() == 1 {
                debug!("First voice line started, ducking music");
                self.duck.duck();
            }
        }

        self.loading.insert(id, slot);
        debug!("Loading sound {} '{}/{}'", id, folder, name);
        self.loader.load_audio(&folder, &name, LoadTicket { slot, id });
        id
    }

    // ---- Control ----

    /// Stop immediately. Returns `false` for unknown ids.
    pub fn stop(&mut self, id: SoundId) -> bool {
        self.fade_out_stop(id, 0.0)
    }

    /// Fade to silence over `duration` seconds, then stop. Sounds still
    /// loading are cancelled at once. Returns `false` for unknown ids.
    pub fn fade_out_stop(&mut self, id: SoundId, duration: f32) -> bool {
        if let Some(&slot) = self.playing.get(&id) {
            if duration <= 0.0 {
                self.finish(slot, true);
            } else if let Some(record) = self.pool.get_mut(slot) {
                let from = record.channel().volume();
                record.begin_fade(FadeStatus::FadingForStop, Fade::new(duration, from, 0.0));
                self.track_fade(slot);
            }
            return true;
        }

        if let Some(slot) = self.loading.remove(&id) {
            self.stop_record(slot, true);
            return true;
        }

        false
    }

    /// Pause a sound, optionally fading it out first. Its end-of-clip timer
    /// is cancelled until it is resumed.
    pub fn pause(&mut self, id: SoundId, fade: bool) {
        let Some(slot) = self.slot_of(id) else {
            return;
        };
        let duration = self.config.pause_fade;
        let Some(record) = self.pool.get_mut(slot) else {
            return;
        };

        record.cancel_timer(self.timers.as_mut());
        record.set_paused(true);
        if fade {
            let from = record.channel().volume();
            record.begin_fade(FadeStatus::FadingForPause, Fade::new(duration, from, 0.0));
            self.track_fade(slot);
        } else {
            record.channel_mut().pause();
        }
    }

    /// Resume a paused sound, optionally fading back to its base volume, and
    /// re-arm its end-of-clip timer for the rest of the clip.
    pub fn resume(&mut self, id: SoundId, fade: bool) {
        let Some(slot) = self.slot_of(id) else {
            return;
        };
        let duration = self.config.pause_fade;
        let Some(record) = self.pool.get_mut(slot) else {
            return;
        };

        if record.is_pending_start() {
            record.set_pending_start(false);
            record.channel_mut().play(0.0);
        } else {
            record.channel_mut().unpause();
        }
        record.set_paused(false);

        let base = record.base_volume();
        if fade {
            let from = record.channel().volume();
            record.begin_fade(FadeStatus::Fading, Fade::new(duration, from, base));
        } else {
            if record.fade_status() == FadeStatus::FadingForPause {
                record.cancel_fade();
            }
            record.channel_mut().set_volume(base);
        }

        let remaining = time_to_end(record.channel());
        if fade {
            self.track_fade(slot);
        }
        if let Some(remaining) = remaining {
            self.arm_timer(slot, remaining);
        }
    }

    /// Whether the id is loading or playing.
    pub fn is_playing(&self, id: SoundId) -> bool {
        self.playing.contains_key(&id) || self.loading.contains_key(&id)
    }

    /// Whether the id is still waiting for its clip.
    pub fn is_loading(&self, id: SoundId) -> bool {
        self.loading.contains_key(&id)
    }

    /// The record behind an active id.
    pub fn record(&self, id: SoundId) -> Option<&PlaybackRecord<B::Channel>> {
        self.slot_of(id).and_then(|slot| self.pool.get(slot))
    }

    /// The device channel behind an active id.
    pub fn channel(&self, id: SoundId) -> Option<&B::Channel> {
        self.record(id).map(|r| r.channel())
    }

    /// Number of loading or playing sounds.
    pub fn active_count(&self) -> usize {
        self.loading.len() + self.playing.len()
    }

    /// Number of idle records waiting in the pool.
    pub fn pooled_count(&self) -> usize {
        self.pool.idle_count()
    }

    /// Number of device channels currently allocated, idle or in use.
    pub fn channel_count(&self) -> usize {
        self.pool.len()
    }

    /// Destroy the channels of every idle pooled record.
    pub fn release_unused(&mut self) {
        let channels = self.pool.drain_idle();
        let count = channels.len();
        for channel in channels {
            self.backend.destroy_channel(channel);
        }
        if count > 0 {
            info!("Released {} unused audio channels", count);
        }
    }

    /// Stop everything, destroy all channels and flush the settings store.
    pub fn shutdown(mut self) -> Result<(), AudioError> {
        let active: Vec<SoundId> = self
            .loading
            .keys()
            .chain(self.playing.keys())
            .copied()
            .collect();
        for id in active {
            self.stop(id);
        }
        self.release_unused();
        info!("Sound manager shut down");
        self.settings.flush()
    }

    // ---- Per-frame ----

    /// Advance the engine by one frame of unscaled time.
    pub fn update(&mut self, delta: f32) {
        let delta = delta.max(0.0);
        self.now += delta as f64;

        for event in self.timers.advance(delta) {
            self.on_timer(event);
        }

        for loaded in self.loader.poll_loaded() {
            self.on_loaded(loaded);
        }

        self.update_fades(delta);

        if self.duck.update(delta).is_some() {
            self.apply_music_volume();
        }
    }

    fn update_fades(&mut self, delta: f32) {
        let fading = std::mem::take(&mut self.fading);
        let mut running = Vec::with_capacity(fading.len());

        for slot in fading {
            let Some(record) = self.pool.get_mut(slot) else {
                continue;
            };
            match record.update_fade(delta) {
                FadeOutcome::Running => running.push(slot),
                FadeOutcome::StopRequested => self.finish(slot, true),
                FadeOutcome::Completed | FadeOutcome::Paused | FadeOutcome::Idle => {}
            }
        }

        for slot in self.fading.drain(..) {
            if !running.contains(&slot) {
                running.push(slot);
            }
        }
        self.fading = running;
    }

    fn track_fade(&mut self, slot: SlotIndex) {
        if !self.fading.contains(&slot) {
            self.fading.push(slot);
        }
    }

    fn on_loaded(&mut self, loaded: LoadedClip<B::Clip>) {
        let LoadedClip { ticket, clip } = loaded;
        if self.loading.get(&ticket.id) != Some(&ticket.slot) {
            debug!("Dropping late load for cancelled sound {}", ticket.id);
            if let Some(clip) = clip {
                self.loader.release_audio(clip);
            }
            return;
        }
        self.loading.remove(&ticket.id);
        let slot = ticket.slot;

        let Some(clip) = clip else {
            if let Some(record) = self.pool.get(slot) {
                error!(
                    "Failed to load sound '{}/{}'",
                    record.folder().unwrap_or_default(),
                    record.name().unwrap_or_default()
                );
            }
            self.stop_record(slot, true);
            return;
        };

        self.playing.insert(ticket.id, slot);
        let now = self.now;
        let Some(record) = self.pool.get_mut(slot) else {
            return;
        };

        record.channel_mut().bind_clip(clip);
        if record.is_paused() {
            debug!("Sound {} loaded while paused, holding", ticket.id);
            record.set_pending_start(true);
            return;
        }

        let delay = ((record.scheduled_start() - now) as f32).max(0.0);
        record.channel_mut().play(delay);
        let remaining = time_to_end(record.channel());

        let fade_in = record.fade_in();
        if fade_in > 0.0 {
            let base = record.base_volume();
            record.channel_mut().set_volume(0.0);
            record.begin_fade(
                FadeStatus::Fading,
                Fade::new(fade_in, 0.0, base).starting_at(-delay),
            );
            self.track_fade(slot);
        }

        if let Some(remaining) = remaining {
            self.arm_timer(slot, remaining + delay);
        }
    }

    /// A pitch change speeds up or slows down every sound on the Pitch bus,
    /// so their end-of-clip timers are re-armed for the new rate.
    fn retime_pitched(&mut self) {
        let slots: Vec<SlotIndex> = self.playing.values().copied().collect();
        for slot in slots {
            let Some(record) = self.pool.get_mut(slot) else {
                continue;
            };
            if record.bus() != MixerBus::Pitch || record.is_paused() {
                continue;
            }
            let waiting = ((record.scheduled_start() - self.now) as f32).max(0.0);
            match time_to_end(record.channel()) {
                Some(remaining) => self.arm_timer(slot, remaining + waiting),
                None => record.cancel_timer(self.timers.as_mut()),
            }
        }
    }

    /// Arm the end-of-clip timer. Looping sounds only get one when they have
    /// a callback to notify.
    fn arm_timer(&mut self, slot: SlotIndex, seconds: f32) {
        let Some(record) = self.pool.get_mut(slot) else {
            return;
        };
        record.cancel_timer(self.timers.as_mut());

        let kind = if record.is_looping() {
            if !record.has_callback() {
                return;
            }
            TimerKind::LoopBoundary
        } else {
            TimerKind::Finished
        };

        let event = TimerEvent {
            slot,
            id: record.id(),
            kind,
        };
        let handle = self.timers.register(seconds, event);
        record.set_timer(handle);
    }

    fn on_timer(&mut self, event: TimerEvent) {
        if self.playing.get(&event.id) != Some(&event.slot) {
            return;
        }
        let Some(record) = self.pool.get_mut(event.slot) else {
            return;
        };
        if record.id() != event.id {
            return;
        }
        record.forget_timer();

        match event.kind {
            TimerKind::Finished => self.finish(event.slot, false),
            TimerKind::LoopBoundary => {
                let channel = record.channel();
                let length = channel.clip().map_or(0.0, |c| c.length());
                let rate = channel.playback_rate();
                if length > 0.0 && rate > 0.0 {
                    let mut next = time_to_end(channel).unwrap_or(0.0);
                    if next <= 0.0 {
                        next = length / rate;
                    }
                    self.arm_timer(event.slot, next);
                }
                if let Some(record) = self.pool.get_mut(event.slot) {
                    record.notify_complete();
                }
            }
        }
    }

    /// A playing sound ended, naturally or by request.
    fn finish(&mut self, slot: SlotIndex, manually: bool) {
        if let Some(record) = self.pool.get(slot) {
            self.playing.remove(&record.id());
        }
        self.stop_record(slot, manually);
    }

    /// Stop the channel, notify on natural completion, and recycle the record.
    fn stop_record(&mut self, slot: SlotIndex, manually: bool) {
        let Some(record) = self.pool.get_mut(slot) else {
            return;
        };
        let id = record.id();

        record.channel_mut().stop();
        if manually {
            record.cancel_timer(self.timers.as_mut());
        } else {
            record.notify_complete();
        }

        let voice = record.is_voice();
        if let Some(clip) = record.clear() {
            self.loader.release_audio(clip);
        }
        self.pool.release(slot);
        self.fading.retain(|&s| s != slot);

        if voice {
            if let Some(index) = self.voices.iter().position(|&s| s == slot) {
                self.voices.remove(index);
                if self.voices.is_empty() {
                    debug!("Last voice line ended, restoring music");
                    self.duck.release();
                }
            }
        }

        if self.current_music.as_ref().is_some_and(|m| m.id == id) {
            self.current_music = None;
        }

        debug!("Recycled sound {}", id);
    }

    fn slot_of(&self, id: SoundId) -> Option<SlotIndex> {
        self.playing
            .get(&id)
            .or_else(|| self.loading.get(&id))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use resonance_core::TimerQueue;

    use super::*;
    use crate::config::volume_db;
    use crate::settings::MemorySettings;
    use crate::testing::{MockDevice, MockLoader};

    type Manager = SoundManager<MockDevice, MockLoader>;

    fn library() -> MockLoader {
        MockLoader::new()
            .with_clip("click", 0.5)
            .with_clip("theme_a", 10.0)
            .with_clip("theme_b", 12.0)
            .with_clip("line", 3.0)
            .with_clip("wind", 2.0)
            .with_broken("missing")
    }

    fn setup(loader: MockLoader) -> (Manager, MockDevice, MockLoader) {
        let device = MockDevice::new();
        let manager = SoundManager::new(
            device.clone(),
            loader.clone(),
            TimerQueue::<TimerEvent>::new(),
            MemorySettings::new(),
        );
        (manager, device, loader)
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut(SoundId)) {
        let count = Rc::new(Cell::new(0));
        let inner = Rc::clone(&count);
        (count, move |_| inner.set(inner.get() + 1))
    }

    fn run(manager: &mut Manager, seconds: f32) {
        let steps = (seconds / 0.05).round() as usize;
        for _ in 0..steps {
            manager.update(0.05);
        }
    }

    #[test]
    fn ids_strictly_increase() {
        let (mut manager, _, _) = setup(library());
        let mut last = SoundId::INVALID;
        for _ in 0..5 {
            let id = manager.play(SfxRequest::new("sfx", "click"));
            assert!(id.is_valid());
            assert!(id > last);
            last = id;
        }
        let (mut other, _, _) = setup(MockLoader::new());
        let a = other.play(SfxRequest::new("sfx", "a"));
        other.stop(a);
        let b = other.play(SfxRequest::new("sfx", "a"));
        assert!(b > a);
    }

    #[test]
    fn silent_sound_bus_rejects_one_shots_only() {
        let (mut manager, _, loader) = setup(library());
        manager.set_volume_sound(0.0);

        let rejected = manager.play(SfxRequest::new("sfx", "click"));
        assert_eq!(rejected, SoundId::INVALID);
        assert_eq!(manager.active_count(), 0);
        assert!(loader.requested().is_empty());

        let ambient = manager.play(SfxRequest::new("sfx", "wind").looping(true));
        assert!(ambient.is_valid());
        assert!(manager.is_playing(ambient));
    }

    #[test]
    fn empty_name_is_rejected() {
        let (mut manager, _, _) = setup(library());
        assert_eq!(manager.play(SfxRequest::new("sfx", "")), SoundId::INVALID);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn stop_while_loading_cancels_silently() {
        let (mut manager, device, loader) = setup(MockLoader::new());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "slow").on_complete(callback));
        assert!(manager.is_loading(id));

        assert!(manager.stop(id));
        assert!(!manager.is_playing(id));
        assert_eq!(manager.pooled_count(), 1);
        assert_eq!(loader.outstanding(), 1);

        // The clip shows up after the cancel: handed straight back, channel untouched.
        loader.complete("slow", Some(1.0));
        manager.update(0.05);
        assert_eq!(loader.released(), vec!["slow".to_string()]);
        assert_eq!(device.channel(0).borrow().play_calls, 0);

        run(&mut manager, 2.0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let (mut manager, _, _) = setup(library());
        let bogus = SoundId::new(42);
        assert!(!manager.stop(bogus));
        assert!(!manager.fade_out_stop(bogus, 1.0));
        manager.pause(bogus, true);
        manager.resume(bogus, true);
        assert!(!manager.is_playing(bogus));
        assert!(!manager.is_playing(SoundId::INVALID));
    }

    #[test]
    fn natural_finish_notifies_once_and_recycles() {
        let (mut manager, device, loader) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "click").on_complete(callback));

        manager.update(0.05);
        assert!(manager.is_playing(id));
        assert!(!manager.is_loading(id));
        {
            let channel = device.channel(0);
            let channel = channel.borrow();
            assert!(channel.playing);
            assert_eq!(channel.clip.as_deref(), Some("click"));
            assert_eq!(channel.bus, Some(MixerBus::Sound));
        }

        run(&mut manager, 1.0);
        assert!(!manager.is_playing(id));
        assert_eq!(calls.get(), 1);
        assert_eq!(loader.released(), vec!["click".to_string()]);
        assert_eq!(manager.pooled_count(), 1);
        assert!(!device.channel(0).borrow().active);
    }

    #[test]
    fn failed_load_is_silent() {
        let (mut manager, device, loader) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "missing").on_complete(callback));

        manager.update(0.05);
        assert!(!manager.is_playing(id));
        assert_eq!(calls.get(), 0);
        assert!(loader.released().is_empty());
        assert_eq!(manager.pooled_count(), 1);
        assert_eq!(device.channel(0).borrow().play_calls, 0);
    }

    #[test]
    fn delayed_start_waits_out_the_remainder() {
        let (mut manager, device, loader) = setup(MockLoader::new());
        let id = manager.play(SfxRequest::new("sfx", "late").delay(1.0));

        manager.update(0.25);
        loader.complete("late", Some(2.0));
        manager.update(0.25);

        let delay = device.channel(0).borrow().last_delay;
        assert!((delay - 0.5).abs() < 1e-4, "delay was {}", delay);

        // Finishes 2 s of clip after the 0.5 s of remaining delay.
        run(&mut manager, 2.4);
        assert!(manager.is_playing(id));
        run(&mut manager, 0.2);
        assert!(!manager.is_playing(id));
    }

    #[test]
    fn fade_in_ramps_to_base_volume() {
        let (mut manager, device, _) = setup(library());
        let id = manager.play(SfxRequest::new("sfx", "theme_a").volume(0.8).fade_in(1.0));

        manager.update(0.0);
        assert_eq!(device.channel(0).borrow().volume, 0.0);
        assert_eq!(manager.record(id).unwrap().fade_status(), FadeStatus::Fading);

        manager.update(0.5);
        let midway = device.channel(0).borrow().volume;
        assert!((midway - 0.4).abs() < 1e-5, "midway volume {}", midway);

        manager.update(0.5);
        assert_eq!(device.channel(0).borrow().volume, 0.8);
        assert_eq!(manager.record(id).unwrap().fade_status(), FadeStatus::None);
        assert!(manager.fading.is_empty());
    }

    #[test]
    fn fade_out_stop_recycles_at_the_end() {
        let (mut manager, device, _) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "theme_a").on_complete(callback));
        manager.update(0.05);

        assert!(manager.fade_out_stop(id, 0.5));
        manager.update(0.25);
        assert!(manager.is_playing(id));
        let volume = device.channel(0).borrow().volume;
        assert!(volume > 0.0 && volume < 1.0);

        manager.update(0.25);
        assert!(!manager.is_playing(id));
        assert_eq!(calls.get(), 0);
        assert!(manager.fading.is_empty());
        assert!(!device.channel(0).borrow().playing);
    }

    #[test]
    fn zero_duration_stop_is_synchronous() {
        let (mut manager, device, loader) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "theme_a").on_complete(callback));
        manager.update(0.05);

        assert!(manager.fade_out_stop(id, 0.0));
        assert!(!manager.is_playing(id));
        assert_eq!(loader.released(), vec!["theme_a".to_string()]);
        assert_eq!(device.channel(0).borrow().stop_calls, 1);

        run(&mut manager, 15.0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn pause_cancels_timer_and_resume_rearms_remainder() {
        let (mut manager, device, _) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "line").on_complete(callback));
        manager.update(0.05);
        assert!(manager.record(id).unwrap().timer().is_some());

        manager.pause(id, false);
        assert!(device.channel(0).borrow().paused);
        assert!(manager.record(id).unwrap().timer().is_none());

        run(&mut manager, 5.0);
        assert!(manager.is_playing(id));
        assert_eq!(calls.get(), 0);

        device.channel(0).borrow_mut().position = 2.0;
        manager.resume(id, false);
        assert!(!device.channel(0).borrow().paused);
        assert!(manager.record(id).unwrap().timer().is_some());

        run(&mut manager, 0.9);
        assert!(manager.is_playing(id));
        run(&mut manager, 0.2);
        assert!(!manager.is_playing(id));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn pause_fade_pauses_at_the_end() {
        let (mut manager, device, _) = setup(library());
        let id = manager.play(SfxRequest::new("sfx", "theme_a"));
        manager.update(0.05);

        manager.pause(id, true);
        assert_eq!(
            manager.record(id).unwrap().fade_status(),
            FadeStatus::FadingForPause
        );
        manager.update(0.5);
        assert!(!device.channel(0).borrow().paused);
        manager.update(0.5);
        assert!(device.channel(0).borrow().paused);
        assert_eq!(device.channel(0).borrow().volume, 0.0);

        manager.resume(id, true);
        manager.update(1.0);
        assert_eq!(device.channel(0).borrow().volume, 1.0);
        assert!(!device.channel(0).borrow().paused);
    }

    #[test]
    fn resume_without_fade_abandons_pause_fade() {
        let (mut manager, device, _) = setup(library());
        let id = manager.play(SfxRequest::new("sfx", "theme_a"));
        manager.update(0.05);

        manager.pause(id, true);
        manager.update(0.3);
        manager.resume(id, false);
        run(&mut manager, 2.0);
        assert!(!device.channel(0).borrow().paused);
        assert_eq!(device.channel(0).borrow().volume, 1.0);
    }

    #[test]
    fn resume_before_the_clip_arrives_arms_nothing() {
        let (mut manager, device, loader) = setup(MockLoader::new());
        let (calls, callback) = counter();
        let id = manager.play(SfxRequest::new("sfx", "slow").on_complete(callback));
        manager.pause(id, false);
        manager.resume(id, false);

        assert!(manager.is_loading(id));
        assert!(manager.record(id).unwrap().timer().is_none());
        assert!(!manager.record(id).unwrap().is_paused());
        assert_eq!(device.channel(0).borrow().play_calls, 0);

        // The clip then starts normally and finishes on its own.
        loader.complete("slow", Some(1.0));
        manager.update(0.05);
        assert_eq!(device.channel(0).borrow().play_calls, 1);
        assert!(manager.record(id).unwrap().timer().is_some());
        run(&mut manager, 1.1);
        assert!(!manager.is_playing(id));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn clip_arriving_while_paused_waits_for_resume() {
        let (mut manager, device, loader) = setup(MockLoader::new());
        let id = manager.play(SfxRequest::new("sfx", "slow"));
        manager.pause(id, false);

        loader.complete("slow", Some(1.0));
        manager.update(0.05);
        assert!(manager.is_playing(id));
        assert_eq!(device.channel(0).borrow().play_calls, 0);

        manager.resume(id, false);
        assert_eq!(device.channel(0).borrow().play_calls, 1);
        run(&mut manager, 1.1);
        assert!(!manager.is_playing(id));
    }

    #[test]
    fn looping_callback_fires_every_cycle() {
        let (mut manager, _, _) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play(
            SfxRequest::new("sfx", "wind")
                .looping(true)
                .on_complete(callback),
        );

        // Wraps at roughly 2, 4 and 6 seconds.
        run(&mut manager, 7.0);
        assert!(manager.is_playing(id));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn looping_without_callback_arms_nothing() {
        let (mut manager, _, _) = setup(library());
        let id = manager.play(SfxRequest::new("sfx", "wind").looping(true));
        manager.update(0.05);
        assert!(manager.record(id).unwrap().timer().is_none());
        run(&mut manager, 10.0);
        assert!(manager.is_playing(id));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let (mut manager, _, _) = setup(library());
        let bad = manager.play(SfxRequest::new("sfx", "click").on_complete(|_| panic!("boom")));
        let (calls, callback) = counter();
        let good = manager.play(SfxRequest::new("sfx", "click").on_complete(callback));

        run(&mut manager, 1.0);
        assert!(!manager.is_playing(bad));
        assert!(!manager.is_playing(good));
        assert_eq!(calls.get(), 1);
        assert_eq!(manager.pooled_count(), 2);
    }

    #[test]
    fn voice_ducks_and_restores_music() {
        let (mut manager, device, _) = setup(library());
        assert_eq!(device.bus_db(MixerBus::Music), Some(0.0));

        let voice = manager.play_voice(SfxRequest::new("vo", "line"));
        assert_eq!(device.channel(0).borrow().bus, Some(MixerBus::Voice));
        run(&mut manager, 2.5);
        assert_eq!(manager.music_duck_limit(), 0.2);
        assert_eq!(device.bus_db(MixerBus::Music), Some(volume_db(0.2)));

        manager.stop(voice);
        run(&mut manager, 2.5);
        assert_eq!(manager.music_duck_limit(), 1.0);
        assert_eq!(device.bus_db(MixerBus::Music), Some(0.0));
    }

    #[test]
    fn only_first_and_last_voice_move_the_duck() {
        let (mut manager, _, _) = setup(library());
        let first = manager.play_voice(SfxRequest::new("vo", "line"));
        manager.update(1.0);
        let second = manager.play_voice(SfxRequest::new("vo", "line"));
        manager.stop(first);
        manager.update(1.0);
        assert_eq!(manager.music_duck_limit(), 0.2);

        manager.stop(second);
        manager.update(1.0);
        let rising = manager.music_duck_limit();
        assert!(rising > 0.2 && rising < 1.0);
    }

    #[test]
    fn duck_ceiling_scales_music_volume() {
        let (mut manager, device, _) = setup(library());
        manager.set_volume_music(0.5);
        manager.play_voice(SfxRequest::new("vo", "line"));
        run(&mut manager, 2.5);
        let expected = volume_db(0.5 * 0.2);
        let actual = device.bus_db(MixerBus::Music).unwrap();
        assert!((actual - expected).abs() < 1e-4);
    }

    #[test]
    fn same_music_twice_is_a_noop() {
        let (mut manager, _, loader) = setup(library());
        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        let first = manager.current_music().unwrap();
        manager.update(0.05);

        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        assert_eq!(manager.current_music(), Some(first));
        assert_eq!(loader.requested().len(), 1);
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn new_music_crossfades_from_the_old() {
        let (mut manager, device, _) = setup(library());
        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        let old = manager.current_music().unwrap();
        manager.update(0.05);
        assert!(manager.record(old).unwrap().is_looping());
        assert_eq!(device.channel(0).borrow().bus, Some(MixerBus::Music));
        assert!(device.channel(0).borrow().looping);

        manager.play_music(SfxRequest::new("bgm", "theme_b"));
        let new = manager.current_music().unwrap();
        assert!(new > old);
        assert_eq!(
            manager.record(old).unwrap().fade_status(),
            FadeStatus::FadingForStop
        );
        let scheduled = manager.record(new).unwrap().scheduled_start();
        assert!(scheduled - manager.now >= 1.0 - 1e-6);

        manager.update(0.5);
        let delay = device.channel(1).borrow().last_delay;
        assert!(delay >= 0.5 - 1e-4, "new track started after {}", delay);

        manager.update(0.5);
        assert!(!manager.is_playing(old));
        assert!(manager.is_playing(new));
    }

    #[test]
    fn first_music_has_no_crossfade_delay() {
        let (mut manager, _, _) = setup(library());
        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        let id = manager.current_music().unwrap();
        assert_eq!(manager.record(id).unwrap().scheduled_start(), 0.0);
    }

    #[test]
    fn music_ignores_muted_sound_bus() {
        let (mut manager, _, _) = setup(library());
        manager.set_volume_sound(0.0);
        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        assert!(manager.current_music().is_some());
    }

    #[test]
    fn stop_music_clears_current_track() {
        let (mut manager, _, _) = setup(library());
        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        let id = manager.current_music().unwrap();
        manager.update(0.05);

        manager.stop_music();
        assert_eq!(manager.current_music(), None);
        run(&mut manager, 1.1);
        assert!(!manager.is_playing(id));

        manager.play_music(SfxRequest::new("bgm", "theme_a"));
        assert!(manager.current_music().is_some());
    }

    #[test]
    fn recycled_record_is_reset_before_reuse() {
        let (mut manager, device, loader) = setup(library());
        let first = manager.play(SfxRequest::new("sfx", "click"));
        run(&mut manager, 1.0);
        assert!(!manager.is_playing(first));
        assert_eq!(loader.released(), vec!["click".to_string()]);

        let slot = manager.pool.idle_count();
        assert_eq!(slot, 1);
        assert_eq!(manager.pool.get(0).unwrap().id(), SoundId::INVALID);
        assert!(manager.pool.get(0).unwrap().name().is_none());

        let second = manager.play(SfxRequest::new("sfx", "line"));
        assert_eq!(device.created(), 1);
        assert_eq!(manager.record(second).unwrap().id(), second);
        assert_eq!(manager.record(second).unwrap().name(), Some("line"));
        assert_eq!(loader.released(), vec!["click".to_string()]);
    }

    #[test]
    fn stale_timer_does_not_hit_reused_record() {
        let (mut manager, _, _) = setup(library());
        let (calls, callback) = counter();
        let first = manager.play(SfxRequest::new("sfx", "click").on_complete(callback));
        manager.update(0.05);
        manager.stop(first);

        let second = manager.play(SfxRequest::new("sfx", "theme_a"));
        run(&mut manager, 1.0);
        assert!(manager.is_playing(second));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn voice_list_tracks_active_voices() {
        let (mut manager, _, _) = setup(MockLoader::new().with_broken("bad_line"));
        manager.play_voice(SfxRequest::new("vo", "bad_line"));
        assert_eq!(manager.voices.len(), 1);
        manager.update(0.05);
        assert!(manager.voices.is_empty());
    }

    #[test]
    fn three_d_sounds_default_to_logarithmic_falloff() {
        let (mut manager, device, _) = setup(library());
        assert_eq!(manager.max_distance(), 1000.0);

        manager.play_3d(SfxRequest::new("sfx", "click"), Vec3::new(3.0, 0.0, 0.0));
        manager.play(SfxRequest::new("sfx", "click"));

        let spatial = device.channel(0);
        let spatial = spatial.borrow();
        assert_eq!(spatial.spatial_blend, 1.0);
        assert_eq!(spatial.position_3d, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(
            spatial.attenuation,
            Some(Attenuation::Logarithmic {
                min_distance: 1.0,
                max_distance: 1000.0,
            })
        );
        let flat = device.channel(1);
        assert_eq!(flat.borrow().spatial_blend, 0.0);
        assert_eq!(flat.borrow().attenuation, None);
    }

    #[test]
    fn installed_spatial_settings_replace_the_default_falloff() {
        let (mut manager, device, _) = setup(library());
        let settings = Spatial3dSettings::default();
        manager.set_spatial_settings(Some(settings.clone()));
        assert_eq!(manager.max_distance(), 20.0);

        manager.play_3d(SfxRequest::new("sfx", "click"), Vec3::new(0.0, 0.0, -5.0));
        let attenuation = device.channel(0).borrow().attenuation.clone();
        assert_eq!(attenuation, Some(settings.attenuation()));
        assert!(matches!(
            attenuation,
            Some(Attenuation::Custom { max_distance, .. }) if max_distance == 20.0
        ));

        manager.set_spatial_settings(None);
        assert_eq!(manager.max_distance(), 1000.0);
        manager.play_3d(SfxRequest::new("sfx", "click"), Vec3::new(0.0, 0.0, -5.0));
        assert!(matches!(
            device.channel(1).borrow().attenuation,
            Some(Attenuation::Logarithmic { .. })
        ));
    }

    #[test]
    fn lowered_pitch_stretches_the_finish_time() {
        let (mut manager, _, _) = setup(library());
        let (calls, callback) = counter();
        let id = manager.play_pitched(SfxRequest::new("sfx", "wind").on_complete(callback), 0.5);

        // A 2 s clip at half speed lasts 4 s.
        run(&mut manager, 3.0);
        assert!(manager.is_playing(id));
        assert_eq!(calls.get(), 0);

        run(&mut manager, 1.2);
        assert!(!manager.is_playing(id));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn raised_pitch_shortens_the_finish_time() {
        let (mut manager, _, _) = setup(library());
        let id = manager.play_pitched(SfxRequest::new("sfx", "wind"), 2.0);
        run(&mut manager, 1.2);
        assert!(!manager.is_playing(id));
    }

    #[test]
    fn pitch_change_retimes_sounds_already_playing() {
        let (mut manager, device, _) = setup(library());
        let first = manager.play_pitched(SfxRequest::new("sfx", "wind"), 1.0);
        manager.update(0.05);
        run(&mut manager, 0.95);

        // Half the clip is left when the bus drops to half speed.
        device.channel(0).borrow_mut().position = 1.0;
        manager.play_pitched(SfxRequest::new("sfx", "click"), 0.5);

        run(&mut manager, 1.5);
        assert!(manager.is_playing(first));
        run(&mut manager, 0.7);
        assert!(!manager.is_playing(first));
    }

    #[test]
    fn pitch_change_leaves_other_buses_alone() {
        let (mut manager, _, _) = setup(library());
        let flat = manager.play(SfxRequest::new("sfx", "wind"));
        manager.update(0.05);
        manager.play_pitched(SfxRequest::new("sfx", "click"), 0.25);
        run(&mut manager, 2.1);
        assert!(!manager.is_playing(flat));
    }

    #[test]
    fn pitched_sounds_set_device_pitch() {
        let (mut manager, device, _) = setup(library());
        manager.play_pitched(SfxRequest::new("sfx", "click"), 1.5);
        assert_eq!(device.pitch(), Some(1.5));
        assert_eq!(device.channel(0).borrow().bus, Some(MixerBus::Pitch));
    }

    #[test]
    fn volumes_persist_and_apply() {
        let device = MockDevice::new();
        let settings = MemorySettings::new().with_value(KEY_MUSIC_VOLUME, 0.5);
        let mut manager = SoundManager::new(
            device.clone(),
            library(),
            TimerQueue::<TimerEvent>::new(),
            settings,
        );
        assert_eq!(manager.volume_music(), 0.5);
        assert_eq!(manager.volume_sound(), 1.0);
        assert_eq!(device.bus_db(MixerBus::Music), Some(volume_db(0.5)));

        manager.set_volume_sound(0.1);
        assert_eq!(manager.settings.get_f32(KEY_SOUND_VOLUME), Some(0.1));
        assert_eq!(device.bus_db(MixerBus::Sound), Some(volume_db(0.1)));

        manager.set_volume_music(2.0);
        assert_eq!(manager.volume_music(), 1.0);
    }

    #[test]
    fn release_unused_destroys_idle_channels() {
        let (mut manager, device, _) = setup(library());
        let a = manager.play(SfxRequest::new("sfx", "click"));
        let b = manager.play(SfxRequest::new("sfx", "theme_a"));
        manager.update(0.05);
        manager.stop(a);

        assert_eq!(manager.channel_count(), 2);
        manager.release_unused();
        assert_eq!(device.destroyed(), 1);
        assert_eq!(manager.pooled_count(), 0);
        assert_eq!(manager.channel_count(), 1);
        assert!(manager.is_playing(b));

        manager.play(SfxRequest::new("sfx", "click"));
        assert_eq!(device.created(), 3);
    }

    #[test]
    fn shutdown_destroys_everything() {
        let (mut manager, device, _) = setup(MockLoader::new().with_clip("click", 0.5));
        manager.play(SfxRequest::new("sfx", "click"));
        manager.play(SfxRequest::new("sfx", "pending"));
        manager.update(0.05);

        manager.shutdown().unwrap();
        assert_eq!(device.destroyed(), 2);
    }

    #[test]
    fn callbacks_see_their_own_id() {
        let (mut manager, _, _) = setup(library());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = manager.play(
            SfxRequest::new("sfx", "click").on_complete(move |id| sink.borrow_mut().push(id)),
        );
        run(&mut manager, 1.0);
        assert_eq!(*seen.borrow(), vec![id]);
    }
}
