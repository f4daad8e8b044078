//! kira implementations of the device and loader capabilities
//!
//! Channels play `StaticSoundData` routed into one of two kira sub-tracks
//! (music and sound). Clip files are decoded on a worker thread and handed
//! back to the engine through [`ClipLoader::poll_loaded`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, TryFromFloatSecsError};

use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;
use kira::manager::backend::DefaultBackend;
use kira::manager::{AudioManager, AudioManagerSettings};
use kira::sound::static_sound::{StaticSoundData, StaticSoundHandle, StaticSoundSettings};
use kira::track::{TrackBuilder, TrackHandle};
use kira::tween::Tween;
use kira::{StartTime, Volume};
use tracing::{debug, error, info, warn};

use crate::backend::{
    AudioBackend, AudioClip, ChannelSettings, ClipLoader, LoadTicket, LoadedClip, MixerBus,
    PlaybackChannel,
};
use crate::error::AudioError;
use crate::spatial::{compute_spatial, Attenuation, Listener};

/// Extensions tried, in order, when a clip name has none.
const EXTENSIONS: [&str; 4] = ["ogg", "wav", "mp3", "flac"];

/// A decoded clip shared between the loader cache and a channel.
#[derive(Clone)]
pub struct KiraClip {
    key: String,
    name: String,
    data: StaticSoundData,
}

impl AudioClip for KiraClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> f32 {
        self.data.duration().as_secs_f32()
    }
}

/// A started kira sound and what is needed to re-mix it while it plays.
struct LiveSound {
    handle: StaticSoundHandle,
    bus: MixerBus,
    volume: f32,
    spatial: Option<(Vec3, Attenuation)>,
    spatial_gain: f32,
}

impl LiveSound {
    fn amplitude(&self) -> f64 {
        (self.volume * self.spatial_gain) as f64
    }
}

/// Gain and kira panning (0 = left, 0.5 = center, 1 = right) for an emitter.
fn place(listener: &Listener, position: Vec3, attenuation: &Attenuation) -> (f32, f64) {
    let params = compute_spatial(listener, position, attenuation);
    (params.volume, (params.panning as f64 + 1.0) * 0.5)
}

struct Device {
    manager: AudioManager<DefaultBackend>,
    music: TrackHandle,
    sound: TrackHandle,
    pitch: f32,
    listener: Listener,
    live: HashMap<u64, LiveSound>,
    next_key: u64,
}

impl Device {
    fn rate(&self, bus: MixerBus) -> f32 {
        if bus == MixerBus::Pitch {
            self.pitch
        } else {
            1.0
        }
    }
}

/// Output device backed by a kira `AudioManager`.
pub struct KiraBackend {
    device: Rc<RefCell<Device>>,
}

impl KiraBackend {
    /// Open the default output device.
    pub fn new() -> Result<Self, AudioError> {
        let mut manager = AudioManager::<DefaultBackend>::new(AudioManagerSettings::default())
            .map_err(|e| AudioError::InitFailed(e.to_string()))?;
        let music = manager
            .add_sub_track(TrackBuilder::new())
            .map_err(|e| AudioError::InitFailed(e.to_string()))?;
        let sound = manager
            .add_sub_track(TrackBuilder::new())
            .map_err(|e| AudioError::InitFailed(e.to_string()))?;

        info!("kira output device opened");

        Ok(Self {
            device: Rc::new(RefCell::new(Device {
                manager,
                music,
                sound,
                pitch: 1.0,
                listener: Listener::default(),
                live: HashMap::new(),
                next_key: 0,
            })),
        })
    }

    /// Move the listener and re-place every playing 3D sound around it.
    pub fn set_listener(&mut self, position: Vec3, forward: Vec3, up: Vec3) {
        let mut device = self.device.borrow_mut();
        let Device { listener, live, .. } = &mut *device;
        listener.position = position;
        listener.forward = forward;
        listener.up = up;

        for sound in live.values_mut() {
            let Some((emitter, attenuation)) = &sound.spatial else {
                continue;
            };
            let (gain, panning) = place(listener, *emitter, attenuation);
            sound.spatial_gain = gain;
            let amplitude = sound.amplitude();
            sound.handle.set_volume(amplitude, Tween::default());
            sound.handle.set_panning(panning, Tween::default());
        }
    }
}

impl AudioBackend for KiraBackend {
    type Clip = KiraClip;
    type Channel = KiraChannel;

    fn create_channel(&mut self) -> KiraChannel {
        let key = {
            let mut device = self.device.borrow_mut();
            device.next_key += 1;
            device.next_key
        };
        KiraChannel {
            device: Rc::clone(&self.device),
            key,
            bus: MixerBus::Sound,
            looping: false,
            position: None,
            attenuation: None,
            volume: 1.0,
            clip: None,
        }
    }

    fn destroy_channel(&mut self, mut channel: KiraChannel) {
        channel.stop();
    }

    fn set_bus_volume(&mut self, bus: MixerBus, db: f32) {
        let mut device = self.device.borrow_mut();
        let track = match bus {
            MixerBus::Music => &mut device.music,
            MixerBus::Sound | MixerBus::Pitch | MixerBus::Voice => &mut device.sound,
        };
        track.set_volume(Volume::Decibels(db as f64), Tween::default());
    }

    /// Applies to Pitch-bus sounds already playing as well as new ones.
    fn set_pitch(&mut self, pitch: f32) {
        let mut device = self.device.borrow_mut();
        device.pitch = pitch;
        for sound in device.live.values_mut() {
            if sound.bus == MixerBus::Pitch {
                sound.handle.set_playback_rate(pitch as f64, Tween::default());
            }
        }
    }
}

/// Scheduled start offset, `None` for an immediate start.
fn start_delay(delay: f32) -> Result<Option<Duration>, TryFromFloatSecsError> {
    if delay > 0.0 {
        Duration::try_from_secs_f32(delay).map(Some)
    } else {
        Ok(None)
    }
}

/// One playback slot on the kira device.
pub struct KiraChannel {
    device: Rc<RefCell<Device>>,
    key: u64,
    bus: MixerBus,
    looping: bool,
    position: Option<Vec3>,
    attenuation: Option<Attenuation>,
    volume: f32,
    clip: Option<KiraClip>,
}

impl KiraChannel {
    fn with_live(&self, f: impl FnOnce(&mut LiveSound)) {
        if let Some(sound) = self.device.borrow_mut().live.get_mut(&self.key) {
            f(sound);
        }
    }
}

impl PlaybackChannel for KiraChannel {
    type Clip = KiraClip;

    fn set_active(&mut self, active: bool) {
        if !active {
            self.stop();
        }
    }

    fn configure(&mut self, settings: &ChannelSettings<'_>) {
        self.bus = settings.bus;
        self.looping = settings.looping;
        self.volume = settings.volume;
        self.position = (settings.spatial_blend > 0.0).then_some(settings.position);
        self.attenuation = settings.attenuation.cloned();
    }

    fn bind_clip(&mut self, clip: KiraClip) {
        self.clip = Some(clip);
    }

    fn take_clip(&mut self) -> Option<KiraClip> {
        self.clip.take()
    }

    fn clip(&self) -> Option<&KiraClip> {
        self.clip.as_ref()
    }

    fn play(&mut self, delay: f32) {
        if self.clip.is_none() {
            return;
        }
        self.stop();
        let Some(clip) = &self.clip else {
            return;
        };

        let mut device = self.device.borrow_mut();
        let spatial = self.position.zip(self.attenuation.clone());
        let (spatial_gain, panning) = match &spatial {
            Some((emitter, attenuation)) => place(&device.listener, *emitter, attenuation),
            None => (1.0, 0.5),
        };

        let mut settings = StaticSoundSettings::new()
            .volume((self.volume * spatial_gain) as f64)
            .panning(panning)
            .playback_rate(device.rate(self.bus) as f64)
            .output_destination(match self.bus {
                MixerBus::Music => &device.music,
                MixerBus::Sound | MixerBus::Pitch | MixerBus::Voice => &device.sound,
            });
        if self.looping {
            settings = settings.loop_region(..);
        }
        match start_delay(delay) {
            Ok(Some(delay)) => settings = settings.start_time(StartTime::Delayed(delay)),
            Ok(None) => {}
            Err(e) => warn!("Ignoring start delay for '{}': {}", clip.name, e),
        }

        let data = clip.data.clone().with_settings(settings);
        match device.manager.play(data) {
            Ok(handle) => {
                device.live.insert(
                    self.key,
                    LiveSound {
                        handle,
                        bus: self.bus,
                        volume: self.volume,
                        spatial,
                        spatial_gain,
                    },
                );
            }
            Err(e) => error!("Failed to start '{}': {}", clip.name, e),
        }
    }

    fn pause(&mut self) {
        self.with_live(|sound| sound.handle.pause(Tween::default()));
    }

    fn unpause(&mut self) {
        self.with_live(|sound| sound.handle.resume(Tween::default()));
    }

    fn stop(&mut self) {
        let removed = self.device.borrow_mut().live.remove(&self.key);
        if let Some(mut sound) = removed {
            sound.handle.stop(Tween::default());
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.with_live(|sound| {
            sound.volume = volume;
            let amplitude = sound.amplitude();
            sound.handle.set_volume(amplitude, Tween::default());
        });
    }

    fn position(&self) -> f32 {
        self.device
            .borrow()
            .live
            .get(&self.key)
            .map_or(0.0, |sound| sound.handle.position() as f32)
    }

    fn playback_rate(&self) -> f32 {
        self.device.borrow().rate(self.bus)
    }
}

struct LoadRequest {
    key: String,
    folder: String,
    name: String,
}

struct LoadResult {
    key: String,
    data: Result<StaticSoundData, AudioError>,
}

struct CacheEntry {
    clip: KiraClip,
    refs: usize,
}

/// Loads clips from `<root>/<folder>/<name>[.ext]` on a background thread.
///
/// Decoded clips are reference counted: every delivery takes a reference and
/// every [`ClipLoader::release_audio`] gives one back. Concurrent requests for
/// the same clip share a single decode.
pub struct FileClipLoader {
    requests: Option<Sender<LoadRequest>>,
    results: Receiver<LoadResult>,
    worker: Option<JoinHandle<()>>,
    cache: HashMap<String, CacheEntry>,
    waiting: HashMap<String, Vec<LoadTicket>>,
    ready: Vec<LoadedClip<KiraClip>>,
}

impl FileClipLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<LoadRequest>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let worker = thread::Builder::new()
            .name("resonance-loader".into())
            .spawn(move || {
                for request in request_rx {
                    let data = decode(&root, &request.folder, &request.name);
                    let result = LoadResult {
                        key: request.key,
                        data,
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn clip loader thread: {}", e);
                None
            }
        };

        Self {
            requests: Some(request_tx),
            results: result_rx,
            worker,
            cache: HashMap::new(),
            waiting: HashMap::new(),
            ready: Vec::new(),
        }
    }

    /// Number of distinct clips currently held.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn deliver(&mut self, key: &str, ticket: LoadTicket) {
        let clip = self.cache.get_mut(key).map(|entry| {
            entry.refs += 1;
            entry.clip.clone()
        });
        self.ready.push(LoadedClip { ticket, clip });
    }
}

impl ClipLoader for FileClipLoader {
    type Clip = KiraClip;

    fn load_audio(&mut self, folder: &str, name: &str, ticket: LoadTicket) {
        let key = format!("{}/{}", folder, name);

        if self.cache.contains_key(&key) {
            self.deliver(&key, ticket);
            return;
        }

        if let Some(waiters) = self.waiting.get_mut(&key) {
            waiters.push(ticket);
            return;
        }

        let request = LoadRequest {
            key: key.clone(),
            folder: folder.to_string(),
            name: name.to_string(),
        };
        let sent = self
            .requests
            .as_ref()
            .is_some_and(|tx| tx.send(request).is_ok());
        if !sent {
            warn!("Clip loader is not running, dropping load of '{}'", key);
            self.ready.push(LoadedClip { ticket, clip: None });
            return;
        }
        self.waiting.insert(key, vec![ticket]);
    }

    fn poll_loaded(&mut self) -> Vec<LoadedClip<KiraClip>> {
        let results: Vec<LoadResult> = self.results.try_iter().collect();
        for result in results {
            let waiters = self.waiting.remove(&result.key).unwrap_or_default();
            match result.data {
                Ok(data) => {
                    let name = result
                        .key
                        .rsplit('/')
                        .next()
                        .unwrap_or(&result.key)
                        .to_string();
                    debug!("Decoded '{}'", result.key);
                    self.cache.insert(
                        result.key.clone(),
                        CacheEntry {
                            clip: KiraClip {
                                key: result.key.clone(),
                                name,
                                data,
                            },
                            refs: 0,
                        },
                    );
                    for ticket in waiters {
                        self.deliver(&result.key, ticket);
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    for ticket in waiters {
                        self.ready.push(LoadedClip { ticket, clip: None });
                    }
                }
            }
        }
        std::mem::take(&mut self.ready)
    }

    fn release_audio(&mut self, clip: KiraClip) {
        let Some(entry) = self.cache.get_mut(&clip.key) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            self.cache.remove(&clip.key);
            debug!("Unloaded '{}'", clip.key);
        }
    }
}

impl Drop for FileClipLoader {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Candidate files for `folder/name`, in the order they are tried.
fn candidates(root: &Path, folder: &str, name: &str) -> Vec<PathBuf> {
    let base = root.join(folder).join(name);
    if base.extension().is_some() {
        return vec![base];
    }
    EXTENSIONS
        .iter()
        .map(|ext| base.with_extension(ext))
        .collect()
}

fn decode(root: &Path, folder: &str, name: &str) -> Result<StaticSoundData, AudioError> {
    let Some(path) = candidates(root, folder, name)
        .into_iter()
        .find(|p| p.is_file())
    else {
        return Err(AudioError::ClipNotFound {
            folder: folder.to_string(),
            name: name.to_string(),
        });
    };
    StaticSoundData::from_file(&path).map_err(|e| AudioError::LoadFailed(path, e.to_string()))
}
