//! Test doubles for the device and the loader. Both hand out cloneable
//! handles onto shared state so a test can keep inspecting them after moving
//! one clone into the engine.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use glam::Vec3;

use crate::backend::{
    AudioBackend, AudioClip, ChannelSettings, ClipLoader, LoadTicket, LoadedClip, MixerBus,
    PlaybackChannel,
};
use crate::spatial::Attenuation;

#[derive(Debug, Clone, PartialEq)]
pub struct MockClip {
    pub name: String,
    pub length: f32,
}

impl AudioClip for MockClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> f32 {
        self.length
    }
}

/// Everything a channel has been told to do.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub active: bool,
    pub bus: Option<MixerBus>,
    pub looping: bool,
    pub spatial_blend: f32,
    pub position_3d: Vec3,
    pub attenuation: Option<Attenuation>,
    pub clip: Option<String>,
    pub playing: bool,
    pub paused: bool,
    pub play_calls: u32,
    pub stop_calls: u32,
    pub last_delay: f32,
    pub volume: f32,
    pub position: f32,
}

pub struct MockChannel {
    state: Rc<RefCell<ChannelState>>,
    pitch: Rc<Cell<f32>>,
    clip: Option<MockClip>,
}

impl MockChannel {
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }
}

impl PlaybackChannel for MockChannel {
    type Clip = MockClip;

    fn set_active(&mut self, active: bool) {
        self.state.borrow_mut().active = active;
    }

    fn configure(&mut self, settings: &ChannelSettings<'_>) {
        let mut state = self.state.borrow_mut();
        state.bus = Some(settings.bus);
        state.looping = settings.looping;
        state.spatial_blend = settings.spatial_blend;
        state.position_3d = settings.position;
        state.attenuation = settings.attenuation.cloned();
        state.volume = settings.volume;
        state.position = 0.0;
    }

    fn bind_clip(&mut self, clip: MockClip) {
        self.state.borrow_mut().clip = Some(clip.name.clone());
        self.clip = Some(clip);
    }

    fn take_clip(&mut self) -> Option<MockClip> {
        self.state.borrow_mut().clip = None;
        self.clip.take()
    }

    fn clip(&self) -> Option<&MockClip> {
        self.clip.as_ref()
    }

    fn play(&mut self, delay: f32) {
        let mut state = self.state.borrow_mut();
        state.playing = true;
        state.paused = false;
        state.play_calls += 1;
        state.last_delay = delay;
    }

    fn pause(&mut self) {
        self.state.borrow_mut().paused = true;
    }

    fn unpause(&mut self) {
        self.state.borrow_mut().paused = false;
    }

    fn stop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.playing = false;
        state.paused = false;
        state.stop_calls += 1;
    }

    fn volume(&self) -> f32 {
        self.state.borrow().volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.borrow_mut().volume = volume;
    }

    fn position(&self) -> f32 {
        self.state.borrow().position
    }

    fn playback_rate(&self) -> f32 {
        if self.state.borrow().bus == Some(MixerBus::Pitch) {
            self.pitch.get()
        } else {
            1.0
        }
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    channels: Vec<Rc<RefCell<ChannelState>>>,
    destroyed: usize,
    bus_db: HashMap<MixerBus, f32>,
    pitch: Option<f32>,
}

/// Device double. The pitch parameter is shared live with every channel on
/// the Pitch bus, like a mixer group effect.
#[derive(Clone)]
pub struct MockDevice {
    inner: Rc<RefCell<DeviceState>>,
    rate: Rc<Cell<f32>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            inner: Rc::default(),
            rate: Rc::new(Cell::new(1.0)),
        }
    }

    pub fn created(&self) -> usize {
        self.inner.borrow().channels.len()
    }

    pub fn destroyed(&self) -> usize {
        self.inner.borrow().destroyed
    }

    pub fn bus_db(&self, bus: MixerBus) -> Option<f32> {
        self.inner.borrow().bus_db.get(&bus).copied()
    }

    pub fn pitch(&self) -> Option<f32> {
        self.inner.borrow().pitch
    }

    /// Shared state of the n-th channel ever created.
    pub fn channel(&self, index: usize) -> Rc<RefCell<ChannelState>> {
        Rc::clone(&self.inner.borrow().channels[index])
    }
}

impl AudioBackend for MockDevice {
    type Clip = MockClip;
    type Channel = MockChannel;

    fn create_channel(&mut self) -> MockChannel {
        let state = Rc::new(RefCell::new(ChannelState {
            volume: 1.0,
            ..Default::default()
        }));
        self.inner.borrow_mut().channels.push(Rc::clone(&state));
        MockChannel {
            state,
            pitch: Rc::clone(&self.rate),
            clip: None,
        }
    }

    fn destroy_channel(&mut self, channel: MockChannel) {
        channel.state.borrow_mut().active = false;
        self.inner.borrow_mut().destroyed += 1;
    }

    fn set_bus_volume(&mut self, bus: MixerBus, db: f32) {
        self.inner.borrow_mut().bus_db.insert(bus, db);
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.inner.borrow_mut().pitch = Some(pitch);
        self.rate.set(pitch);
    }
}

#[derive(Debug, Default)]
struct LoaderState {
    /// Clips that complete as soon as they are requested.
    library: HashMap<String, f32>,
    /// Names that fail as soon as they are requested.
    broken: Vec<String>,
    outstanding: Vec<(LoadTicket, String)>,
    ready: Vec<LoadedClip<MockClip>>,
    requested: Vec<String>,
    released: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockLoader {
    inner: Rc<RefCell<LoaderState>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests for `name` complete immediately with a clip of `length` seconds.
    pub fn with_clip(self, name: &str, length: f32) -> Self {
        self.inner.borrow_mut().library.insert(name.to_string(), length);
        self
    }

    /// Requests for `name` fail immediately.
    pub fn with_broken(self, name: &str) -> Self {
        self.inner.borrow_mut().broken.push(name.to_string());
        self
    }

    /// Finish the oldest outstanding request for `name`.
    pub fn complete(&self, name: &str, clip: Option<f32>) {
        let mut state = self.inner.borrow_mut();
        let Some(index) = state.outstanding.iter().position(|(_, n)| n == name) else {
            panic!("no outstanding load for '{}'", name);
        };
        let (ticket, name) = state.outstanding.remove(index);
        state.ready.push(LoadedClip {
            ticket,
            clip: clip.map(|length| MockClip { name, length }),
        });
    }

    pub fn requested(&self) -> Vec<String> {
        self.inner.borrow().requested.clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.inner.borrow().released.clone()
    }

    pub fn outstanding(&self) -> usize {
        self.inner.borrow().outstanding.len()
    }
}

impl ClipLoader for MockLoader {
    type Clip = MockClip;

    fn load_audio(&mut self, _folder: &str, name: &str, ticket: LoadTicket) {
        let mut state = self.inner.borrow_mut();
        state.requested.push(name.to_string());
        if let Some(&length) = state.library.get(name) {
            state.ready.push(LoadedClip {
                ticket,
                clip: Some(MockClip {
                    name: name.to_string(),
                    length,
                }),
            });
        } else if state.broken.iter().any(|n| n == name) {
            state.ready.push(LoadedClip { ticket, clip: None });
        } else {
            state.outstanding.push((ticket, name.to_string()));
        }
    }

    fn poll_loaded(&mut self) -> Vec<LoadedClip<MockClip>> {
        std::mem::take(&mut self.inner.borrow_mut().ready)
    }

    fn release_audio(&mut self, clip: MockClip) {
        self.inner.borrow_mut().released.push(clip.name);
    }
}
