//! Resonance - demo driver for the playback engine
//!
//! Usage: `resonance <assets-dir> <music> [sfx...]`
//!
//! Clips are looked up as `<assets-dir>/music/<music>` and
//! `<assets-dir>/sfx/<name>`. The music loops while each effect is fired once
//! a second, alternating between flat and positioned playback.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use glam::Vec3;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use resonance_audio::{
    FileClipLoader, KiraBackend, SfxRequest, SoundManager, Spatial3dSettings, TimerEvent,
    TomlSettingsStore,
};
use resonance_core::{ClockConfig, FrameClock, TimerQueue};

const FRAME: Duration = Duration::from_millis(16);
const RUN_TIME: f64 = 12.0;

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut args = std::env::args().skip(1);
    let (Some(root), Some(music)) = (args.next(), args.next()) else {
        bail!("usage: resonance <assets-dir> <music> [sfx...]");
    };
    let effects: Vec<String> = args.collect();
    let root = PathBuf::from(root);

    info!("Starting Resonance demo from {:?}", root);

    let backend = KiraBackend::new().context("Failed to open audio device")?;
    let loader = FileClipLoader::new(&root);
    let settings = TomlSettingsStore::open_default().context("Failed to open audio settings")?;
    info!("Audio settings stored at {:?}", settings.path());
    let mut sounds = SoundManager::new(
        backend,
        loader,
        TimerQueue::<TimerEvent>::new(),
        settings,
    );

    let spatial_path = root.join("spatial.toml");
    if spatial_path.is_file() {
        let spatial = Spatial3dSettings::load(&spatial_path)?;
        sounds.set_spatial_settings(Some(spatial));
    }

    sounds.play_music(SfxRequest::new("music", music).fade_in(2.0));

    let mut clock = FrameClock::new(ClockConfig::default());
    let mut last = Instant::now();
    let mut next_effect: f64 = 1.0;
    let mut fired = 0usize;

    while clock.unscaled_time < RUN_TIME {
        let now = Instant::now();
        let delta = clock.tick(now.duration_since(last).as_secs_f32());
        last = now;

        if !effects.is_empty() && clock.unscaled_time >= next_effect {
            let name = &effects[fired % effects.len()];
            let request = SfxRequest::new("sfx", name.as_str()).on_complete(|id| {
                info!("Effect {} finished", id);
            });
            if fired % 2 == 0 {
                sounds.play(request);
            } else {
                let side = if fired % 4 == 1 { 4.0 } else { -4.0 };
                sounds.play_3d(request, Vec3::new(side, 0.0, -2.0));
            }
            fired += 1;
            next_effect += 1.0;
        }

        sounds.update(delta);
        std::thread::sleep(FRAME);
    }

    sounds.stop_music();
    let fade_end = clock.unscaled_time + 1.5;
    while clock.unscaled_time < fade_end {
        let now = Instant::now();
        let delta = clock.tick(now.duration_since(last).as_secs_f32());
        last = now;
        sounds.update(delta);
        std::thread::sleep(FRAME);
    }

    info!("Played {} effects, shutting down", fired);
    sounds.shutdown()?;
    Ok(())
}
