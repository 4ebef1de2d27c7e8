use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::Context;
use hound::WavReader;
use tracing::{debug, info};

use crate::error::Result;

/// Media playback collaborator driven by timestamp controls
///
/// Implementations:
/// - UI players wrap the platform's audio/video element
/// - [`LocalMediaPlayer`] keeps a playback clock for a local WAV file
#[async_trait::async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Move the playhead to `seconds` from the start
    async fn seek(&self, seconds: f64) -> Result<()>;

    /// Start or resume playback
    async fn play(&self) -> Result<()>;

    /// Pause playback, keeping the position
    async fn pause(&self) -> Result<()>;

    /// Current playhead position in seconds
    fn current_time(&self) -> f64;

    /// Whether playback is running
    fn is_playing(&self) -> bool;

    /// Player name for logging
    fn name(&self) -> &str;
}

#[derive(Debug)]
struct Clock {
    /// Position when the clock was last anchored
    position: f64,
    /// Set while playing
    resumed_at: Option<Instant>,
}

/// Wall-clock player over a local audio file
///
/// Tracks position and play state the way a media element does, without
/// producing sound. Positions are clamped into `[0, duration]`.
#[derive(Debug)]
pub struct LocalMediaPlayer {
    name: String,
    duration_seconds: f64,
    clock: Mutex<Clock>,
}

impl LocalMediaPlayer {
    /// A paused player at position 0 for media of the given length
    pub fn new(name: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            name: name.into(),
            duration_seconds: duration_seconds.max(0.0),
            clock: Mutex::new(Clock {
                position: 0.0,
                resumed_at: None,
            }),
        }
    }

    /// Build a player for a WAV file, reading its duration from the header
    pub fn open_wav(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!("Opening media file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            anyhow::bail!("WAV file {} has a zero sample rate", path.display());
        }

        // duration() counts samples per channel
        let duration_seconds = reader.duration() as f64 / spec.sample_rate as f64;

        info!(
            "Media file loaded: {:.1}s, {}Hz, {} channels",
            duration_seconds, spec.sample_rate, spec.channels
        );

        Ok(Self::new(path.display().to_string(), duration_seconds))
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn position_of(&self, clock: &Clock) -> f64 {
        let elapsed = clock
            .resumed_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (clock.position + elapsed).clamp(0.0, self.duration_seconds)
    }

    /// Stop the clock if playback has run off the end of the media
    fn settle(&self, clock: &mut Clock) {
        if clock.resumed_at.is_some() && self.position_of(clock) >= self.duration_seconds {
            clock.position = self.duration_seconds;
            clock.resumed_at = None;
            debug!("{}: reached the end", self.name);
        }
    }
}

#[async_trait::async_trait]
impl MediaPlayer for LocalMediaPlayer {
    async fn seek(&self, seconds: f64) -> Result<()> {
        let mut clock = self.clock();
        self.settle(&mut clock);
        clock.position = seconds.clamp(0.0, self.duration_seconds);
        if clock.resumed_at.is_some() {
            clock.resumed_at = Some(Instant::now());
        }
        debug!("{}: seek to {:.2}s", self.name, clock.position);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut clock = self.clock();
        self.settle(&mut clock);
        if clock.resumed_at.is_none() {
            // Playing at the end starts over
            if clock.position >= self.duration_seconds {
                clock.position = 0.0;
            }
            clock.resumed_at = Some(Instant::now());
            debug!("{}: play from {:.2}s", self.name, clock.position);
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut clock = self.clock();
        if clock.resumed_at.is_some() {
            clock.position = self.position_of(&clock);
            clock.resumed_at = None;
            debug!("{}: paused at {:.2}s", self.name, clock.position);
        }
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let clock = self.clock();
        self.position_of(&clock)
    }

    fn is_playing(&self) -> bool {
        let mut clock = self.clock();
        // Playback stops by itself at the end of the media
        self.settle(&mut clock);
        clock.resumed_at.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
