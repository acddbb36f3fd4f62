//! Audio commands
//!
//! An audio command is a unit of playback with a duration known before it
//! runs. Chains use that duration to reserve time on the speech timeline, so
//! it must never depend on how long `run` actually blocks.
//!
//! # Design Notes
//!
//! Commands are built once, when their rule is constructed, and shared by
//! every match of the rule. `run` may therefore be called several times,
//! possibly overlapping, and `terminate` may race with any of those calls.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::beep::generate_beep;
use super::device::{DeviceFactory, OutputDevice, PcmFormat, PlaybackError};
use super::wav::{PcmClip, WavError};
use crate::threading::Interrupt;

/// A playable cue with a fixed duration
pub trait AudioCommand: Send + Sync + fmt::Debug {
    /// Milliseconds this command occupies on the speech timeline
    fn duration_ms(&self) -> u64;

    /// Play the command, blocking until playback finishes or is stopped
    fn run(&self) -> Result<(), PlaybackError>;

    /// Stop playback
    ///
    /// Never blocks, may be called any number of times, before `run` or
    /// concurrently with it.
    fn terminate(&self);

    /// Whether the command reserves time and is grouped into chains
    fn is_synchronous(&self) -> bool {
        true
    }
}

// ============================================================================
// Tone
// ============================================================================

/// Synthesized beep played on the shared tone device
pub struct ToneCommand {
    hz: u32,
    length_ms: u64,
    left: u8,
    right: u8,
    device: Arc<dyn OutputDevice>,
}

impl ToneCommand {
    /// `device` is the shared two-channel tone device
    pub fn new(hz: u32, length_ms: u64, volume: u8, device: Arc<dyn OutputDevice>) -> Self {
        Self {
            hz,
            length_ms,
            left: volume,
            right: volume,
            device,
        }
    }

    pub fn hz(&self) -> u32 {
        self.hz
    }
}

impl fmt::Debug for ToneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ToneCommand({}, {}, left={}, right={})",
            self.hz, self.length_ms, self.left, self.right
        )
    }
}

impl AudioCommand for ToneCommand {
    fn duration_ms(&self) -> u64 {
        self.length_ms
    }

    fn run(&self) -> Result<(), PlaybackError> {
        let samples = generate_beep(self.hz, self.length_ms, self.left, self.right);
        self.device.feed(&samples)?;
        self.device.idle();
        Ok(())
    }

    fn terminate(&self) {
        self.device.stop();
    }
}

// ============================================================================
// Wave Clip
// ============================================================================

/// Pre-decoded WAV clip played on its own device
pub struct WaveClipCommand {
    path: PathBuf,
    clip: PcmClip,
    total_ms: u64,
    start_adjustment_ms: i64,
    end_adjustment_ms: i64,
    device: Arc<dyn OutputDevice>,
    interrupt: Interrupt,
}

impl WaveClipCommand {
    /// Load and prepare a clip
    ///
    /// Volume scaling and a positive start trim are applied here, once. A
    /// negative start trim becomes a pause before playback.
    ///
    /// # Errors
    /// Returns `WavError` if the file cannot be read or is not 16-bit PCM
    pub fn load(
        path: &Path,
        start_adjustment_ms: i64,
        end_adjustment_ms: i64,
        volume: u8,
        devices: &dyn DeviceFactory,
    ) -> Result<Self, WavError> {
        let mut clip = PcmClip::open(path)?;
        let total_ms = clip.duration_ms();

        clip.apply_volume(volume);
        if start_adjustment_ms > 0 {
            clip.trim_start_ms(start_adjustment_ms.unsigned_abs());
        }

        let device = devices.open(PcmFormat::new(clip.channels(), clip.sample_rate()));
        debug!(path = %path.display(), total_ms, "loaded wave clip");

        Ok(Self {
            path: path.to_path_buf(),
            clip,
            total_ms,
            start_adjustment_ms,
            end_adjustment_ms,
            device,
            interrupt: Interrupt::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the file before any adjustment
    pub fn clip_ms(&self) -> u64 {
        self.total_ms
    }
}

impl fmt::Debug for WaveClipCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaveClipCommand({:?})", self.path)
    }
}

impl AudioCommand for WaveClipCommand {
    fn duration_ms(&self) -> u64 {
        let total = i64::try_from(self.total_ms)
            .unwrap_or(i64::MAX)
            .saturating_sub(self.start_adjustment_ms)
            .saturating_sub(self.end_adjustment_ms);
        total.max(0) as u64
    }

    fn run(&self) -> Result<(), PlaybackError> {
        let since = self.interrupt.generation();
        if self.start_adjustment_ms < 0 {
            let pause = Duration::from_millis(self.start_adjustment_ms.unsigned_abs());
            if self.interrupt.sleep_for(pause, since) {
                return Ok(());
            }
        }
        if self.interrupt.generation() != since {
            return Ok(());
        }

        self.device.stop();
        self.device.feed(self.clip.samples())?;
        self.device.idle();
        Ok(())
    }

    fn terminate(&self) {
        self.interrupt.trigger();
        self.device.stop();
    }
}
