//! Output device abstraction
//!
//! Mirrors the host's wave player: a device is opened for one PCM format,
//! fed interleaved 16-bit samples, waited on until idle and stopped from any
//! thread.

use std::fmt;
use std::sync::Arc;

/// Sample rate used for synthesized tones
pub const TONE_SAMPLE_RATE: u32 = 44100;

/// Error type for playback operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// No usable output device
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The device rejected the samples
    #[error("Audio device rejected samples: {0}")]
    FeedFailed(String),
    /// I/O failure while preparing audio
    #[error("I/O error: {0}")]
    Io(String),
}

/// PCM format a device is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmFormat {
    /// Stereo format used by the shared tone device
    pub const TONE: PcmFormat = PcmFormat {
        channels: 2,
        sample_rate: TONE_SAMPLE_RATE,
    };

    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Milliseconds covered by `samples` interleaved samples
    pub fn samples_to_ms(&self, samples: usize) -> u64 {
        let frames = samples as u64 / u64::from(self.channels.max(1));
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1000 / u64::from(self.sample_rate)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ch@{}Hz", self.channels, self.sample_rate)
    }
}

/// A playback device bound to one PCM format
///
/// `stop` must be callable from any thread while another thread is blocked
/// in `idle`, and must be a no-op on an idle device.
pub trait OutputDevice: Send + Sync {
    /// Format the device was opened with
    fn format(&self) -> PcmFormat;

    /// Queue interleaved samples for playback
    fn feed(&self, samples: &[i16]) -> Result<(), PlaybackError>;

    /// Block until everything fed so far has played or been stopped
    fn idle(&self);

    /// Discard queued audio and silence the device
    fn stop(&self);
}

/// Opens output devices
pub trait DeviceFactory: Send + Sync {
    /// Open a device for `format`
    ///
    /// Opening does not fail: a device without hardware behind it reports
    /// `PlaybackError::DeviceUnavailable` from `feed` instead.
    fn open(&self, format: PcmFormat) -> Arc<dyn OutputDevice>;
}
