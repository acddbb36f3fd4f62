//! Sound output for earcons
//!
//! # Architecture
//!
//! - `OutputDevice` / `DeviceFactory` abstract the host's wave player
//! - `AudioCommand` is the playable unit; `ToneCommand` and
//!   `WaveClipCommand` are the audible variants
//! - `wav` loads 16-bit PCM clips, `beep` synthesizes tones
//! - `rodio_backend` plays through rodio/cpal, `null` discards audio

pub mod beep;
pub mod command;
pub mod device;
pub mod null;
pub mod rodio_backend;
pub mod wav;

pub use command::{AudioCommand, ToneCommand, WaveClipCommand};
pub use device::{DeviceFactory, OutputDevice, PcmFormat, PlaybackError, TONE_SAMPLE_RATE};
pub use null::{NullDevice, NullDeviceFactory};
pub use rodio_backend::{output_device_names, RodioDevice, RodioDeviceFactory};
pub use wav::{PcmClip, WavError};
