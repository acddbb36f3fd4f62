//! Rodio-based output devices
//!
//! rodio's `OutputStream` is not `Send`, so it lives on a dedicated audio
//! thread for the lifetime of the factory. Devices only hold the stream
//! handle and their own `Sink`, both of which can be shared across threads.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, error, info, warn};

use super::device::{DeviceFactory, OutputDevice, PcmFormat, PlaybackError};
use crate::threading::Thread;

// =============================================================================
// Audio Thread
// =============================================================================

/// Owner of the output stream
struct AudioThread {
    handle: OutputStreamHandle,
    shutdown: Sender<()>,
    thread: Option<Thread<()>>,
}

impl AudioThread {
    fn start(output_device: Option<&str>) -> Result<Self, PlaybackError> {
        let (ready_tx, ready_rx) = channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let wanted = output_device.map(str::to_string);

        let thread = Thread::spawn("earcon-audio", move || {
            let (_stream, handle) = match open_stream(wanted.as_deref()) {
                Ok(opened) => opened,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(handle)).is_err() {
                return;
            }
            // Keep the stream alive until the factory goes away.
            let _ = shutdown_rx.recv();
            debug!("audio thread shutting down");
        })
        .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|_| PlaybackError::DeviceUnavailable("audio thread exited".to_string()))??;

        Ok(Self {
            handle,
            shutdown: shutdown_tx,
            thread: Some(thread),
        })
    }
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                error!("audio thread did not shut down cleanly: {}", e);
            }
        }
    }
}

fn open_stream(wanted: Option<&str>) -> Result<(OutputStream, OutputStreamHandle), PlaybackError> {
    if let Some(name) = wanted {
        let host = cpal::default_host();
        let found = host
            .output_devices()
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false));
        match found {
            Some(device) => {
                info!(device = %name, "opening named output device");
                return OutputStream::try_from_device(&device)
                    .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()));
            }
            None => warn!(device = %name, "output device not found, using default"),
        }
    }

    OutputStream::try_default().map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))
}

/// Names of the output devices on the default host
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("cannot enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

// =============================================================================
// Device
// =============================================================================

/// Output device backed by a rodio `Sink`
pub struct RodioDevice {
    format: PcmFormat,
    stream: Option<OutputStreamHandle>,
    sink: Mutex<Option<Arc<Sink>>>,
}

impl RodioDevice {
    fn sink(&self) -> Result<Arc<Sink>, PlaybackError> {
        let stream = self.stream.as_ref().ok_or_else(|| {
            PlaybackError::DeviceUnavailable("no audio output stream".to_string())
        })?;

        let mut slot = self.sink.lock();
        if let Some(sink) = slot.as_ref() {
            return Ok(Arc::clone(sink));
        }
        let sink = Arc::new(
            Sink::try_new(stream).map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?,
        );
        *slot = Some(Arc::clone(&sink));
        Ok(sink)
    }
}

impl OutputDevice for RodioDevice {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn feed(&self, samples: &[i16]) -> Result<(), PlaybackError> {
        if samples.is_empty() {
            return Ok(());
        }
        let sink = self.sink()?;
        sink.append(SamplesBuffer::new(
            self.format.channels,
            self.format.sample_rate,
            samples.to_vec(),
        ));
        Ok(())
    }

    fn idle(&self) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.sleep_until_end();
        }
    }

    fn stop(&self) {
        if let Some(sink) = self.sink.lock().take() {
            sink.stop();
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Opens rodio devices on a shared output stream
///
/// The stream is started on first use. If it cannot be opened every device
/// reports `PlaybackError::DeviceUnavailable` from `feed`.
pub struct RodioDeviceFactory {
    output_device: Option<String>,
    audio: Mutex<Option<Result<AudioThread, PlaybackError>>>,
}

impl RodioDeviceFactory {
    /// `output_device` names a host device; `None` uses the default
    pub fn new(output_device: Option<String>) -> Self {
        Self {
            output_device,
            audio: Mutex::new(None),
        }
    }

    fn stream_handle(&self) -> Option<OutputStreamHandle> {
        let mut audio = self.audio.lock();
        let audio = audio.get_or_insert_with(|| {
            let started = AudioThread::start(self.output_device.as_deref());
            if let Err(e) = &started {
                error!("cannot open audio output: {}", e);
            }
            started
        });
        audio.as_ref().ok().map(|thread| thread.handle.clone())
    }
}

impl DeviceFactory for RodioDeviceFactory {
    fn open(&self, format: PcmFormat) -> Arc<dyn OutputDevice> {
        debug!(%format, "opening rodio device");
        Arc::new(RodioDevice {
            format,
            stream: self.stream_handle(),
            sink: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_without_stream_reports_unavailable() {
        let device = RodioDevice {
            format: PcmFormat::TONE,
            stream: None,
            sink: Mutex::new(None),
        };
        let err = device.feed(&[0; 4]).unwrap_err();
        assert!(matches!(err, PlaybackError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_device_without_stream_idles_and_stops() {
        let device = RodioDevice {
            format: PcmFormat::TONE,
            stream: None,
            sink: Mutex::new(None),
        };
        assert!(device.feed(&[]).is_ok());
        device.idle();
        device.stop();
    }

    #[test]
    fn test_factory_types_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RodioDevice>();
        assert_send_sync::<RodioDeviceFactory>();
    }
}
