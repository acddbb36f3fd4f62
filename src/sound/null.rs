//! Null (silent) output device
//!
//! Accepts samples without producing sound. In real-time mode `idle` still
//! blocks for as long as the fed audio would have played, so chain timing
//! behaves the same with or without hardware. Used for headless runs and
//! tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::device::{DeviceFactory, OutputDevice, PcmFormat, PlaybackError};
use crate::threading::Interrupt;

#[derive(Debug, Default)]
struct NullState {
    busy_until: Option<Instant>,
    fed_samples: usize,
    feeds: usize,
    stops: usize,
}

/// Device that discards audio
pub struct NullDevice {
    format: PcmFormat,
    realtime: bool,
    state: Mutex<NullState>,
    interrupt: Interrupt,
}

impl NullDevice {
    /// Create a device whose `idle` returns immediately
    pub fn new(format: PcmFormat) -> Self {
        Self::with_timing(format, false)
    }

    /// Create a device whose `idle` waits out the fed audio
    pub fn realtime(format: PcmFormat) -> Self {
        Self::with_timing(format, true)
    }

    fn with_timing(format: PcmFormat, realtime: bool) -> Self {
        Self {
            format,
            realtime,
            state: Mutex::new(NullState::default()),
            interrupt: Interrupt::new(),
        }
    }

    /// Total samples fed since creation
    pub fn fed_samples(&self) -> usize {
        self.state.lock().fed_samples
    }

    /// Number of `feed` calls
    pub fn feed_count(&self) -> usize {
        self.state.lock().feeds
    }

    /// Number of `stop` calls
    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }
}

impl OutputDevice for NullDevice {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn feed(&self, samples: &[i16]) -> Result<(), PlaybackError> {
        let played = Duration::from_millis(self.format.samples_to_ms(samples.len()));
        let mut state = self.state.lock();
        let now = Instant::now();
        let from = state.busy_until.filter(|t| *t > now).unwrap_or(now);
        state.busy_until = Some(from + played);
        state.fed_samples += samples.len();
        state.feeds += 1;
        Ok(())
    }

    fn idle(&self) {
        if !self.realtime {
            return;
        }
        let since = self.interrupt.generation();
        let deadline = match self.state.lock().busy_until {
            Some(deadline) => deadline,
            None => return,
        };
        self.interrupt.sleep_until(deadline, since);
    }

    fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.busy_until = None;
            state.stops += 1;
        }
        self.interrupt.trigger();
    }
}

/// Factory handing out `NullDevice`s
///
/// Keeps every device it opened so callers can inspect them afterwards.
#[derive(Default)]
pub struct NullDeviceFactory {
    realtime: bool,
    opened: Mutex<Vec<Arc<NullDevice>>>,
}

impl NullDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realtime() -> Self {
        Self {
            realtime: true,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Devices opened so far, in opening order
    pub fn devices(&self) -> Vec<Arc<NullDevice>> {
        self.opened.lock().clone()
    }
}

impl DeviceFactory for NullDeviceFactory {
    fn open(&self, format: PcmFormat) -> Arc<dyn OutputDevice> {
        let device = Arc::new(NullDevice::with_timing(format, self.realtime));
        self.opened.lock().push(Arc::clone(&device));
        device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_null_device_counts_feeds() {
        let device = NullDevice::new(PcmFormat::TONE);
        device.feed(&[0; 200]).unwrap();
        device.feed(&[0; 100]).unwrap();
        device.idle();
        assert_eq!(device.fed_samples(), 300);
        assert_eq!(device.feed_count(), 2);
    }

    #[test]
    fn test_realtime_idle_waits_for_audio() {
        // 100 ms of mono audio at 1 kHz
        let device = NullDevice::realtime(PcmFormat::new(1, 1000));
        let start = Instant::now();
        device.feed(&[0; 100]).unwrap();
        device.idle();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_stop_releases_idle() {
        let device = Arc::new(NullDevice::realtime(PcmFormat::new(1, 1000)));
        device.feed(&[0; 10_000]).unwrap();

        let waiter = Arc::clone(&device);
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.idle());
        thread::sleep(Duration::from_millis(30));
        device.stop();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(device.stop_count(), 1);
    }

    #[test]
    fn test_stop_on_idle_device_is_harmless() {
        let device = NullDevice::realtime(PcmFormat::TONE);
        device.stop();
        device.stop();
        device.idle();
        assert_eq!(device.stop_count(), 2);
    }

    #[test]
    fn test_factory_tracks_devices() {
        let factory = NullDeviceFactory::new();
        factory.open(PcmFormat::TONE);
        factory.open(PcmFormat::new(1, 22050));
        let devices = factory.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].format(), PcmFormat::new(1, 22050));
    }
}
