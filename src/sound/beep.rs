//! Beep synthesis
//!
//! Produces the same squared-off sine the host's tone generator uses: a sine
//! doubled and clipped, which gives a slightly buzzy, clearly audible tone.

use super::device::TONE_SAMPLE_RATE;

/// Peak amplitude at 100% volume
const AMPLITUDE: f64 = 14000.0;

/// Generate interleaved stereo samples for a beep
///
/// The length is rounded up to a whole number of cycles so the tone ends on
/// a zero crossing. A zero frequency produces silence of the requested
/// length.
pub fn generate_beep(hz: u32, length_ms: u64, left: u8, right: u8) -> Vec<i16> {
    let rate = f64::from(TONE_SAMPLE_RATE);
    let mut frames = (length_ms as f64 * rate / 1000.0) as usize;

    if hz == 0 {
        return vec![0; frames * 2];
    }

    let samples_per_cycle = rate / f64::from(hz);
    let cycles = (frames as f64 / samples_per_cycle).ceil();
    frames = (cycles * samples_per_cycle).round() as usize;

    let left_amp = AMPLITUDE * f64::from(left.min(100)) / 100.0;
    let right_amp = AMPLITUDE * f64::from(right.min(100)) / 100.0;
    let step = std::f64::consts::TAU * f64::from(hz) / rate;

    let mut out = Vec::with_capacity(frames * 2);
    for frame in 0..frames {
        let shaped = ((frame as f64 * step).sin() * 2.0).clamp(-1.0, 1.0);
        out.push((shaped * left_amp) as i16);
        out.push((shaped * right_amp) as i16);
    }
    out
}
