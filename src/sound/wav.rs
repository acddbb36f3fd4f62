//! WAV clip loader
//!
//! Loads RIFF WAVE files into memory as interleaved 16-bit samples. Only
//! 16-bit PCM is accepted; anything else is rejected at load time so a bad
//! earcon file surfaces when its rule is built, not when it is played.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

// WAV format constants (little-endian IDs)
const RIFF_ID: u32 = 0x46464952; // "RIFF"
const WAVE_ID: u32 = 0x45564157; // "WAVE"
const FMT_ID: u32 = 0x20746d66; // "fmt "
const DATA_ID: u32 = 0x61746164; // "data"

// WAV format codes
const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

/// Errors produced while loading a clip
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WavError {
    #[error("Cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Invalid WAV data: {0}")]
    InvalidData(String),

    #[error("Unsupported WAV encoding: format tag {0}")]
    UnsupportedEncoding(u16),

    #[error("Only 16-bit WAV files are supported; this file uses {bits} bits per sample")]
    UnsupportedSampleWidth { bits: u16 },
}

pub type WavResult<T> = Result<T, WavError>;

/// WAV format chunk
#[derive(Debug, Default, Clone, Copy)]
struct FormatChunk {
    channels: u16,
    sample_rate: u32,
}

/// Decoded 16-bit PCM audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmClip {
    channels: u16,
    sample_rate: u32,
    samples: Vec<i16>,
}

impl PcmClip {
    /// Build a clip from interleaved samples
    pub fn from_samples(channels: u16, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            channels,
            sample_rate,
            samples,
        }
    }

    /// Load a clip from a file on disk
    pub fn open(path: &Path) -> WavResult<Self> {
        let data = std::fs::read(path).map_err(|e| WavError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&data)
    }

    /// Parse a clip from the bytes of a WAV file
    pub fn from_bytes(data: &[u8]) -> WavResult<Self> {
        let mut cursor = Cursor::new(data);

        let id = read_le_u32(&mut cursor)?;
        let _size = read_le_u32(&mut cursor)?;
        let wave = read_le_u32(&mut cursor)?;
        if id != RIFF_ID {
            return Err(WavError::InvalidData("Not a RIFF file".to_string()));
        }
        if wave != WAVE_ID {
            return Err(WavError::InvalidData("Not a WAVE file".to_string()));
        }

        let mut fmt: Option<FormatChunk> = None;
        let mut payload: Option<&[u8]> = None;

        while (cursor.position() as usize) + 8 <= data.len() {
            let chunk_id = read_le_u32(&mut cursor)?;
            let chunk_size = read_le_u32(&mut cursor)?;

            match chunk_id {
                FMT_ID => {
                    fmt = Some(parse_format_chunk(&mut cursor, chunk_size)?);
                }
                DATA_ID => {
                    let start = cursor.position() as usize;
                    let end = (start + chunk_size as usize).min(data.len());
                    payload = Some(&data[start..end]);
                    break;
                }
                _ => skip(&mut cursor, chunk_size)?,
            }
        }

        let fmt = fmt.ok_or_else(|| WavError::InvalidData("No format chunk found".to_string()))?;
        let payload =
            payload.ok_or_else(|| WavError::InvalidData("No data chunk found".to_string()))?;

        // A truncated final frame is dropped rather than half-played.
        let frame_bytes = 2 * fmt.channels as usize;
        let whole = payload.len() - payload.len() % frame_bytes;
        let samples = payload[..whole]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self {
            channels: fmt.channels,
            sample_rate: fmt.sample_rate,
            samples,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Clip length in whole milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        1000 * self.frames() as u64 / u64::from(self.sample_rate)
    }

    /// Scale every sample by `percent` / 100, truncating toward zero
    pub fn apply_volume(&mut self, percent: u8) {
        if percent == 100 {
            return;
        }
        let percent = i32::from(percent);
        for sample in &mut self.samples {
            let scaled = i32::from(*sample) * percent / 100;
            *sample = scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        }
    }

    /// Drop the first `ms` milliseconds of audio
    pub fn trim_start_ms(&mut self, ms: u64) {
        let frames = ms.saturating_mul(u64::from(self.sample_rate)) / 1000;
        let samples = frames.saturating_mul(u64::from(self.channels));
        let cut = usize::try_from(samples).map_or(self.samples.len(), |n| n.min(self.samples.len()));
        self.samples.drain(..cut);
    }
}

fn read_le_u16(cursor: &mut Cursor<&[u8]>) -> WavResult<u16> {
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| WavError::InvalidData(format!("Failed to read u16: {}", e)))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_le_u32(cursor: &mut Cursor<&[u8]>) -> WavResult<u32> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| WavError::InvalidData(format!("Failed to read u32: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

/// Skip a chunk body, including the pad byte after odd-sized chunks
fn skip(cursor: &mut Cursor<&[u8]>, size: u32) -> WavResult<()> {
    let padded = i64::from(size) + i64::from(size & 1);
    cursor
        .seek(SeekFrom::Current(padded))
        .map_err(|e| WavError::InvalidData(format!("Failed to skip chunk: {}", e)))?;
    Ok(())
}

fn parse_format_chunk(cursor: &mut Cursor<&[u8]>, size: u32) -> WavResult<FormatChunk> {
    if size < 16 {
        return Err(WavError::InvalidData("Format chunk too small".to_string()));
    }

    let format = read_le_u16(cursor)?;
    let channels = read_le_u16(cursor)?;
    let sample_rate = read_le_u32(cursor)?;
    let _byte_rate = read_le_u32(cursor)?;
    let _block_align = read_le_u16(cursor)?;
    let bits_per_sample = read_le_u16(cursor)?;

    skip(cursor, size - 16)?;

    if format != WAVE_FORMAT_PCM && format != WAVE_FORMAT_EXTENSIBLE {
        return Err(WavError::UnsupportedEncoding(format));
    }
    if bits_per_sample != 16 {
        return Err(WavError::UnsupportedSampleWidth {
            bits: bits_per_sample,
        });
    }
    if channels == 0 {
        return Err(WavError::InvalidData("Zero channels".to_string()));
    }
    if sample_rate == 0 {
        return Err(WavError::InvalidData("Zero sample rate".to_string()));
    }

    Ok(FormatChunk {
        channels,
        sample_rate,
    })
}

/// Encode interleaved samples as a 16-bit PCM WAV file
///
/// Used to write test fixtures and by the command-line front end when
/// exporting a tone.
pub fn encode_pcm16(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(&RIFF_ID.to_le_bytes());
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(&WAVE_ID.to_le_bytes());
    out.extend_from_slice(&FMT_ID.to_le_bytes());
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(&DATA_ID.to_le_bytes());
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mono_clip() {
        let bytes = encode_pcm16(1, 8000, &[1, -2, 3, -4]);
        let clip = PcmClip::from_bytes(&bytes).unwrap();
        assert_eq!(clip.channels(), 1);
        assert_eq!(clip.sample_rate(), 8000);
        assert_eq!(clip.samples(), &[1, -2, 3, -4]);
        assert_eq!(clip.frames(), 4);
    }

    #[test]
    fn test_rejects_8_bit() {
        // Minimal 8-bit mono WAV: 44 bytes header + 4 bytes data
        let wav_data: Vec<u8> = vec![
            0x52, 0x49, 0x46, 0x46, // "RIFF"
            0x28, 0x00, 0x00, 0x00, // file size - 8 = 40
            0x57, 0x41, 0x56, 0x45, // "WAVE"
            0x66, 0x6d, 0x74, 0x20, // "fmt "
            0x10, 0x00, 0x00, 0x00, // chunk size = 16
            0x01, 0x00, // format = PCM
            0x01, 0x00, // channels = 1
            0x22, 0x56, 0x00, 0x00, // sample rate = 22050
            0x22, 0x56, 0x00, 0x00, // byte rate = 22050
            0x01, 0x00, // block align = 1
            0x08, 0x00, // bits per sample = 8
            0x64, 0x61, 0x74, 0x61, // "data"
            0x04, 0x00, 0x00, 0x00, // data size = 4
            0x80, 0x80, 0x80, 0x80,
        ];
        let err = PcmClip::from_bytes(&wav_data).unwrap_err();
        assert_eq!(err, WavError::UnsupportedSampleWidth { bits: 8 });
        assert!(err.to_string().contains("8 bits per sample"));
    }

    #[test]
    fn test_rejects_non_riff() {
        let result = PcmClip::from_bytes(&[0x00, 0x01, 0x02, 0x03, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(result, Err(WavError::InvalidData(_))));
    }

    #[test]
    fn test_rejects_truncated_header() {
        assert!(PcmClip::from_bytes(&[0x52, 0x49]).is_err());
    }

    #[test]
    fn test_skips_unknown_odd_sized_chunk() {
        let plain = encode_pcm16(1, 8000, &[7, 8]);
        // Splice a 3-byte "LIST" chunk (plus pad byte) between fmt and data.
        let mut bytes = plain[..36].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        bytes.extend_from_slice(&plain[36..]);

        let clip = PcmClip::from_bytes(&bytes).unwrap();
        assert_eq!(clip.samples(), &[7, 8]);
    }

    #[test]
    fn test_duration_floors_to_whole_ms() {
        // 1001 frames at 1 kHz stereo -> 1001 ms; 15 frames at 8 kHz -> 1 ms
        let clip = PcmClip::from_samples(2, 1000, vec![0; 2002]);
        assert_eq!(clip.duration_ms(), 1001);
        let clip = PcmClip::from_samples(1, 8000, vec![0; 15]);
        assert_eq!(clip.duration_ms(), 1);
    }

    #[test]
    fn test_apply_volume_truncates_toward_zero() {
        let mut clip = PcmClip::from_samples(1, 8000, vec![101, -101, i16::MAX, i16::MIN]);
        clip.apply_volume(50);
        assert_eq!(clip.samples(), &[50, -50, 16383, -16384]);
    }

    #[test]
    fn test_apply_volume_zero_silences() {
        let mut clip = PcmClip::from_samples(1, 8000, vec![1000, -1000]);
        clip.apply_volume(0);
        assert_eq!(clip.samples(), &[0, 0]);
    }

    #[test]
    fn test_trim_start_counts_channels() {
        // 10 ms at 1 kHz stereo = 10 frames = 20 samples
        let mut clip = PcmClip::from_samples(2, 1000, (0..100).collect());
        clip.trim_start_ms(10);
        assert_eq!(clip.samples().len(), 80);
        assert_eq!(clip.samples()[0], 20);
    }

    #[test]
    fn test_trim_past_end_empties_clip() {
        let mut clip = PcmClip::from_samples(1, 1000, vec![1; 10]);
        clip.trim_start_ms(500);
        assert!(clip.samples().is_empty());
    }

    #[test]
    fn test_huge_trim_saturates() {
        let mut clip = PcmClip::from_samples(2, 44100, vec![1; 10]);
        clip.trim_start_ms(u64::MAX);
        assert!(clip.samples().is_empty());
    }

    #[test]
    fn test_open_missing_file() {
        let err = PcmClip::open(Path::new("/nonexistent/earcon.wav")).unwrap_err();
        assert!(matches!(err, WavError::Io { .. }));
    }

    #[test]
    fn test_clip_is_send() {
        fn assert_send<T: Send + Sync>() {}
        assert_send::<PcmClip>();
    }
}
