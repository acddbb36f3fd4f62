//! Earcon rules
//!
//! A rule pairs a regular expression with what to do where it matches: play
//! a built-in or custom WAV clip, play a beep, or change prosody around the
//! matched text.
//!
//! # Design Notes
//!
//! - Rules are validated completely when constructed. A rule that exists is
//!   playable; no error is deferred to speech time.
//! - The audio commands are built with the rule and shared by every match.
//!   Reloading the rule list throws them away with the rules.
//! - Apart from the enabled flag a rule is immutable. Editing replaces it.
//! - `caseSensitive` is stored and round-tripped but matching is always
//!   case sensitive; use `(?i)` in the pattern for the other behaviour.

pub mod matcher;
pub mod store;

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::sound::{
    AudioCommand, DeviceFactory, OutputDevice, PcmFormat, ToneCommand, WavError, WaveClipCommand,
};
use crate::speech::{ProsodyChange, ProsodyMarker, ProsodyParam, ProsodyStack};

pub use matcher::{apply_rule, apply_rules, RuleMatcher};
pub use store::{LoadReport, LoadSource, MoveDirection, RuleStore, StoreError};

/// Highest accepted beep frequency
pub const MAX_TONE_HZ: i64 = 50_000;
/// Longest accepted beep
pub const MAX_BEEP_MS: i64 = 60_000;
/// Accepted start and end trim, either sign
pub const ADJUSTMENT_RANGE: std::ops::RangeInclusive<i64> = -60_000..=60_000;
/// Accepted prosody offset range
pub const PROSODY_OFFSET_RANGE: std::ops::RangeInclusive<i64> = -100..=100;
/// Accepted prosody multiplier range
pub const PROSODY_MULTIPLIER_RANGE: std::ops::RangeInclusive<f64> = 0.1..=10.0;

/// Built-in clip played for buttons
pub const BUTTON_SOUND: &str = "unspoken/button.wav";

/// Error type for rule construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("A pattern is required")]
    EmptyPattern,

    #[error("Invalid regular expression {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Rule type {rule_type} requires field {field}")]
    MissingField {
        rule_type: RuleType,
        field: &'static str,
    },

    #[error("Wav file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Invalid wav file {}: {source}", .path.display())]
    Wav {
        path: PathBuf,
        #[source]
        source: WavError,
    },

    #[error("Tone must be an integer between 0 and 50000, got {0}")]
    ToneOutOfRange(i64),

    #[error("Duration must be an integer between 0 and 60000, got {0}")]
    DurationOutOfRange(i64),

    #[error("{field} must be between -60000 and 60000 milliseconds, got {value}")]
    AdjustmentOutOfRange { field: &'static str, value: i64 },

    #[error("Volume must be between 0 and 100, got {0}")]
    VolumeOutOfRange(i64),

    #[error("Unknown prosody parameter {0:?}; expected Pitch, Volume or Rate")]
    UnknownProsody(String),

    #[error("Prosody offset must be an integer between -100 and 100, got {0}")]
    OffsetOutOfRange(i64),

    #[error("Prosody multiplier must be between 0.1 and 10, got {0}")]
    MultiplierOutOfRange(f64),

    #[error("Specify either a prosody offset or a multiplier, not both")]
    ProsodyBothSet,

    #[error("Specify either a prosody offset or a multiplier")]
    ProsodyNeitherSet,
}

// ============================================================================
// Persisted Form
// ============================================================================

/// Rule kind as stored in the rules file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    #[serde(rename = "builtInWave")]
    BuiltInWave,
    #[serde(rename = "wave")]
    Wave,
    #[serde(rename = "beep")]
    Beep,
    #[serde(rename = "prosody")]
    Prosody,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleType::BuiltInWave => "builtInWave",
            RuleType::Wave => "wave",
            RuleType::Beep => "beep",
            RuleType::Prosody => "prosody",
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_volume() -> i64 {
    100
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One rule as stored in the rules file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pattern: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub wav_file: Option<String>,
    #[serde(default)]
    pub built_in_wav_file: Option<String>,
    #[serde(default)]
    pub tone: Option<i64>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_adjustment: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_adjustment: i64,
    #[serde(default)]
    pub prosody_name: Option<String>,
    #[serde(default)]
    pub prosody_offset: Option<i64>,
    #[serde(default)]
    pub prosody_multiplier: Option<f64>,
    #[serde(default = "default_volume")]
    pub volume: i64,
}

impl RuleRecord {
    fn blank(pattern: &str, rule_type: RuleType) -> Self {
        Self {
            comment: String::new(),
            pattern: pattern.to_string(),
            rule_type,
            wav_file: None,
            built_in_wav_file: None,
            tone: None,
            duration: None,
            enabled: true,
            case_sensitive: true,
            start_adjustment: 0,
            end_adjustment: 0,
            prosody_name: None,
            prosody_offset: None,
            prosody_multiplier: None,
            volume: 100,
        }
    }

    /// Rule playing a clip shipped in the sounds directory
    pub fn built_in(pattern: &str, relative_path: &str) -> Self {
        Self {
            built_in_wav_file: Some(relative_path.to_string()),
            ..Self::blank(pattern, RuleType::BuiltInWave)
        }
    }

    /// Rule playing an arbitrary WAV file
    pub fn wave(pattern: &str, path: &str) -> Self {
        Self {
            wav_file: Some(path.to_string()),
            ..Self::blank(pattern, RuleType::Wave)
        }
    }

    /// Rule playing a beep
    pub fn beep(pattern: &str, hz: i64, duration_ms: i64) -> Self {
        Self {
            tone: Some(hz),
            duration: Some(duration_ms),
            ..Self::blank(pattern, RuleType::Beep)
        }
    }

    /// Rule changing prosody around the matched text
    pub fn prosody(pattern: &str, name: &str, offset: Option<i64>, multiplier: Option<f64>) -> Self {
        Self {
            prosody_name: Some(name.to_string()),
            prosody_offset: offset,
            prosody_multiplier: multiplier,
            ..Self::blank(pattern, RuleType::Prosody)
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// What a rule does where it matches
#[derive(Debug, Clone, PartialEq)]
pub enum RuleBehavior {
    /// Clip path relative to the sounds directory
    BuiltInClip(String),
    /// Absolute clip path
    CustomClip(PathBuf),
    Tone { hz: u32, duration_ms: u64 },
    Prosody { param: ProsodyParam, change: ProsodyChange },
}

/// Everything a rule needs to build its commands
#[derive(Clone)]
pub struct RuleContext {
    pub sounds_dir: PathBuf,
    pub devices: Arc<dyn DeviceFactory>,
    /// Shared device all beeps play on
    pub tone_device: Arc<dyn OutputDevice>,
    pub prosody: Arc<dyn ProsodyStack>,
}

impl RuleContext {
    pub fn new(
        sounds_dir: impl Into<PathBuf>,
        devices: Arc<dyn DeviceFactory>,
        prosody: Arc<dyn ProsodyStack>,
    ) -> Self {
        let tone_device = devices.open(PcmFormat::TONE);
        Self {
            sounds_dir: sounds_dir.into(),
            devices,
            tone_device,
            prosody,
        }
    }

    /// Absolute path of a built-in clip
    ///
    /// Accepts either path separator in `relative`.
    pub fn built_in_path(&self, relative: &str) -> PathBuf {
        relative
            .split(['\\', '/'])
            .filter(|part| !part.is_empty())
            .fold(self.sounds_dir.clone(), |path, part| path.join(part))
    }
}

/// A compiled, validated rule
pub struct Rule {
    comment: String,
    pattern: String,
    regex: Regex,
    behavior: RuleBehavior,
    start_adjustment_ms: i64,
    end_adjustment_ms: i64,
    volume: u8,
    enabled: AtomicBool,
    case_sensitive: bool,
    pre: Arc<dyn AudioCommand>,
    post: Option<Arc<dyn AudioCommand>>,
}

impl Rule {
    /// Validate a record and build its commands
    ///
    /// # Errors
    /// Returns the first validation failure, in the order the rule editor
    /// checks fields
    pub fn from_record(record: &RuleRecord, ctx: &RuleContext) -> Result<Self, RuleError> {
        if record.pattern.is_empty() {
            return Err(RuleError::EmptyPattern);
        }
        let regex = Regex::new(&record.pattern).map_err(|e| RuleError::InvalidPattern {
            pattern: record.pattern.clone(),
            reason: e.to_string(),
        })?;

        if !(0..=100).contains(&record.volume) {
            return Err(RuleError::VolumeOutOfRange(record.volume));
        }
        let volume = record.volume as u8;
        for (field, value) in [
            ("startAdjustment", record.start_adjustment),
            ("endAdjustment", record.end_adjustment),
        ] {
            if !ADJUSTMENT_RANGE.contains(&value) {
                return Err(RuleError::AdjustmentOutOfRange { field, value });
            }
        }

        let behavior = behavior_of(record)?;
        let (pre, post) = build_commands(&behavior, record, volume, ctx)?;

        Ok(Self {
            comment: record.comment.clone(),
            pattern: record.pattern.clone(),
            regex,
            behavior,
            start_adjustment_ms: record.start_adjustment,
            end_adjustment_ms: record.end_adjustment,
            volume,
            enabled: AtomicBool::new(record.enabled),
            case_sensitive: record.case_sensitive,
            pre,
            post,
        })
    }

    /// The persisted form of this rule
    pub fn to_record(&self) -> RuleRecord {
        let mut record = match &self.behavior {
            RuleBehavior::BuiltInClip(rel) => RuleRecord::built_in(&self.pattern, rel),
            RuleBehavior::CustomClip(path) => {
                RuleRecord::wave(&self.pattern, &path.to_string_lossy())
            }
            RuleBehavior::Tone { hz, duration_ms } => {
                RuleRecord::beep(&self.pattern, i64::from(*hz), *duration_ms as i64)
            }
            RuleBehavior::Prosody { param, change } => {
                let (offset, multiplier) = match change {
                    ProsodyChange::Offset(o) => (Some(i64::from(*o)), None),
                    ProsodyChange::Multiplier(m) => (None, Some(*m)),
                };
                RuleRecord::prosody(&self.pattern, param.name(), offset, multiplier)
            }
        };
        record.comment = self.comment.clone();
        record.enabled = self.is_enabled();
        record.case_sensitive = self.case_sensitive;
        record.start_adjustment = self.start_adjustment_ms;
        record.end_adjustment = self.end_adjustment_ms;
        record.volume = i64::from(self.volume);
        record
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn behavior(&self) -> &RuleBehavior {
        &self.behavior
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Command emitted in place of (or before) the match
    pub fn pre_command(&self) -> &Arc<dyn AudioCommand> {
        &self.pre
    }

    /// Command emitted after the matched text, for prosody rules
    pub fn post_command(&self) -> Option<&Arc<dyn AudioCommand>> {
        self.post.as_ref()
    }

    /// Name shown in rule lists
    pub fn display_name(&self) -> &str {
        if self.comment.is_empty() {
            &self.pattern
        } else {
            &self.comment
        }
    }

    /// One-line summary of what the rule plays
    pub fn description(&self) -> String {
        match &self.behavior {
            RuleBehavior::BuiltInClip(rel) => rel.clone(),
            RuleBehavior::CustomClip(path) => format!("Wav: {}", path.display()),
            RuleBehavior::Tone { hz, duration_ms } => format!("Beep: {}@{}", hz, duration_ms),
            RuleBehavior::Prosody { param, change } => match change {
                ProsodyChange::Offset(o) => format!("Prosody: {}:{}:", param, o),
                ProsodyChange::Multiplier(m) => format!("Prosody: {}::{}", param, m),
            },
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("pattern", &self.pattern)
            .field("behavior", &self.behavior)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn behavior_of(record: &RuleRecord) -> Result<RuleBehavior, RuleError> {
    let missing = |field: &'static str| RuleError::MissingField {
        rule_type: record.rule_type,
        field,
    };

    match record.rule_type {
        RuleType::BuiltInWave => {
            let rel = record
                .built_in_wav_file
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| missing("builtInWavFile"))?;
            Ok(RuleBehavior::BuiltInClip(rel.to_string()))
        }
        RuleType::Wave => {
            let path = record
                .wav_file
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| missing("wavFile"))?;
            Ok(RuleBehavior::CustomClip(PathBuf::from(path)))
        }
        RuleType::Beep => {
            let hz = record.tone.ok_or_else(|| missing("tone"))?;
            if !(0..=MAX_TONE_HZ).contains(&hz) {
                return Err(RuleError::ToneOutOfRange(hz));
            }
            let duration = record.duration.ok_or_else(|| missing("duration"))?;
            if !(0..=MAX_BEEP_MS).contains(&duration) {
                return Err(RuleError::DurationOutOfRange(duration));
            }
            Ok(RuleBehavior::Tone {
                hz: hz as u32,
                duration_ms: duration as u64,
            })
        }
        RuleType::Prosody => {
            let name = record.prosody_name.as_deref().ok_or_else(|| missing("prosodyName"))?;
            let param = ProsodyParam::from_name(name)
                .ok_or_else(|| RuleError::UnknownProsody(name.to_string()))?;
            let change = match (record.prosody_offset, record.prosody_multiplier) {
                (Some(_), Some(_)) => return Err(RuleError::ProsodyBothSet),
                (None, None) => return Err(RuleError::ProsodyNeitherSet),
                (Some(offset), None) => {
                    if !PROSODY_OFFSET_RANGE.contains(&offset) {
                        return Err(RuleError::OffsetOutOfRange(offset));
                    }
                    ProsodyChange::Offset(offset as i32)
                }
                (None, Some(multiplier)) => {
                    if !PROSODY_MULTIPLIER_RANGE.contains(&multiplier) {
                        return Err(RuleError::MultiplierOutOfRange(multiplier));
                    }
                    ProsodyChange::Multiplier(multiplier)
                }
            };
            Ok(RuleBehavior::Prosody { param, change })
        }
    }
}

type CommandPair = (Arc<dyn AudioCommand>, Option<Arc<dyn AudioCommand>>);

fn build_commands(
    behavior: &RuleBehavior,
    record: &RuleRecord,
    volume: u8,
    ctx: &RuleContext,
) -> Result<CommandPair, RuleError> {
    match behavior {
        RuleBehavior::BuiltInClip(rel) => {
            let clip = load_clip(&ctx.built_in_path(rel), record, volume, ctx)?;
            Ok((clip, None))
        }
        RuleBehavior::CustomClip(path) => {
            let clip = load_clip(path, record, volume, ctx)?;
            Ok((clip, None))
        }
        RuleBehavior::Tone { hz, duration_ms } => {
            let tone = ToneCommand::new(*hz, *duration_ms, volume, Arc::clone(&ctx.tone_device));
            Ok((Arc::new(tone), None))
        }
        RuleBehavior::Prosody { param, change } => {
            let (pre, post) = ProsodyMarker::pair(*param, *change, Arc::clone(&ctx.prosody));
            Ok((Arc::new(pre), Some(Arc::new(post))))
        }
    }
}

fn load_clip(
    path: &Path,
    record: &RuleRecord,
    volume: u8,
    ctx: &RuleContext,
) -> Result<Arc<dyn AudioCommand>, RuleError> {
    if !path.is_file() {
        return Err(RuleError::MissingFile(path.to_path_buf()));
    }
    let clip = WaveClipCommand::load(
        path,
        record.start_adjustment,
        record.end_adjustment,
        volume,
        ctx.devices.as_ref(),
    )
    .map_err(|source| RuleError::Wav {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Arc::new(clip))
}

/// Built-in clips under `sounds_dir`, as `category/file.wav`
///
/// Only one level of category directories is searched, matching how the
/// rule editor offers clips.
pub fn builtin_sounds(sounds_dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let categories = match std::fs::read_dir(sounds_dir) {
        Ok(entries) => entries,
        Err(_) => return found,
    };

    for category in categories.flatten() {
        let category_path = category.path();
        if !category_path.is_dir() {
            continue;
        }
        let category_name = category.file_name().to_string_lossy().into_owned();
        let files = match std::fs::read_dir(&category_path) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for file in files.flatten() {
            let name = file.file_name().to_string_lossy().into_owned();
            if file.path().is_file() && name.to_ascii_lowercase().ends_with(".wav") {
                found.push(format!("{}/{}", category_name, name));
            }
        }
    }

    found.sort();
    found
}
