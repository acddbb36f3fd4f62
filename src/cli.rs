use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Settings;
use crate::logging::LogLevel;
use crate::rules::{MoveDirection, RuleRecord};
use crate::speech::SymbolLevel;

/// Earcons - audio cues for screen reader speech
#[derive(Parser, Debug, Default)]
#[command(name = "earcons")]
#[command(version)]
#[command(about = "Play audio cues in place of matching speech", long_about = None)]
pub struct Cli {
    /// Configuration directory path
    #[arg(short, long, value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Rules file (defaults to earconRules.json in the config directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub rules: Option<PathBuf>,

    /// Built-in sounds directory
    #[arg(short, long, value_name = "DIR", global = true)]
    pub sounds: Option<PathBuf>,

    /// Log level (nothing, error, warning, info, debug, all)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Output device name
    #[arg(short, long, value_name = "NAME", global = true)]
    pub output_device: Option<String>,

    /// Number of playback worker threads
    #[arg(long, value_name = "N", global = true)]
    pub workers: Option<usize>,

    /// Play to a silent device instead of the sound card
    #[arg(long, global = true)]
    pub no_audio: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List rules in order
    List,
    /// Load the rules file and report records that fail to load
    Check,
    /// Show how an utterance is rewritten
    Preview {
        #[arg(short, long)]
        text: String,
        /// Symbol level (none, some, most, all, char)
        #[arg(long, default_value = "some")]
        level: String,
    },
    /// Rewrite an utterance and play it
    Play {
        #[arg(short, long)]
        text: String,
        #[arg(long, default_value = "some")]
        level: String,
    },
    /// Play a rule between "Hello" and "world"
    Test {
        index: usize,
        /// Play the cue three times
        #[arg(long)]
        repeat: bool,
    },
    /// Turn earcons on or off
    Toggle,
    /// Enable a rule
    Enable { index: usize },
    /// Disable a rule
    Disable { index: usize },
    /// Move a rule up or down the list
    Move { index: usize, direction: Direction },
    /// Remove a rule
    Remove { index: usize },
    /// Change the pattern, comment or volume of a rule
    Edit {
        index: usize,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        volume: Option<i64>,
    },
    /// Add a beep rule
    AddBeep {
        #[command(flatten)]
        common: RuleArgs,
        /// Frequency in Hz
        #[arg(long)]
        hz: i64,
        /// Length in milliseconds
        #[arg(long)]
        duration: i64,
    },
    /// Add a rule playing a WAV file
    AddWave {
        #[command(flatten)]
        common: RuleArgs,
        /// WAV file path
        #[arg(long, conflicts_with = "built_in", required_unless_present = "built_in")]
        file: Option<PathBuf>,
        /// Built-in clip, as category/file.wav
        #[arg(long)]
        built_in: Option<String>,
        /// Milliseconds to cut from the start; negative adds silence
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        start: i64,
        /// Milliseconds to cut from the end
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        end: i64,
    },
    /// Add a rule changing prosody around the match
    AddProsody {
        #[command(flatten)]
        common: RuleArgs,
        /// Pitch, Volume or Rate
        #[arg(long)]
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i64>,
        #[arg(long)]
        multiplier: Option<f64>,
    },
    /// List built-in clips
    Sounds,
    /// List output devices
    Devices,
}

/// Fields every new rule takes
#[derive(Args, Debug, Clone, PartialEq)]
pub struct RuleArgs {
    /// Regular expression to match
    #[arg(short, long)]
    pub pattern: String,
    #[arg(long, default_value = "")]
    pub comment: String,
    /// Volume, 0-100
    #[arg(long, default_value_t = 100)]
    pub volume: i64,
}

impl RuleArgs {
    /// Copy the shared fields onto `record`
    pub fn apply(&self, mut record: RuleRecord) -> RuleRecord {
        record.comment = self.comment.clone();
        record.volume = self.volume;
        record
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl From<Direction> for MoveDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => MoveDirection::Up,
            Direction::Down => MoveDirection::Down,
        }
    }
}

impl Cli {
    /// Merge CLI arguments into the loaded settings
    pub fn merge_into_settings(&self, mut settings: Settings) -> Result<Settings> {
        if let Some(ref rules) = self.rules {
            settings.rules_file = Some(rules.clone());
        }
        if let Some(ref sounds) = self.sounds {
            settings.sounds_dir = Some(sounds.clone());
        }
        if let Some(ref level) = self.log_level {
            settings.log_level = level.parse::<LogLevel>().context("Invalid log level")?;
        }
        if let Some(ref log_file) = self.log_file {
            settings.log_file = Some(log_file.clone());
        }
        if let Some(ref device) = self.output_device {
            settings.output_device = Some(device.clone());
        }
        if let Some(workers) = self.workers {
            settings.worker_threads = workers;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn parse_level(s: &str) -> Result<SymbolLevel> {
        s.parse::<SymbolLevel>().map_err(|e| anyhow::anyhow!("{}. Valid options: none, some, most, all, char", e))
    }
}
