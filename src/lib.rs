// Earcons library
// Audio cues scheduled on the speech timeline

pub mod chain;
pub mod cli;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod rules;
pub mod sound;
pub mod speech;
pub mod threading;

pub use chain::{Chain, ChainError, ChainHandle, ChainScheduler, ChainState};
pub use cli::Cli;
pub use config::Settings;
pub use hooks::{Collaborators, CorePaths, EarconCore, PropertiesOverride, Role};
pub use logging::LogLevel;
pub use rules::{Rule, RuleError, RuleRecord, RuleStore};
pub use speech::{SpeechItem, SymbolLevel};
