//! Speech sequences and the host collaborators around them
//!
//! A speech sequence is what the host hands to its synthesizer: text
//! interleaved with commands. Rules rewrite text items into cue commands, and
//! the post-processor folds those commands into timed chains.
//!
//! # Design Notes
//!
//! Whether text is "blank" depends on the host's symbol level: at a low level
//! a lone `[` is not spoken and counts as blank. `SymbolRenderer` is the seam
//! through which that decision is delegated.

pub mod postprocess;
pub mod prosody;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::Chain;
use crate::sound::AudioCommand;

pub use postprocess::process;
pub use prosody::{ProsodyAction, ProsodyChange, ProsodyLedger, ProsodyMarker, ProsodyParam, ProsodyStack};

// ============================================================================
// Speech Items
// ============================================================================

/// One element of a speech sequence
#[derive(Debug, Clone)]
pub enum SpeechItem {
    /// Text to be spoken
    Text(String),
    /// A cue or marker command
    Command(Arc<dyn AudioCommand>),
    /// A group of synchronous commands played on one timeline
    Chain(Arc<Chain>),
    /// Pause the synthesizer for this many milliseconds
    Break(u64),
}

impl SpeechItem {
    pub fn text(s: impl Into<String>) -> Self {
        SpeechItem::Text(s.into())
    }

    /// The text, if this is a text item
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SpeechItem::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this item is a command that belongs in a chain
    pub fn is_synchronous(&self) -> bool {
        matches!(self, SpeechItem::Command(cmd) if cmd.is_synchronous())
    }
}

impl fmt::Display for SpeechItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeechItem::Text(s) => write!(f, "{:?}", s),
            SpeechItem::Command(cmd) => write!(f, "{:?}", cmd),
            SpeechItem::Chain(chain) => write!(f, "Chain({} ms)", chain.duration_ms()),
            SpeechItem::Break(ms) => write!(f, "Break({} ms)", ms),
        }
    }
}

// ============================================================================
// Symbol Levels
// ============================================================================

/// How much punctuation the host speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SymbolLevel {
    None,
    #[default]
    Some,
    Most,
    All,
    Char,
}

impl SymbolLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolLevel::None => "none",
            SymbolLevel::Some => "some",
            SymbolLevel::Most => "most",
            SymbolLevel::All => "all",
            SymbolLevel::Char => "char",
        }
    }
}

impl fmt::Display for SymbolLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SymbolLevel::None),
            "some" => Ok(SymbolLevel::Some),
            "most" => Ok(SymbolLevel::Most),
            "all" => Ok(SymbolLevel::All),
            "char" | "character" => Ok(SymbolLevel::Char),
            other => Err(format!("unknown symbol level: {}", other)),
        }
    }
}

// ============================================================================
// Host Collaborators
// ============================================================================

/// Renders text the way the synthesizer will receive it
pub trait SymbolRenderer: Send + Sync {
    fn render_at_level(&self, language: &str, text: &str, level: SymbolLevel) -> String;
}

/// Supplies the language of the current utterance
pub trait LanguageContext: Send + Sync {
    fn current_language(&self) -> String;
}

/// Fixed-language context
#[derive(Debug, Clone)]
pub struct FixedLanguage(pub String);

impl Default for FixedLanguage {
    fn default() -> Self {
        FixedLanguage("en".to_string())
    }
}

impl LanguageContext for FixedLanguage {
    fn current_language(&self) -> String {
        self.0.clone()
    }
}

/// Everything needed to decide whether text will be spoken
pub struct RenderContext<'a> {
    renderer: &'a dyn SymbolRenderer,
    level: SymbolLevel,
    language: String,
}

impl<'a> RenderContext<'a> {
    pub fn new(renderer: &'a dyn SymbolRenderer, level: SymbolLevel, language: impl Into<String>) -> Self {
        Self {
            renderer,
            level,
            language: language.into(),
        }
    }

    pub fn level(&self) -> SymbolLevel {
        self.level
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn render(&self, text: &str) -> String {
        self.renderer.render_at_level(&self.language, text, self.level)
    }

    /// Whether `text` produces no speech at this level
    pub fn renders_blank(&self, text: &str) -> bool {
        is_blank(&self.render(text))
    }
}

/// Whether `text` is empty or whitespace
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

// ============================================================================
// Punctuation Renderer
// ============================================================================

/// Symbol name and the lowest level at which it is spoken
struct Symbol {
    symbol: char,
    name: &'static str,
    level: SymbolLevel,
}

const fn sym(symbol: char, name: &'static str, level: SymbolLevel) -> Symbol {
    Symbol { symbol, name, level }
}

static SYMBOLS: &[Symbol] = &[
    sym('.', "dot", SymbolLevel::All),
    sym(',', "comma", SymbolLevel::All),
    sym('!', "bang", SymbolLevel::All),
    sym('?', "question", SymbolLevel::All),
    sym('\'', "tick", SymbolLevel::All),
    sym('`', "graav", SymbolLevel::All),
    sym(':', "colon", SymbolLevel::Most),
    sym(';', "semi", SymbolLevel::Most),
    sym('"', "quote", SymbolLevel::Most),
    sym('(', "left paren", SymbolLevel::Most),
    sym(')', "right paren", SymbolLevel::Most),
    sym('[', "left bracket", SymbolLevel::Most),
    sym(']', "right bracket", SymbolLevel::Most),
    sym('{', "left brace", SymbolLevel::Most),
    sym('}', "right brace", SymbolLevel::Most),
    sym('-', "dash", SymbolLevel::Most),
    sym('_', "line", SymbolLevel::Most),
    sym('\\', "backslash", SymbolLevel::Most),
    sym('|', "bar", SymbolLevel::Most),
    sym('~', "tilda", SymbolLevel::Most),
    sym('<', "less", SymbolLevel::Most),
    sym('>', "greater", SymbolLevel::Most),
    sym('^', "caret", SymbolLevel::Most),
    sym('*', "star", SymbolLevel::Some),
    sym('/', "slash", SymbolLevel::Some),
    sym('#', "number", SymbolLevel::Some),
    sym('@', "at", SymbolLevel::Some),
    sym('&', "and", SymbolLevel::Some),
    sym('%', "percent", SymbolLevel::Some),
    sym('+', "plus", SymbolLevel::Some),
    sym('=', "equals", SymbolLevel::Some),
    sym('$', "dollar", SymbolLevel::None),
];

/// Built-in English punctuation renderer
///
/// Symbols spoken at the current level are replaced by their names; the rest
/// are replaced by a space. The language argument is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PunctuationRenderer;

impl PunctuationRenderer {
    fn lookup(c: char) -> Option<&'static Symbol> {
        SYMBOLS.iter().find(|s| s.symbol == c)
    }
}

impl SymbolRenderer for PunctuationRenderer {
    fn render_at_level(&self, _language: &str, text: &str, level: SymbolLevel) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match Self::lookup(c) {
                Some(symbol) if symbol.level <= level => {
                    out.push(' ');
                    out.push_str(symbol.name);
                    out.push(' ');
                }
                Some(_) => out.push(' '),
                None => out.push(c),
            }
        }
        out
    }
}
