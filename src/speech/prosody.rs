//! Prosody markers
//!
//! Prosody rules do not play sound. They bracket the matched text with a
//! pair of markers that push and pop a pitch, volume or rate change on the
//! host's prosody stack.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sound::{AudioCommand, PlaybackError};

/// Prosody parameter a rule can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProsodyParam {
    Pitch,
    Volume,
    Rate,
}

/// Accepted names, as stored in rule files
static PARAM_NAMES: &[(&str, ProsodyParam)] = &[
    ("Pitch", ProsodyParam::Pitch),
    ("Volume", ProsodyParam::Volume),
    ("Rate", ProsodyParam::Rate),
];

impl ProsodyParam {
    pub const ALL: [ProsodyParam; 3] = [ProsodyParam::Pitch, ProsodyParam::Volume, ProsodyParam::Rate];

    /// Look up a parameter by name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        PARAM_NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, p)| *p)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProsodyParam::Pitch => "Pitch",
            ProsodyParam::Volume => "Volume",
            ProsodyParam::Rate => "Rate",
        }
    }
}

impl fmt::Display for ProsodyParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Change applied to a prosody parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProsodyChange {
    /// Add this many percentage points
    Offset(i32),
    /// Scale by this factor
    Multiplier(f64),
}

impl fmt::Display for ProsodyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProsodyChange::Offset(o) => write!(f, "offset={:+}", o),
            ProsodyChange::Multiplier(m) => write!(f, "multiplier={}", m),
        }
    }
}

/// The host's prosody stack
pub trait ProsodyStack: Send + Sync {
    fn push(&self, param: ProsodyParam, change: ProsodyChange);
    fn pop(&self, param: ProsodyParam);
}

/// What a marker does when run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProsodyAction {
    Push(ProsodyChange),
    Pop,
}

/// Zero-length command that pushes or pops a prosody change
pub struct ProsodyMarker {
    param: ProsodyParam,
    action: ProsodyAction,
    stack: Arc<dyn ProsodyStack>,
}

impl ProsodyMarker {
    /// Build the push/pop pair bracketing a match
    pub fn pair(
        param: ProsodyParam,
        change: ProsodyChange,
        stack: Arc<dyn ProsodyStack>,
    ) -> (ProsodyMarker, ProsodyMarker) {
        let pre = ProsodyMarker {
            param,
            action: ProsodyAction::Push(change),
            stack: Arc::clone(&stack),
        };
        let post = ProsodyMarker {
            param,
            action: ProsodyAction::Pop,
            stack,
        };
        (pre, post)
    }

    pub fn param(&self) -> ProsodyParam {
        self.param
    }

    pub fn action(&self) -> ProsodyAction {
        self.action
    }
}

impl fmt::Debug for ProsodyMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            ProsodyAction::Push(change) => write!(f, "{}Command({})", self.param, change),
            ProsodyAction::Pop => write!(f, "{}Command()", self.param),
        }
    }
}

impl AudioCommand for ProsodyMarker {
    fn duration_ms(&self) -> u64 {
        0
    }

    fn run(&self) -> Result<(), PlaybackError> {
        match self.action {
            ProsodyAction::Push(change) => self.stack.push(self.param, change),
            ProsodyAction::Pop => self.stack.pop(self.param),
        }
        Ok(())
    }

    fn terminate(&self) {}

    fn is_synchronous(&self) -> bool {
        false
    }
}

// ============================================================================
// In-memory Stack
// ============================================================================

/// Prosody stack kept in memory
///
/// Stands in for a synthesizer when previewing rules, and records every
/// push and pop in order.
#[derive(Debug, Default)]
pub struct ProsodyLedger {
    stacks: Mutex<HashMap<ProsodyParam, Vec<ProsodyChange>>>,
    events: Mutex<Vec<String>>,
}

impl ProsodyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Innermost active change for `param`
    pub fn current(&self, param: ProsodyParam) -> Option<ProsodyChange> {
        self.stacks.lock().get(&param).and_then(|s| s.last().copied())
    }

    /// Number of active changes for `param`
    pub fn depth(&self, param: ProsodyParam) -> usize {
        self.stacks.lock().get(&param).map_or(0, Vec::len)
    }

    /// Every push and pop so far, oldest first
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ProsodyStack for ProsodyLedger {
    fn push(&self, param: ProsodyParam, change: ProsodyChange) {
        self.stacks.lock().entry(param).or_default().push(change);
        self.events.lock().push(format!("push {} {}", param, change));
    }

    fn pop(&self, param: ProsodyParam) {
        let popped = self.stacks.lock().get_mut(&param).and_then(Vec::pop);
        if popped.is_some() {
            self.events.lock().push(format!("pop {}", param));
        }
    }
}
