//! Host integration
//!
//! `EarconCore` owns the rule list, the worker pool and the chain scheduler,
//! and exposes the points where the host's speech pipeline calls in.
//!
//! # Design Notes
//!
//! - The host keeps its own functions and passes them to the hooks that wrap
//!   them (`cancel_speech`, `audio_initialized`). Nothing is patched.
//! - Rewriting is suppressed while the host's rule editor is open so the
//!   editor's own speech is not decorated with cues.
//! - `perform` stands in for the synthesizer when there is no host: it hands
//!   text to a callback, starts chains and sits out breaks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chain::{Chain, ChainError, ChainHandle, ChainScheduler};
use crate::config::{Settings, SETTINGS_FILE_NAME};
use crate::rules::{
    apply_rules, LoadReport, RuleContext, RuleStore, StoreError, BUTTON_SOUND,
};
use crate::sound::{AudioCommand, DeviceFactory, WaveClipCommand};
use crate::speech::{
    postprocess, FixedLanguage, LanguageContext, ProsodyLedger, ProsodyStack, PunctuationRenderer,
    RenderContext, SpeechItem, SymbolLevel, SymbolRenderer,
};
use crate::threading::{Interrupt, PoolError, WorkerPool};

/// Words spoken around a cue by `test_utterance`
pub const TEST_PRE_TEXT: &str = "Hello";
pub const TEST_POST_TEXT: &str = "world";

// ============================================================================
// Collaborators
// ============================================================================

/// Host services the core depends on
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn DeviceFactory>,
    pub prosody: Arc<dyn ProsodyStack>,
    pub renderer: Arc<dyn SymbolRenderer>,
    pub language: Arc<dyn LanguageContext>,
}

impl Collaborators {
    /// Built-in stand-ins for everything but the output devices
    pub fn standalone(devices: Arc<dyn DeviceFactory>) -> Self {
        Self {
            devices,
            prosody: Arc::new(ProsodyLedger::new()),
            renderer: Arc::new(PunctuationRenderer),
            language: Arc::new(FixedLanguage::default()),
        }
    }
}

/// Files the core reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorePaths {
    pub settings: PathBuf,
    pub rules: PathBuf,
    pub sounds: PathBuf,
}

impl CorePaths {
    /// Resolve every path inside `config_dir` unless `settings` overrides it
    pub fn resolve(settings: &Settings, config_dir: &Path) -> Self {
        Self {
            settings: config_dir.join(SETTINGS_FILE_NAME),
            rules: settings.rules_path(config_dir),
            sounds: settings.sounds_path(config_dir),
        }
    }
}

// ============================================================================
// Hook Types
// ============================================================================

/// Control roles the host reports properties for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Button,
    Link,
    CheckBox,
    Edit,
    Other,
}

/// Answer to `properties_speech`
#[derive(Debug, Clone)]
pub enum PropertiesOverride {
    /// Speak this instead of the host's properties speech
    Override(Vec<SpeechItem>),
    /// Let the host produce its own speech
    Defer,
}

impl PropertiesOverride {
    pub fn is_defer(&self) -> bool {
        matches!(self, PropertiesOverride::Defer)
    }
}

// ============================================================================
// Core
// ============================================================================

/// The earcon engine as seen by the host
pub struct EarconCore {
    settings: Mutex<Settings>,
    paths: CorePaths,
    ctx: RuleContext,
    store: RuleStore,
    button: RwLock<Option<Arc<dyn AudioCommand>>>,
    renderer: Arc<dyn SymbolRenderer>,
    language: Arc<dyn LanguageContext>,
    pool: Arc<WorkerPool>,
    scheduler: ChainScheduler,
    editor_open: AtomicBool,
    speech: Interrupt,
    shut_down: AtomicBool,
}

impl EarconCore {
    /// Create the core and load its rules
    ///
    /// # Errors
    /// Fails if the worker pool cannot be started
    pub fn new(settings: Settings, paths: CorePaths, collaborators: Collaborators) -> Result<Self, PoolError> {
        let pool = Arc::new(WorkerPool::new(settings.worker_threads)?);
        let scheduler = ChainScheduler::new(Arc::clone(&pool));
        let ctx = RuleContext::new(&paths.sounds, collaborators.devices, collaborators.prosody);
        let store = RuleStore::new(&paths.rules);

        let core = Self {
            settings: Mutex::new(settings),
            paths,
            ctx,
            store,
            button: RwLock::new(None),
            renderer: collaborators.renderer,
            language: collaborators.language,
            pool,
            scheduler,
            editor_open: AtomicBool::new(false),
            speech: Interrupt::new(),
            shut_down: AtomicBool::new(false),
        };
        core.reload();
        Ok(core)
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn rule_context(&self) -> &RuleContext {
        &self.ctx
    }

    pub fn paths(&self) -> &CorePaths {
        &self.paths
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    pub fn scheduler(&self) -> &ChainScheduler {
        &self.scheduler
    }

    /// The chain cancellation currently applies to
    pub fn current_chain(&self) -> Option<ChainHandle> {
        self.scheduler.current().current()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.lock().enabled
    }

    pub fn set_editor_open(&self, open: bool) {
        self.editor_open.store(open, Ordering::SeqCst);
    }

    pub fn is_editor_open(&self) -> bool {
        self.editor_open.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.is_enabled() && !self.is_editor_open()
    }

    // ------------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------------

    /// Replace the host's properties speech for some roles
    ///
    /// Only a role reported on its own (no states) is replaced, and only
    /// buttons have a cue.
    pub fn properties_speech(&self, role: Option<Role>, states: Option<&[String]>) -> PropertiesOverride {
        if !self.is_active() || states.is_some() {
            return PropertiesOverride::Defer;
        }
        match role {
            Some(Role::Button) => match self.button.read().as_ref() {
                Some(button) => PropertiesOverride::Override(vec![SpeechItem::Command(Arc::clone(button))]),
                None => PropertiesOverride::Defer,
            },
            _ => PropertiesOverride::Defer,
        }
    }

    /// Stop the current chain, then run the host's own cancel
    pub fn cancel_speech<R>(&self, host_cancel: impl FnOnce() -> R) -> R {
        if self.scheduler.current().cancel() {
            debug!("current chain cancelled");
        }
        self.speech.trigger();
        host_cancel()
    }

    /// Run the host's audio initialization, then reload the rules
    pub fn audio_initialized<R>(&self, host_init: impl FnOnce() -> R) -> R {
        let result = host_init();
        let report = self.reload();
        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "some earcon rules failed to load");
        }
        result
    }

    /// Flip the enabled setting and persist it
    ///
    /// # Returns
    /// The message to announce
    pub fn toggle(&self) -> String {
        let mut settings = self.settings.lock();
        settings.enabled = !settings.enabled;
        if let Err(e) = settings.save(&self.paths.settings) {
            warn!("cannot persist enabled setting: {:#}", e);
        }
        let message = if settings.enabled {
            "Earcon Frenzy on"
        } else {
            "Earcon Frenzy off"
        };
        info!("{}", message);
        message.to_string()
    }

    // ------------------------------------------------------------------------
    // Utterances
    // ------------------------------------------------------------------------

    fn render_context(&self, level: SymbolLevel) -> RenderContext<'_> {
        RenderContext::new(self.renderer.as_ref(), level, self.language.current_language())
    }

    /// Apply every rule to an utterance and group its cues into chains
    ///
    /// The sequence is returned untouched while disabled or while the
    /// editor is open.
    pub fn process_utterance(&self, sequence: Vec<SpeechItem>, level: SymbolLevel) -> Vec<SpeechItem> {
        if !self.is_active() {
            return sequence;
        }
        let render = self.render_context(level);
        let rules = self.store.rules();
        let rewritten = apply_rules(sequence, rules.iter(), &render);
        postprocess::process(rewritten, &render)
    }

    /// Utterance that demonstrates the rule at `index`
    ///
    /// "Hello", the cue, "world". Prosody rules wrap "world" instead, and
    /// `repeat` plays the cue three times.
    pub fn test_utterance(
        &self,
        index: usize,
        repeat: bool,
        level: SymbolLevel,
    ) -> Result<Vec<SpeechItem>, StoreError> {
        let rule = self.store.get(index).ok_or(StoreError::IndexOutOfRange {
            index,
            len: self.store.len(),
        })?;
        let pre = SpeechItem::Command(Arc::clone(rule.pre_command()));

        let mut sequence = vec![SpeechItem::text(TEST_PRE_TEXT)];
        match rule.post_command() {
            Some(post) => {
                sequence.push(pre);
                sequence.push(SpeechItem::text(TEST_POST_TEXT));
                sequence.push(SpeechItem::Command(Arc::clone(post)));
            }
            None => {
                let count = if repeat { 3 } else { 1 };
                sequence.extend(std::iter::repeat(pre).take(count));
                sequence.push(SpeechItem::text(TEST_POST_TEXT));
            }
        }

        let render = self.render_context(level);
        Ok(postprocess::process(sequence, &render))
    }

    /// Start playing a chain and make it current
    pub fn play_chain(&self, chain: Arc<Chain>) -> Result<ChainHandle, ChainError> {
        self.scheduler.start(chain)
    }

    /// Speak a processed sequence without a host synthesizer
    ///
    /// Text goes to `on_text`, commands run inline, chains start and breaks
    /// are slept through. `cancel_speech` abandons the rest of the sequence.
    ///
    /// # Returns
    /// Handles of the chains that were started
    pub fn perform<F>(&self, sequence: Vec<SpeechItem>, mut on_text: F) -> Result<Vec<ChainHandle>, ChainError>
    where
        F: FnMut(&str),
    {
        let since = self.speech.generation();
        let mut started = Vec::new();

        for item in sequence {
            if self.speech.generation() != since {
                debug!("utterance cancelled");
                break;
            }
            match item {
                SpeechItem::Text(text) => on_text(&text),
                SpeechItem::Command(command) => {
                    if let Err(e) = command.run() {
                        warn!(?command, "command failed: {}", e);
                    }
                }
                SpeechItem::Chain(chain) => started.push(self.play_chain(chain)?),
                SpeechItem::Break(ms) => {
                    if self.speech.sleep_for(Duration::from_millis(ms), since) {
                        debug!("utterance cancelled during break");
                        break;
                    }
                }
            }
        }
        Ok(started)
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    /// Reload rules from disk, rebuilding every command
    pub fn reload(&self) -> LoadReport {
        let report = self.store.reload(&self.ctx);
        *self.button.write() = self.load_button();
        report
    }

    /// Save the rule list, then reload it
    pub fn save_rules(&self) -> Result<LoadReport, StoreError> {
        self.store.save()?;
        Ok(self.reload())
    }

    fn load_button(&self) -> Option<Arc<dyn AudioCommand>> {
        let path = self.ctx.built_in_path(BUTTON_SOUND);
        if !path.is_file() {
            debug!(path = %path.display(), "no button sound");
            return None;
        }
        match WaveClipCommand::load(&path, 0, 0, 100, self.ctx.devices.as_ref()) {
            Ok(clip) => Some(Arc::new(clip)),
            Err(e) => {
                warn!(path = %path.display(), "cannot load button sound: {}", e);
                None
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Cancel playback and stop every thread the core owns
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.speech.trigger();
        self.scheduler.stop();
        self.pool.stop();
        self.ctx.tone_device.stop();
        info!("earcon core shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for EarconCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
