//! Speech sequence post-processing
//!
//! After every rule has run, adjacent synchronous commands are folded into a
//! single chain followed by a break that holds the synthesizer for the
//! chain's duration. Speech resumes once the cues have played.

use std::sync::Arc;

use tracing::trace;

use super::{RenderContext, SpeechItem};
use crate::chain::Chain;
use crate::sound::AudioCommand;

/// Fold synchronous command runs into chains
///
/// 1. Text that renders blank is dropped.
/// 2. Each maximal run of synchronous commands becomes `Chain` followed by
///    `Break(chain duration)`.
/// 3. Everything else passes through in order.
/// 4. If no audible text is left anywhere, every break that directly
///    follows a chain is removed. Some synthesizers otherwise report the
///    chain only after sitting through the break.
pub fn process(sequence: Vec<SpeechItem>, render: &RenderContext<'_>) -> Vec<SpeechItem> {
    let mut out = Vec::with_capacity(sequence.len() + 1);
    let mut run: Vec<Arc<dyn AudioCommand>> = Vec::new();

    let audible = sequence.into_iter().filter(|item| match item {
        SpeechItem::Text(text) => !render.renders_blank(text),
        _ => true,
    });

    for item in audible {
        match item {
            SpeechItem::Command(cmd) if cmd.is_synchronous() => run.push(cmd),
            other => {
                flush_run(&mut run, &mut out);
                out.push(other);
            }
        }
    }
    flush_run(&mut run, &mut out);

    drop_breaks_without_speech(out)
}

fn flush_run(run: &mut Vec<Arc<dyn AudioCommand>>, out: &mut Vec<SpeechItem>) {
    if run.is_empty() {
        return;
    }
    let chain = Chain::new(std::mem::take(run));
    let duration = chain.duration_ms();
    trace!(commands = chain.commands().len(), duration_ms = duration, "grouped chain");
    out.push(SpeechItem::Chain(Arc::new(chain)));
    out.push(SpeechItem::Break(duration));
}

fn drop_breaks_without_speech(sequence: Vec<SpeechItem>) -> Vec<SpeechItem> {
    // Blank text was already removed, so any text left is audible.
    if sequence.iter().any(|item| item.as_text().is_some()) {
        return sequence;
    }

    let mut out = Vec::with_capacity(sequence.len());
    let mut after_chain = false;
    for item in sequence {
        let is_chain = matches!(item, SpeechItem::Chain(_));
        if !(after_chain && matches!(item, SpeechItem::Break(_))) {
            out.push(item);
        }
        after_chain = is_chain;
    }
    out
}
