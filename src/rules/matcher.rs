//! Rule matching
//!
//! Turns one text item into the text fragments and commands a rule produces
//! for it. Fragments come out lazily, in the order they will be spoken.

use std::collections::VecDeque;
use std::sync::Arc;

use regex::Matches;

use super::Rule;
use crate::speech::{is_blank, RenderContext, SpeechItem};

/// Lazy sequence of fragments produced by one rule over one string
///
/// Emits, for every match that will be heard: the text before it, the
/// rule's pre command, and for prosody rules the matched text and the post
/// command. Matches that are not blank but render blank at the current
/// symbol level are left in the text. The text after the last match is
/// always emitted, even when empty.
pub struct RuleMatcher<'r, 't, 'c> {
    rule: &'r Rule,
    text: &'t str,
    render: &'c RenderContext<'c>,
    matches: Option<Matches<'r, 't>>,
    pending: VecDeque<SpeechItem>,
    index: usize,
    finished: bool,
}

impl<'r, 't, 'c> RuleMatcher<'r, 't, 'c> {
    pub fn new(rule: &'r Rule, text: &'t str, render: &'c RenderContext<'c>) -> Self {
        // A disabled rule passes the text through untouched.
        let matches = rule.is_enabled().then(|| rule.regex().find_iter(text));
        Self {
            rule,
            text,
            render,
            matches,
            pending: VecDeque::new(),
            index: 0,
            finished: false,
        }
    }
}

impl Iterator for RuleMatcher<'_, '_, '_> {
    type Item = SpeechItem;

    fn next(&mut self) -> Option<SpeechItem> {
        if let Some(item) = self.pending.pop_front() {
            return Some(item);
        }
        if self.finished {
            return None;
        }

        if let Some(matches) = self.matches.as_mut() {
            for m in matches.by_ref() {
                let matched = m.as_str();
                if !is_blank(matched) && self.render.renders_blank(matched) {
                    continue;
                }

                self.pending
                    .push_back(SpeechItem::text(&self.text[self.index..m.start()]));
                self.pending
                    .push_back(SpeechItem::Command(Arc::clone(self.rule.pre_command())));
                if let Some(post) = self.rule.post_command() {
                    self.pending.push_back(SpeechItem::text(matched));
                    self.pending.push_back(SpeechItem::Command(Arc::clone(post)));
                }
                self.index = m.end();
                return self.pending.pop_front();
            }
        }

        self.finished = true;
        Some(SpeechItem::text(&self.text[self.index..]))
    }
}

/// Run `rule` over every text item of `sequence`
///
/// Non-text items pass through. Empty text fragments produced by matching
/// are dropped; a disabled rule leaves the sequence as it was.
pub fn apply_rule(sequence: Vec<SpeechItem>, rule: &Rule, render: &RenderContext<'_>) -> Vec<SpeechItem> {
    if !rule.is_enabled() {
        return sequence;
    }

    let mut out = Vec::with_capacity(sequence.len());
    for item in sequence {
        match item {
            SpeechItem::Text(text) => out.extend(
                RuleMatcher::new(rule, &text, render)
                    .filter(|fragment| fragment.as_text().map_or(true, |t| !t.is_empty())),
            ),
            other => out.push(other),
        }
    }
    out
}

/// Run every rule over `sequence`, in list order
pub fn apply_rules<'a, I>(sequence: Vec<SpeechItem>, rules: I, render: &RenderContext<'_>) -> Vec<SpeechItem>
where
    I: IntoIterator<Item = &'a Arc<Rule>>,
{
    rules
        .into_iter()
        .fold(sequence, |seq, rule| apply_rule(seq, rule, render))
}
