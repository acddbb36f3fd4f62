//! Unit tests for rules, matching and the rule store
//!
//! # Test Categories
//! 1. Validation - every construction error the editor reports
//! 2. Matching - fragments, skipped punctuation, prosody bracketing
//! 3. Store - loading fallbacks, list editing, saving

use super::*;
use crate::sound::wav::encode_pcm16;
use crate::sound::NullDeviceFactory;
use crate::speech::{ProsodyLedger, PunctuationRenderer, RenderContext, SpeechItem, SymbolLevel};
use proptest::prelude::*;
use rstest::rstest;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    ctx: RuleContext,
    ledger: Arc<ProsodyLedger>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let sounds = dir.path().join("sounds");
        fs::create_dir_all(sounds.join("unspoken")).unwrap();
        // 300 ms at 1 kHz mono
        fs::write(
            sounds.join("unspoken").join("button.wav"),
            encode_pcm16(1, 1000, &[500; 300]),
        )
        .unwrap();
        fs::write(dir.path().join("custom.wav"), encode_pcm16(2, 8000, &[0; 1600])).unwrap();

        let ledger = Arc::new(ProsodyLedger::new());
        let ctx = RuleContext::new(sounds, Arc::new(NullDeviceFactory::new()), ledger.clone());
        Self { dir, ctx, ledger }
    }

    fn custom_wav(&self) -> String {
        self.dir.path().join("custom.wav").to_string_lossy().into_owned()
    }

    fn rule(&self, record: RuleRecord) -> Rule {
        Rule::from_record(&record, &self.ctx).unwrap()
    }

    fn store_path(&self) -> PathBuf {
        self.dir.path().join(store::RULES_FILE_NAME)
    }
}

fn shape(sequence: &[SpeechItem]) -> Vec<String> {
    sequence
        .iter()
        .map(|item| match item {
            SpeechItem::Text(t) => format!("{:?}", t),
            SpeechItem::Command(c) => format!("cmd:{}", c.duration_ms()),
            SpeechItem::Chain(c) => format!("chain:{}", c.duration_ms()),
            SpeechItem::Break(ms) => format!("break:{}", ms),
        })
        .collect()
}

fn matched(rule: &Rule, text: &str, level: SymbolLevel) -> Vec<String> {
    let renderer = PunctuationRenderer;
    let render = RenderContext::new(&renderer, level, "en");
    shape(&RuleMatcher::new(rule, text, &render).collect::<Vec<_>>())
}

// ============================================================================
// Validation Tests
// ============================================================================

#[rstest]
#[case::empty_pattern(RuleRecord::beep("", 440, 50), RuleError::EmptyPattern)]
#[case::tone_too_high(RuleRecord::beep("x", 50_001, 50), RuleError::ToneOutOfRange(50_001))]
#[case::tone_negative(RuleRecord::beep("x", -1, 50), RuleError::ToneOutOfRange(-1))]
#[case::duration_too_long(RuleRecord::beep("x", 440, 60_001), RuleError::DurationOutOfRange(60_001))]
#[case::unknown_prosody(
    RuleRecord::prosody("x", "Inflection", Some(10), None),
    RuleError::UnknownProsody("Inflection".to_string())
)]
#[case::prosody_both(RuleRecord::prosody("x", "Pitch", Some(10), Some(1.5)), RuleError::ProsodyBothSet)]
#[case::prosody_neither(RuleRecord::prosody("x", "Pitch", None, None), RuleError::ProsodyNeitherSet)]
#[case::offset_range(RuleRecord::prosody("x", "Rate", Some(101), None), RuleError::OffsetOutOfRange(101))]
#[case::multiplier_range(
    RuleRecord::prosody("x", "Volume", None, Some(0.05)),
    RuleError::MultiplierOutOfRange(0.05)
)]
#[case::missing_builtin(
    RuleRecord::built_in("x", ""),
    RuleError::MissingField { rule_type: RuleType::BuiltInWave, field: "builtInWavFile" }
)]
fn test_invalid_records_are_rejected(#[case] record: RuleRecord, #[case] expected: RuleError) {
    let fixture = Fixture::new();
    assert_eq!(Rule::from_record(&record, &fixture.ctx).unwrap_err(), expected);
}

#[test]
fn test_invalid_regex_is_rejected() {
    let fixture = Fixture::new();
    let err = Rule::from_record(&RuleRecord::beep("[unclosed", 440, 50), &fixture.ctx).unwrap_err();
    assert!(matches!(err, RuleError::InvalidPattern { .. }));
}

#[test]
fn test_adjustment_limits() {
    let fixture = Fixture::new();
    let mut record = RuleRecord::built_in("x", "unspoken/button.wav");
    record.start_adjustment = -60_000;
    record.end_adjustment = 60_000;
    assert!(Rule::from_record(&record, &fixture.ctx).is_ok());

    record.end_adjustment = 60_001;
    assert_eq!(
        Rule::from_record(&record, &fixture.ctx).unwrap_err(),
        RuleError::AdjustmentOutOfRange { field: "endAdjustment", value: 60_001 }
    );
}

#[test]
fn test_volume_above_100_is_rejected() {
    let fixture = Fixture::new();
    let mut record = RuleRecord::beep("x", 440, 50);
    record.volume = 101;
    assert_eq!(
        Rule::from_record(&record, &fixture.ctx).unwrap_err(),
        RuleError::VolumeOutOfRange(101)
    );
}

#[test]
fn test_missing_wav_file_is_rejected() {
    let fixture = Fixture::new();
    let record = RuleRecord::wave("x", "/no/such/file.wav");
    assert!(matches!(
        Rule::from_record(&record, &fixture.ctx),
        Err(RuleError::MissingFile(_))
    ));
}

#[test]
fn test_non_16_bit_wav_is_rejected() {
    let fixture = Fixture::new();
    let path = fixture.dir.path().join("eight.wav");
    let mut bytes = encode_pcm16(1, 8000, &[0; 4]);
    bytes[34] = 8;
    fs::write(&path, bytes).unwrap();

    let err = Rule::from_record(&RuleRecord::wave("x", &path.to_string_lossy()), &fixture.ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        RuleError::Wav { source: WavError::UnsupportedSampleWidth { bits: 8 }, .. }
    ));
}

#[test]
fn test_builtin_path_accepts_either_separator() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::built_in("x", "unspoken\\button.wav"));
    assert_eq!(rule.pre_command().duration_ms(), 300);
    assert_eq!(
        fixture.ctx.built_in_path("unspoken/button.wav"),
        fixture.ctx.built_in_path("unspoken\\button.wav")
    );
}

#[test]
fn test_display_name_and_description() {
    let fixture = Fixture::new();

    let mut beep = RuleRecord::beep(r"\bTODO\b", 880, 40);
    assert_eq!(fixture.rule(beep.clone()).display_name(), r"\bTODO\b");
    beep.comment = "todo marker".to_string();
    let beep = fixture.rule(beep);
    assert_eq!(beep.display_name(), "todo marker");
    assert_eq!(beep.description(), "Beep: 880@40");

    let builtin = fixture.rule(RuleRecord::built_in("x", "unspoken/button.wav"));
    assert_eq!(builtin.description(), "unspoken/button.wav");

    let custom = fixture.rule(RuleRecord::wave("x", &fixture.custom_wav()));
    assert!(custom.description().starts_with("Wav: "));

    let prosody = fixture.rule(RuleRecord::prosody("x", "pitch", Some(20), None));
    assert_eq!(prosody.description(), "Prosody: Pitch:20:");
}

#[test]
fn test_record_round_trip_keeps_fields() {
    let fixture = Fixture::new();
    let mut record = RuleRecord::wave("x+", &fixture.custom_wav());
    record.comment = "pluses".to_string();
    record.start_adjustment = -20;
    record.end_adjustment = 15;
    record.volume = 40;
    record.case_sensitive = false;
    record.enabled = false;

    assert_eq!(fixture.rule(record.clone()).to_record(), record);
}

#[test]
fn test_record_accepts_nulls_and_missing_fields() {
    let json = r#"{"pattern": "x", "ruleType": "beep", "tone": 440, "duration": 20,
                   "comment": null, "startAdjustment": null, "endAdjustment": null}"#;
    let record: RuleRecord = serde_json::from_str(json).unwrap();
    assert_eq!(record.comment, "");
    assert_eq!(record.start_adjustment, 0);
    assert!(record.enabled);
    assert_eq!(record.volume, 100);
}

// ============================================================================
// Matching Tests
// ============================================================================

#[test]
fn test_click_the_button() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::built_in(r"\[button\]", "unspoken/button.wav"));
    assert_eq!(
        matched(&rule, "Click the [button]", SymbolLevel::Some),
        [r#""Click the ""#, "cmd:300", r#""""#]
    );
}

#[test]
fn test_matches_are_dropped_from_text() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::beep("ab", 440, 10));
    assert_eq!(
        matched(&rule, "xabyabz", SymbolLevel::Some),
        [r#""x""#, "cmd:10", r#""y""#, "cmd:10", r#""z""#]
    );
}

#[test]
fn test_prosody_brackets_matched_text() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::prosody("LOUD", "Pitch", Some(20), None));
    assert_eq!(
        matched(&rule, "LOUD", SymbolLevel::Some),
        [r#""""#, "cmd:0", r#""LOUD""#, "cmd:0", r#""""#]
    );
    assert!(!rule.pre_command().is_synchronous());
}

#[test]
fn test_unspoken_punctuation_is_not_matched() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::beep(r"\?", 440, 10));

    // '?' is only spoken at "all" and above.
    assert_eq!(matched(&rule, "why?", SymbolLevel::Some), [r#""why?""#]);
    assert_eq!(
        matched(&rule, "why?", SymbolLevel::All),
        [r#""why""#, "cmd:10", r#""""#]
    );
}

#[test]
fn test_blank_match_is_still_replaced() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::beep(r"\n", 440, 10));
    assert_eq!(
        matched(&rule, "a\nb", SymbolLevel::None),
        [r#""a""#, "cmd:10", r#""b""#]
    );
}

#[test]
fn test_zero_length_matches_advance() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::beep("x*", 440, 1));
    let out = matched(&rule, "ab", SymbolLevel::Some);
    assert_eq!(out.iter().filter(|s| *s == "cmd:1").count(), 3);
}

#[test]
fn test_commands_are_shared_between_matches() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::beep("a", 440, 10));
    let renderer = PunctuationRenderer;
    let render = RenderContext::new(&renderer, SymbolLevel::Some, "en");
    let commands: Vec<_> = RuleMatcher::new(&rule, "aa", &render)
        .filter_map(|item| match item {
            SpeechItem::Command(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(commands.len(), 2);
    assert!(Arc::ptr_eq(&commands[0], &commands[1]));
}

#[test]
fn test_apply_rules_in_list_order() {
    let fixture = Fixture::new();
    let rules = vec![
        Arc::new(fixture.rule(RuleRecord::beep("cat", 440, 10))),
        Arc::new(fixture.rule(RuleRecord::beep("c", 880, 20))),
    ];
    let renderer = PunctuationRenderer;
    let render = RenderContext::new(&renderer, SymbolLevel::Some, "en");

    let out = apply_rules(vec![SpeechItem::text("cat cow")], &rules, &render);
    assert_eq!(shape(&out), ["cmd:10", r#"" ""#, "cmd:20", r#""ow""#]);
}

#[test]
fn test_prosody_markers_drive_the_stack() {
    let fixture = Fixture::new();
    let rule = fixture.rule(RuleRecord::prosody("LOUD", "Volume", None, Some(2.0)));
    rule.pre_command().run().unwrap();
    assert_eq!(fixture.ledger.depth(ProsodyParam::Volume), 1);
    rule.post_command().unwrap().run().unwrap();
    assert_eq!(fixture.ledger.depth(ProsodyParam::Volume), 0);
}

proptest! {
    #[test]
    fn prop_disabled_rule_is_identity(text in ".{0,40}") {
        let fixture = Fixture::new();
        let mut record = RuleRecord::beep("[a-z]+", 440, 10);
        record.enabled = false;
        let rule = fixture.rule(record);

        let renderer = PunctuationRenderer;
        let render = RenderContext::new(&renderer, SymbolLevel::Some, "en");
        let items: Vec<_> = RuleMatcher::new(&rule, &text, &render).collect();
        prop_assert_eq!(items.len(), 1);
        prop_assert_eq!(items[0].as_text(), Some(text.as_str()));

        let applied = apply_rule(vec![SpeechItem::text(text.clone())], &rule, &render);
        prop_assert_eq!(applied.len(), 1);
        prop_assert_eq!(applied[0].as_text(), Some(text.as_str()));
    }
}

// ============================================================================
// Store Tests
// ============================================================================

#[test]
fn test_missing_file_loads_defaults() {
    let fixture = Fixture::new();
    let (store, report) = RuleStore::open(fixture.store_path(), &fixture.ctx);
    assert_eq!(report.source, LoadSource::MissingFile);
    assert!(store.is_empty());
}

#[rstest]
#[case::empty("", LoadSource::EmptyFile)]
#[case::whitespace("  \n", LoadSource::EmptyFile)]
#[case::garbage("{not json", LoadSource::Malformed)]
#[case::object(r#"{"pattern": "x"}"#, LoadSource::Malformed)]
fn test_unusable_file_loads_defaults(#[case] content: &str, #[case] source: LoadSource) {
    let fixture = Fixture::new();
    fs::write(fixture.store_path(), content).unwrap();
    let (store, report) = RuleStore::open(fixture.store_path(), &fixture.ctx);
    assert_eq!(report.source, source);
    assert!(store.is_empty());
}

#[test]
fn test_bad_records_are_skipped() {
    let fixture = Fixture::new();
    let json = r#"[
        {"pattern": "one", "ruleType": "beep", "tone": 440, "duration": 10},
        {"pattern": "two", "ruleType": "chime"},
        {"pattern": "(", "ruleType": "beep", "tone": 440, "duration": 10},
        {"pattern": "four", "ruleType": "prosody", "prosodyName": "Rate", "prosodyOffset": 5}
    ]"#;
    fs::write(fixture.store_path(), json).unwrap();

    let (store, report) = RuleStore::open(fixture.store_path(), &fixture.ctx);
    assert_eq!(report.source, LoadSource::File);
    assert_eq!(report.loaded, 2);
    assert_eq!(
        report.skipped.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![1, 2]
    );
    let patterns: Vec<_> = store.rules().iter().map(|r| r.pattern().to_string()).collect();
    assert_eq!(patterns, ["one", "four"]);
}

#[test]
fn test_out_of_range_adjustments_are_skipped() {
    let fixture = Fixture::new();
    let json = r#"[
        {"pattern": "a", "ruleType": "builtInWave", "builtInWavFile": "unspoken/button.wav",
         "startAdjustment": 1000000000000000},
        {"pattern": "b", "ruleType": "builtInWave", "builtInWavFile": "unspoken/button.wav",
         "endAdjustment": -9223372036854775808},
        {"pattern": "c", "ruleType": "beep", "tone": 440, "duration": 10}
    ]"#;
    fs::write(fixture.store_path(), json).unwrap();

    let store = RuleStore::new(fixture.store_path());
    let report = store.reload(&fixture.ctx);
    assert_eq!(report.loaded, 1);
    assert_eq!(
        report.skipped.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(store.rules()[0].pattern(), "c");
}

#[test]
fn test_save_sorts_keys_and_indents() {
    let fixture = Fixture::new();
    let store = RuleStore::new(fixture.store_path());
    store.add(fixture.rule(RuleRecord::beep("x", 440, 10)));
    store.save().unwrap();

    let text = fs::read_to_string(fixture.store_path()).unwrap();
    assert!(text.starts_with("[\n    {\n        \"builtInWavFile\": null,"));
    let comment = text.find("\"comment\"").unwrap();
    let volume = text.find("\"volume\"").unwrap();
    assert!(comment < volume);
}

#[test]
fn test_save_then_reload_restores_rules() {
    let fixture = Fixture::new();
    let store = RuleStore::new(fixture.store_path());
    store.add(fixture.rule(RuleRecord::beep("a", 440, 10)));
    store.add(fixture.rule(RuleRecord::built_in("b", "unspoken/button.wav")));
    store.add(fixture.rule(RuleRecord::prosody("c", "Rate", None, Some(1.5))));
    store.set_enabled(1, false).unwrap();

    let report = store.save_and_reload(&fixture.ctx).unwrap();
    assert_eq!(report.loaded, 3);
    let rules = store.rules();
    assert!(!rules[1].is_enabled());
    assert_eq!(rules[2].description(), "Prosody: Rate::1.5");
}

#[test]
fn test_list_editing() {
    let fixture = Fixture::new();
    let store = RuleStore::new(fixture.store_path());
    for pattern in ["a", "b", "c"] {
        store.add(fixture.rule(RuleRecord::beep(pattern, 440, 10)));
    }
    let order = |s: &RuleStore| s.rules().iter().map(|r| r.pattern().to_string()).collect::<Vec<_>>();

    assert_eq!(store.move_rule(0, MoveDirection::Down).unwrap(), 1);
    assert_eq!(order(&store), ["b", "a", "c"]);
    assert_eq!(store.move_rule(0, MoveDirection::Up).unwrap(), 0);
    assert_eq!(store.move_rule(2, MoveDirection::Down).unwrap(), 2);
    assert_eq!(order(&store), ["b", "a", "c"]);

    assert!(!store.toggle(1).unwrap());
    assert!(store.toggle(1).unwrap());

    let removed = store.remove(0).unwrap();
    assert_eq!(removed.pattern(), "b");
    assert_eq!(order(&store), ["a", "c"]);

    store.replace(1, fixture.rule(RuleRecord::beep("z", 440, 10))).unwrap();
    assert_eq!(order(&store), ["a", "z"]);

    assert_eq!(
        store.remove(5).unwrap_err(),
        StoreError::IndexOutOfRange { index: 5, len: 2 }
    );
}

#[test]
fn test_builtin_sounds_lists_categories() {
    let fixture = Fixture::new();
    fs::write(fixture.ctx.sounds_dir.join("unspoken").join("notes.txt"), "x").unwrap();
    assert_eq!(builtin_sounds(&fixture.ctx.sounds_dir), ["unspoken/button.wav"]);
}
