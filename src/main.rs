use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use earcons::cli::{Cli, Command};
use earcons::config::{default_config_dir, Settings, SETTINGS_FILE_NAME};
use earcons::hooks::{Collaborators, CorePaths, EarconCore};
use earcons::logging;
use earcons::rules::{builtin_sounds, MoveDirection, Rule, RuleRecord};
use earcons::sound::{output_device_names, DeviceFactory, NullDeviceFactory, RodioDeviceFactory};
use earcons::speech::{SpeechItem, SymbolLevel};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let settings = Settings::load(&config_dir.join(SETTINGS_FILE_NAME))?;
    let settings = cli.merge_into_settings(settings)?;

    logging::init(settings.log_level, settings.log_file.as_deref())?;
    debug!(config_dir = %config_dir.display(), ?settings, "settings loaded");

    let command = cli.command.clone().unwrap_or(Command::List);
    match command {
        Command::Devices => {
            for name in output_device_names() {
                println!("{}", name);
            }
            return Ok(());
        }
        Command::Sounds => {
            let sounds = settings.sounds_path(&config_dir);
            for clip in builtin_sounds(&sounds) {
                println!("{}", clip);
            }
            return Ok(());
        }
        _ => {}
    }

    let devices: Arc<dyn DeviceFactory> = if cli.no_audio {
        Arc::new(NullDeviceFactory::realtime())
    } else {
        Arc::new(RodioDeviceFactory::new(settings.output_device.clone()))
    };
    let paths = CorePaths::resolve(&settings, &config_dir);
    let core = EarconCore::new(settings, paths, Collaborators::standalone(devices))
        .context("Failed to start earcon core")?;

    let result = run(&core, command);
    core.shutdown();
    result
}

fn run(core: &EarconCore, command: Command) -> Result<()> {
    let store = core.store();
    match command {
        Command::List => list(core),
        Command::Check => {
            let report = core.reload();
            println!(
                "{}: {} rules loaded ({:?})",
                store.path().display(),
                report.loaded,
                report.source
            );
            for (index, reason) in &report.skipped {
                println!("  record {} skipped: {}", index, reason);
            }
            if !report.skipped.is_empty() {
                anyhow::bail!("{} rules failed to load", report.skipped.len());
            }
        }
        Command::Preview { text, level } => {
            let level = Cli::parse_level(&level)?;
            for item in core.process_utterance(vec![SpeechItem::text(text)], level) {
                println!("{}", item);
            }
        }
        Command::Play { text, level } => {
            let level = Cli::parse_level(&level)?;
            let sequence = core.process_utterance(vec![SpeechItem::text(text)], level);
            speak(core, sequence)?;
        }
        Command::Test { index, repeat } => {
            let sequence = core.test_utterance(index, repeat, SymbolLevel::default())?;
            speak(core, sequence)?;
        }
        Command::Toggle => println!("{}", core.toggle()),
        Command::Enable { index } => {
            store.set_enabled(index, true)?;
            core.save_rules()?;
        }
        Command::Disable { index } => {
            store.set_enabled(index, false)?;
            core.save_rules()?;
        }
        Command::Move { index, direction } => {
            let moved = store.move_rule(index, MoveDirection::from(direction))?;
            core.save_rules()?;
            println!("rule is now at {}", moved);
        }
        Command::Remove { index } => {
            let removed = store.remove(index)?;
            core.save_rules()?;
            println!("removed {}", removed.display_name());
        }
        Command::Edit {
            index,
            pattern,
            comment,
            volume,
        } => {
            let rule = store
                .get(index)
                .with_context(|| format!("No rule at index {}", index))?;
            let mut record = rule.to_record();
            if let Some(pattern) = pattern {
                record.pattern = pattern;
            }
            if let Some(comment) = comment {
                record.comment = comment;
            }
            if let Some(volume) = volume {
                record.volume = volume;
            }
            let edited = Rule::from_record(&record, core.rule_context())?;
            store.replace(index, edited)?;
            core.save_rules()?;
        }
        Command::AddBeep { common, hz, duration } => {
            add(core, common.apply(RuleRecord::beep(&common.pattern, hz, duration)))?;
        }
        Command::AddWave {
            common,
            file,
            built_in,
            start,
            end,
        } => {
            let mut record = match (file, built_in) {
                (Some(file), _) => RuleRecord::wave(&common.pattern, &file.to_string_lossy()),
                (None, Some(built_in)) => RuleRecord::built_in(&common.pattern, &built_in),
                (None, None) => anyhow::bail!("Either --file or --built-in is required"),
            };
            record.start_adjustment = start;
            record.end_adjustment = end;
            add(core, common.apply(record))?;
        }
        Command::AddProsody {
            common,
            name,
            offset,
            multiplier,
        } => {
            add(core, common.apply(RuleRecord::prosody(&common.pattern, &name, offset, multiplier)))?;
        }
        Command::Sounds | Command::Devices => {}
    }
    Ok(())
}

fn list(core: &EarconCore) {
    println!("Earcons are {}", if core.is_enabled() { "on" } else { "off" });
    for (index, rule) in core.store().rules().iter().enumerate() {
        println!(
            "{:>3}  [{}]  {:<30}  {}",
            index,
            if rule.is_enabled() { "x" } else { " " },
            rule.display_name(),
            rule.description()
        );
    }
}

fn add(core: &EarconCore, record: RuleRecord) -> Result<()> {
    let rule = Rule::from_record(&record, core.rule_context())?;
    let index = core.store().add(rule);
    core.save_rules()?;
    info!(index, "rule added");
    println!("added rule {}", index);
    Ok(())
}

/// Print text as it would be spoken and play cues in between
fn speak(core: &EarconCore, sequence: Vec<SpeechItem>) -> Result<()> {
    let stdout = std::io::stdout();
    let chains = core.perform(sequence, |text| {
        let mut out = stdout.lock();
        let _ = writeln!(out, "{}", text.trim());
    })?;
    // Pacing ends once the last cue's time has passed.
    for chain in chains {
        chain.wait();
    }
    Ok(())
}
