// Remapd Mapping
// Immutable trigger-combination -> action table loaded from a preset

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::chord::Chord;
use crate::error::{Error, Result};
use crate::key::{KeyIdentifier, KeyNameTable};
use crate::macros::{self, parser, Program};

/// What a fired chord does.
#[derive(Debug, Clone)]
pub enum Action {
    /// Substitute one synthetic key: down on fire, up when the combo
    /// releases.
    Keystroke(KeyIdentifier),
    /// Run a macro program. Parsed once at load time; executions share
    /// the tree.
    Macro(Arc<Program>),
}

/// How overlapping chords that share member keys resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChordOverlapPolicy {
    /// Fire a chord the instant it is fully down; when one event completes
    /// several chords, only the most specific fires.
    #[default]
    Eager,
    /// Additionally, an entry whose member set is a strict subset of
    /// another entry's never fires; the longer chord always takes priority.
    SuppressSubsets,
}

impl ChordOverlapPolicy {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "eager" => Some(ChordOverlapPolicy::Eager),
            "suppress_subsets" => Some(ChordOverlapPolicy::SuppressSubsets),
            _ => None,
        }
    }
}

/// Scalar settings attached to a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Pause between synthetic keystroke edges. Some software needs a
    /// little time between keystrokes to detect them properly.
    pub keystroke_sleep_ms: u64,
    pub chord_overlap_policy: ChordOverlapPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keystroke_sleep_ms: 10,
            chord_overlap_policy: ChordOverlapPolicy::default(),
        }
    }
}

/// The `macros` section shared by presets and the global config. Preset
/// values override the lower-priority layer field by field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SettingsSection {
    #[serde(default)]
    keystroke_sleep_ms: Option<u64>,
    #[serde(default)]
    chord_overlap_policy: Option<String>,
}

impl SettingsSection {
    pub(crate) fn merge_into(&self, settings: &mut Settings) -> Result<()> {
        if let Some(ms) = self.keystroke_sleep_ms {
            settings.keystroke_sleep_ms = ms;
        }
        if let Some(ref name) = self.chord_overlap_policy {
            settings.chord_overlap_policy = ChordOverlapPolicy::from_name(name)
                .ok_or_else(|| {
                    Error::Config(format!("unknown chord_overlap_policy \"{}\"", name))
                })?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PresetFile {
    #[serde(default)]
    mapping: IndexMap<String, String>,
    #[serde(default)]
    macros: Option<SettingsSection>,
}

/// An immutable preset: chord -> action entries plus settings. Owned by
/// exactly one injector session and never mutated after load.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    entries: IndexMap<Chord, Action>,
    settings: Settings,
}

impl Mapping {
    /// Build a mapping directly; used by callers that already resolved
    /// their entries (and by tests).
    pub fn new(entries: IndexMap<Chord, Action>, settings: Settings) -> Self {
        Self { entries, settings }
    }

    /// Load and validate a preset document.
    ///
    /// Structural problems (unreadable file, malformed JSON, unknown
    /// setting keys) fail the load. Problems local to one mapping entry
    /// (bad chord descriptor, unknown target key, macro syntax error) are
    /// logged and skip that entry only, so one broken line does not take
    /// a whole device down.
    pub fn load(path: &Path, defaults: &Settings, keys: &KeyNameTable) -> Result<Mapping> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_in(path, e))?;
        let file: PresetFile =
            serde_json::from_str(&content).map_err(|e| Error::config_in(path, e))?;

        let mut settings = *defaults;
        if let Some(ref section) = file.macros {
            section.merge_into(&mut settings)?;
        }

        let mut entries = IndexMap::new();
        for (chord_text, output) in &file.mapping {
            let chord: Chord = match chord_text.parse() {
                Ok(chord) => chord,
                Err(error) => {
                    log::error!("skipping mapping entry \"{}\": {}", chord_text, error);
                    continue;
                }
            };

            let action = if macros::is_macro(output) {
                match parser::parse(output, keys) {
                    Ok(program) => Action::Macro(Arc::new(program)),
                    Err(error) => {
                        log::error!("skipping mapping entry \"{}\": {}", chord_text, error);
                        continue;
                    }
                }
            } else {
                match keys.resolve(output) {
                    Ok(key) => Action::Keystroke(key),
                    Err(error) => {
                        log::error!("skipping mapping entry \"{}\": {}", chord_text, error);
                        continue;
                    }
                }
            };

            if entries.insert(chord.clone(), action).is_some() {
                log::warn!("duplicate mapping entry for {}, keeping the later one", chord);
            }
        }

        log::info!(
            "loaded {} of {} mapping entries from \"{}\"",
            entries.len(),
            file.mapping.len(),
            path.display()
        );
        Ok(Mapping::new(entries, settings))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Chord, &Action)> {
        self.entries.iter()
    }

    pub fn get(&self, chord: &Chord) -> Option<&Action> {
        self.entries.get(chord)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
