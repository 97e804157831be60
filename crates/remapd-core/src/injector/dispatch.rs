// Remapd Event Dispatch
// Chord recognition state machine and action dispatch for one device

use std::collections::HashMap;
use std::sync::Arc;

use crate::chord::Chord;
use crate::event::{RawEvent, KEY_AUTOREPEAT, KEY_DOWN, KEY_UP};
use crate::key::KeyIdentifier;
use crate::macros::exec::MacroExecution;
use crate::mapping::{Action, ChordOverlapPolicy, Mapping};
use crate::output::EventSink;

/// What happened to a key's down event. Decides what its up event does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Forwarded unchanged; the matching up is forwarded too.
    Forwarded,
    /// Withheld as a potential chord member, remembering the original down
    /// value; flushed as a tap if the key releases before a chord fires.
    Withheld(i32),
    /// Consumed by a fired chord.
    Consumed,
}

/// The action a fired chord is currently holding.
enum FiredAction {
    /// Synthetic key held down until the combo releases.
    Keystroke(KeyIdentifier),
    /// Macro execution bound to the combo for release/cancellation.
    Macro(MacroExecution),
}

/// Turns one device's raw event stream into the transformed output stream.
///
/// Pure state machine over `process()`: the session thread feeds it events,
/// tests feed it events directly.
pub struct Dispatcher {
    chords: Vec<(Chord, Action)>,
    /// Entry is a strict subset of some other entry; precomputed for the
    /// suppress_subsets overlap policy.
    subset_of_other: Vec<bool>,
    policy: ChordOverlapPolicy,
    keystroke_sleep_ms: u64,
    sink: Arc<dyn EventSink>,
    /// Currently-down keys and what their down event became.
    down: HashMap<KeyIdentifier, Disposition>,
    /// Fired chords by entry index.
    fired: HashMap<usize, FiredAction>,
    /// Released macro executions still finishing their tree.
    draining: Vec<MacroExecution>,
}

impl Dispatcher {
    pub fn new(mapping: &Mapping, sink: Arc<dyn EventSink>) -> Self {
        let chords: Vec<(Chord, Action)> = mapping
            .entries()
            .map(|(c, a)| (c.clone(), a.clone()))
            .collect();
        let subset_of_other = chords
            .iter()
            .map(|(c, _)| {
                chords
                    .iter()
                    .any(|(other, _)| c.is_strict_subset_of(other))
            })
            .collect();

        Self {
            chords,
            subset_of_other,
            policy: mapping.settings().chord_overlap_policy,
            keystroke_sleep_ms: mapping.settings().keystroke_sleep_ms,
            sink,
            down: HashMap::new(),
            fired: HashMap::new(),
            draining: Vec::new(),
        }
    }

    /// Process one raw event from the device source.
    pub fn process(&mut self, event: RawEvent) {
        if !event.is_button() {
            // analog movement and anything else we don't recognize
            self.emit(event);
            return;
        }

        let key = event.identifier();
        if event.is_autorepeat() {
            self.on_autorepeat(key, event);
        } else if event.is_down() {
            self.on_down(key, event);
        } else {
            self.on_up(key, event);
        }

        self.draining.retain(MacroExecution::is_running);
    }

    /// Tear down: cancel macro executions and release held synthetic keys.
    pub fn stop(&mut self) {
        let fired: Vec<(usize, FiredAction)> = self.fired.drain().collect();
        for (_, action) in fired {
            match action {
                FiredAction::Keystroke(mapped) => {
                    self.emit(RawEvent::new(mapped.kind, mapped.code, KEY_UP))
                }
                FiredAction::Macro(execution) => execution.cancel(),
            }
        }
        // dropping joins each cancelled execution
        self.draining.clear();
        self.down.clear();
    }

    fn on_down(&mut self, key: KeyIdentifier, event: RawEvent) {
        if self.down.contains_key(&key) {
            // duplicate down without a release in between; analog triggers
            // report streams of nonzero values
            log::trace!("{}, duplicate key down", event);
            return;
        }

        let member_of_any = self.chords.iter().any(|(c, _)| c.contains(key));
        if !member_of_any {
            self.down.insert(key, Disposition::Forwarded);
            log::trace!("{}, unmapped", event);
            self.emit(event);
            return;
        }

        self.down.insert(key, Disposition::Withheld(event.value));

        if let Some(index) = self.newly_satisfied(key) {
            self.fire(index);
        }
    }

    /// The most specific chord completed by this key going down, if any.
    fn newly_satisfied(&self, key: KeyIdentifier) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, (chord, _)) in self.chords.iter().enumerate() {
            if !chord.contains(key)
                || self.fired.contains_key(&index)
                || !chord.keys().iter().all(|k| self.down.contains_key(k))
            {
                continue;
            }
            if self.policy == ChordOverlapPolicy::SuppressSubsets && self.subset_of_other[index] {
                continue;
            }
            match best {
                Some(current) if self.chords[current].0.len() >= chord.len() => {}
                _ => best = Some(index),
            }
        }
        best
    }

    fn fire(&mut self, index: usize) {
        let (chord, action) = &self.chords[index];
        for member in chord.keys() {
            self.down.insert(*member, Disposition::Consumed);
        }

        match action {
            Action::Keystroke(mapped) => {
                log::debug!("{} fired, maps to {}", chord, mapped);
                let mapped = *mapped;
                self.emit(RawEvent::new(mapped.kind, mapped.code, KEY_DOWN));
                self.fired.insert(index, FiredAction::Keystroke(mapped));
            }
            Action::Macro(program) => {
                log::debug!("{} fired, maps to macro {}", chord, program.code());
                let execution = MacroExecution::spawn(
                    program.clone(),
                    self.sink.clone(),
                    self.keystroke_sleep_ms,
                );
                self.fired.insert(index, FiredAction::Macro(execution));
            }
        }
    }

    fn on_up(&mut self, key: KeyIdentifier, event: RawEvent) {
        let Some(disposition) = self.down.remove(&key) else {
            // the down predates this session; forward as-is
            self.emit(event);
            return;
        };

        // every fired chord this key is a member of releases now
        let releasing: Vec<usize> = self
            .fired
            .keys()
            .copied()
            .filter(|index| self.chords[*index].0.contains(key))
            .collect();

        if releasing.is_empty() {
            match disposition {
                Disposition::Forwarded => self.emit(event),
                Disposition::Withheld(down_value) => {
                    // never became part of a fired chord: deliver the tap
                    log::trace!("{}, flushing withheld tap", event);
                    self.emit(RawEvent::new(event.kind, event.code, down_value));
                    self.emit(event);
                }
                Disposition::Consumed => {}
            }
            return;
        }

        for index in releasing {
            let Some(action) = self.fired.remove(&index) else {
                continue;
            };
            match action {
                FiredAction::Keystroke(mapped) => {
                    log::trace!("{}, releasing {}", event, mapped);
                    self.emit(RawEvent::new(mapped.kind, mapped.code, KEY_UP));
                }
                FiredAction::Macro(execution) => {
                    execution.release();
                    if execution.is_running() {
                        self.draining.push(execution);
                    }
                }
            }
        }
    }

    fn on_autorepeat(&mut self, key: KeyIdentifier, event: RawEvent) {
        let mut macro_owns_key = false;
        for (index, action) in &self.fired {
            if !self.chords[*index].0.contains(key) {
                continue;
            }
            match action {
                FiredAction::Keystroke(mapped) => {
                    // held combos keep repeating their mapped output
                    let repeat = RawEvent::new(mapped.kind, mapped.code, KEY_AUTOREPEAT);
                    self.emit(repeat);
                    return;
                }
                FiredAction::Macro(_) => macro_owns_key = true,
            }
        }
        if macro_owns_key {
            // the macro is in control of the output
            return;
        }

        match self.down.get(&key) {
            Some(Disposition::Forwarded) => self.emit(event),
            Some(_) => {}
            None => {
                if !self.chords.iter().any(|(c, _)| c.contains(key)) {
                    self.emit(event);
                }
            }
        }
    }

    fn emit(&self, event: RawEvent) {
        if let Err(error) = self.sink.emit(event) {
            log::error!("failed to write {}: {}", event, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{EventKind, KeyNameTable};
    use crate::macros::parser::parse;
    use crate::mapping::Settings;
    use crate::output::OutputError;
    use indexmap::IndexMap;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<RawEvent>>,
    }

    impl CollectingSink {
        fn snapshot(&self) -> Vec<RawEvent> {
            self.events.lock().clone()
        }
    }

    impl EventSink for CollectingSink {
        fn emit(&self, event: RawEvent) -> Result<(), OutputError> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    fn keystroke_mapping(entries: &[(&str, u16)]) -> Mapping {
        let mut map = IndexMap::new();
        for (chord, code) in entries {
            map.insert(
                chord.parse().unwrap(),
                Action::Keystroke(KeyIdentifier::key(*code)),
            );
        }
        Mapping::new(map, Settings::default())
    }

    fn dispatcher(mapping: &Mapping) -> (Dispatcher, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        (Dispatcher::new(mapping, sink.clone()), sink)
    }

    #[test]
    fn test_unmapped_keys_pass_through() {
        let mapping = keystroke_mapping(&[("1,58", 1)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(30, 1));
        dispatcher.process(RawEvent::key(30, 0));
        dispatcher.process(RawEvent::new(EventKind::Relative, 0, -5));

        assert_eq!(
            sink.snapshot(),
            vec![
                RawEvent::key(30, 1),
                RawEvent::key(30, 0),
                RawEvent::new(EventKind::Relative, 0, -5),
            ]
        );
    }

    #[test]
    fn test_single_key_substitution_with_repeat() {
        // capslock -> esc
        let mapping = keystroke_mapping(&[("1,58", 1)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(58, 1));
        dispatcher.process(RawEvent::key(58, 2));
        dispatcher.process(RawEvent::key(58, 0));

        assert_eq!(
            sink.snapshot(),
            vec![
                RawEvent::key(1, 1),
                RawEvent::key(1, 2),
                RawEvent::key(1, 0),
            ]
        );
    }

    #[test]
    fn test_no_refire_while_held() {
        let mapping = keystroke_mapping(&[("1,58", 1)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(58, 1));
        // analog-style duplicate downs must not refire
        dispatcher.process(RawEvent::key(58, 1));
        dispatcher.process(RawEvent::key(58, 1));
        assert_eq!(sink.snapshot().len(), 1);

        // release and re-press fires again
        dispatcher.process(RawEvent::key(58, 0));
        dispatcher.process(RawEvent::key(58, 1));
        assert_eq!(
            sink.snapshot(),
            vec![
                RawEvent::key(1, 1),
                RawEvent::key(1, 0),
                RawEvent::key(1, 1),
            ]
        );
    }

    #[test]
    fn test_chord_fires_on_last_member_and_releases_on_first() {
        // leftctrl+a -> b
        let mapping = keystroke_mapping(&[("1,29+1,30", 48)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(29, 1));
        assert!(sink.snapshot().is_empty(), "partial chord must not emit");

        dispatcher.process(RawEvent::key(30, 1));
        assert_eq!(sink.snapshot(), vec![RawEvent::key(48, 1)]);

        dispatcher.process(RawEvent::key(29, 0));
        assert_eq!(
            sink.snapshot(),
            vec![RawEvent::key(48, 1), RawEvent::key(48, 0)]
        );

        // remaining member releases silently
        dispatcher.process(RawEvent::key(30, 0));
        assert_eq!(sink.snapshot().len(), 2);

        // full re-press fires again
        dispatcher.process(RawEvent::key(30, 1));
        dispatcher.process(RawEvent::key(29, 1));
        assert_eq!(sink.snapshot().len(), 3);
        assert_eq!(*sink.snapshot().last().unwrap(), RawEvent::key(48, 1));
    }

    #[test]
    fn test_three_member_chord_needs_every_member() {
        // leftctrl+leftshift+a -> b
        let mapping = keystroke_mapping(&[("1,29+1,42+1,30", 48)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(29, 1));
        dispatcher.process(RawEvent::key(30, 1));
        assert!(sink.snapshot().is_empty());

        dispatcher.process(RawEvent::key(42, 1));
        assert_eq!(sink.snapshot(), vec![RawEvent::key(48, 1)]);

        dispatcher.process(RawEvent::key(42, 0));
        assert_eq!(*sink.snapshot().last().unwrap(), RawEvent::key(48, 0));
    }

    #[test]
    fn test_withheld_member_flushes_as_tap() {
        let mapping = keystroke_mapping(&[("1,29+1,30", 48)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(30, 1));
        assert!(sink.snapshot().is_empty());
        dispatcher.process(RawEvent::key(30, 0));
        assert_eq!(
            sink.snapshot(),
            vec![RawEvent::key(30, 1), RawEvent::key(30, 0)]
        );
    }

    #[test]
    fn test_most_specific_chord_wins() {
        // a -> x, leftctrl+a -> y
        let mapping = keystroke_mapping(&[("1,30", 45), ("1,29+1,30", 21)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(29, 1));
        dispatcher.process(RawEvent::key(30, 1));
        // only the longer chord fires
        assert_eq!(sink.snapshot(), vec![RawEvent::key(21, 1)]);

        dispatcher.process(RawEvent::key(30, 0));
        dispatcher.process(RawEvent::key(29, 0));
        assert_eq!(
            sink.snapshot(),
            vec![RawEvent::key(21, 1), RawEvent::key(21, 0)]
        );

        // a alone still fires its own entry
        dispatcher.process(RawEvent::key(30, 1));
        assert_eq!(*sink.snapshot().last().unwrap(), RawEvent::key(45, 1));
    }

    #[test]
    fn test_eager_policy_fires_prefix_entry() {
        // leftctrl -> esc, leftctrl+a -> y
        let mapping = keystroke_mapping(&[("1,29", 1), ("1,29+1,30", 21)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(29, 1));
        assert_eq!(sink.snapshot(), vec![RawEvent::key(1, 1)]);
    }

    #[test]
    fn test_suppress_subsets_policy() {
        let mut entries = IndexMap::new();
        entries.insert(
            "1,29".parse().unwrap(),
            Action::Keystroke(KeyIdentifier::key(1)),
        );
        entries.insert(
            "1,29+1,30".parse().unwrap(),
            Action::Keystroke(KeyIdentifier::key(21)),
        );
        let settings = Settings {
            chord_overlap_policy: ChordOverlapPolicy::SuppressSubsets,
            ..Settings::default()
        };
        let mapping = Mapping::new(entries, settings);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        // the subset entry stays quiet while the longer chord may form
        dispatcher.process(RawEvent::key(29, 1));
        assert!(sink.snapshot().is_empty());

        dispatcher.process(RawEvent::key(30, 1));
        assert_eq!(sink.snapshot(), vec![RawEvent::key(21, 1)]);

        dispatcher.process(RawEvent::key(30, 0));
        dispatcher.process(RawEvent::key(29, 0));

        // a solo press of the suppressed entry flushes as a plain tap
        dispatcher.process(RawEvent::key(29, 1));
        dispatcher.process(RawEvent::key(29, 0));
        let events = sink.snapshot();
        assert_eq!(
            &events[events.len() - 2..],
            &[RawEvent::key(29, 1), RawEvent::key(29, 0)]
        );
    }

    #[test]
    fn test_dpad_hat_chord() {
        // hat0x -> a
        let mapping = keystroke_mapping(&[("3,16", 30)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::new(EventKind::Absolute, 16, -1));
        dispatcher.process(RawEvent::new(EventKind::Absolute, 16, 0));
        assert_eq!(
            sink.snapshot(),
            vec![RawEvent::key(30, 1), RawEvent::key(30, 0)]
        );
    }

    #[test]
    fn test_hold_macro_cancelled_by_release() {
        let table = KeyNameTable::builtin();
        let program = Arc::new(parse("h(k(2))", &table).unwrap());
        let mut entries = IndexMap::new();
        entries.insert("1,45".parse().unwrap(), Action::Macro(program));
        let settings = Settings {
            keystroke_sleep_ms: 0,
            ..Settings::default()
        };
        let mapping = Mapping::new(entries, settings);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(45, 1));
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.snapshot().len() < 6 {
            assert!(Instant::now() < deadline, "hold macro never emitted");
            std::thread::sleep(Duration::from_millis(2));
        }

        // autorepeat of the trigger is swallowed while the macro runs
        dispatcher.process(RawEvent::key(45, 2));

        dispatcher.process(RawEvent::key(45, 0));
        // wait for the loop to wind down, then make sure it stays quiet
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let count = sink.snapshot().len();
            std::thread::sleep(Duration::from_millis(20));
            if sink.snapshot().len() == count {
                break;
            }
            assert!(Instant::now() < deadline, "hold macro kept emitting");
        }

        let events = sink.snapshot();
        assert!(events.iter().all(|e| e.code == 3));
        assert_eq!(events.last().unwrap().value, 0);
        // the trigger key itself never reached the output
        assert!(!events.iter().any(|e| e.code == 45));
    }

    #[test]
    fn test_stop_releases_held_keystrokes() {
        let mapping = keystroke_mapping(&[("1,58", 1)]);
        let (mut dispatcher, sink) = dispatcher(&mapping);

        dispatcher.process(RawEvent::key(58, 1));
        dispatcher.stop();
        assert_eq!(
            sink.snapshot(),
            vec![RawEvent::key(1, 1), RawEvent::key(1, 0)]
        );
    }
}
