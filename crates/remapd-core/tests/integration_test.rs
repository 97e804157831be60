// Remapd Integration Tests
//
// These tests verify the pipeline from a preset document through the
// dispatch engine and the coordinator, over fake sources and sinks:
// preset -> Mapping -> Dispatcher/InjectorSession -> collected output

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use remapd_core::{
    Coordinator, Dispatcher, EventSink, EventSource, InputError, KeyNameTable, Mapping,
    OutputError, RawEvent, Settings,
};

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<RawEvent>>,
}

impl CollectingSink {
    fn snapshot(&self) -> Vec<RawEvent> {
        self.events.lock().clone()
    }

    fn wait_for(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.snapshot().len() < count {
            assert!(
                Instant::now() < deadline,
                "expected {} events, got {:?}",
                count,
                self.snapshot()
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: RawEvent) -> Result<(), OutputError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Plays scripted batches, then idles until released.
struct ScriptedSource {
    batches: VecDeque<Vec<RawEvent>>,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(batches: Vec<Vec<RawEvent>>) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (
            Self {
                batches: batches.into(),
                released: released.clone(),
            },
            released,
        )
    }
}

impl EventSource for ScriptedSource {
    fn poll(&mut self, timeout_ms: i32) -> Result<Vec<RawEvent>, InputError> {
        if let Some(batch) = self.batches.pop_front() {
            return Ok(batch);
        }
        std::thread::sleep(Duration::from_millis(timeout_ms.min(5) as u64));
        Ok(Vec::new())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::Release);
    }
}

fn write_preset(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "remapd-integration-{}-{}.json",
        std::process::id(),
        name
    ));
    std::fs::write(&path, content).unwrap();
    path
}

fn load_preset(name: &str, content: &str) -> Mapping {
    let path = write_preset(name, content);
    let mapping = Mapping::load(&path, &Settings::default(), &KeyNameTable::builtin()).unwrap();
    std::fs::remove_file(&path).unwrap();
    mapping
}

#[test]
fn test_preset_chord_through_dispatcher() {
    let mapping = load_preset(
        "chords",
        r#"{
            "mapping": {
                "1,58,1": "escape",
                "1,29,1+1,30,1": "b"
            }
        }"#,
    );
    let sink = Arc::new(CollectingSink::default());
    let mut dispatcher = Dispatcher::new(&mapping, sink.clone());

    // single-key substitution
    dispatcher.process(RawEvent::key(58, 1));
    dispatcher.process(RawEvent::key(58, 0));

    // the combo fires on its last member, releases on the first
    dispatcher.process(RawEvent::key(29, 1));
    dispatcher.process(RawEvent::key(30, 1));
    dispatcher.process(RawEvent::key(29, 0));
    dispatcher.process(RawEvent::key(30, 0));

    // an unmapped key passes through untouched
    dispatcher.process(RawEvent::key(33, 1));
    dispatcher.process(RawEvent::key(33, 0));

    assert_eq!(
        sink.snapshot(),
        vec![
            RawEvent::key(1, 1),
            RawEvent::key(1, 0),
            RawEvent::key(48, 1),
            RawEvent::key(48, 0),
            RawEvent::key(33, 1),
            RawEvent::key(33, 0),
        ]
    );
}

#[test]
fn test_preset_macro_modifier_ordering() {
    let mapping = load_preset(
        "macro",
        r#"{
            "mapping": {
                "1,46,1": "m(control_l, k(a).k(x))"
            },
            "macros": { "keystroke_sleep_ms": 0 }
        }"#,
    );
    let sink = Arc::new(CollectingSink::default());
    let mut dispatcher = Dispatcher::new(&mapping, sink.clone());

    dispatcher.process(RawEvent::key(46, 1));
    sink.wait_for(6);
    dispatcher.process(RawEvent::key(46, 0));

    let events = sink.snapshot();
    assert_eq!(
        events,
        vec![
            RawEvent::key(29, 1),
            RawEvent::key(30, 1),
            RawEvent::key(30, 0),
            RawEvent::key(45, 1),
            RawEvent::key(45, 0),
            RawEvent::key(29, 0),
        ]
    );
    // the trigger key never reaches the output
    assert!(!events.iter().any(|e| e.code == 46));
}

#[test]
fn test_session_runs_loaded_preset() {
    let mapping = load_preset(
        "session",
        r#"{"mapping": {"1,58,1": "escape"}}"#,
    );
    let (source, released) = ScriptedSource::new(vec![vec![
        RawEvent::key(58, 1),
        RawEvent::key(58, 0),
    ]]);
    let sink = Arc::new(CollectingSink::default());

    let session = remapd_core::InjectorSession::spawn(
        "fake keyboard".to_string(),
        mapping,
        Box::new(source),
        sink.clone(),
    );
    sink.wait_for(2);
    session.stop();

    assert!(released.load(Ordering::Acquire));
    assert_eq!(
        sink.snapshot(),
        vec![RawEvent::key(1, 1), RawEvent::key(1, 0)]
    );
}

#[test]
fn test_coordinator_restart_stops_previous_session() {
    let coordinator = Coordinator::new(
        Arc::new(KeyNameTable::builtin()),
        Some(PathBuf::from("/nonexistent/remapd/config.json")),
    );
    let mapping = load_preset("restart", r#"{"mapping": {"1,58,1": "escape"}}"#);

    let (first_source, first_released) = ScriptedSource::new(Vec::new());
    coordinator.start_with_io(
        "twin device",
        mapping.clone(),
        Box::new(first_source),
        Arc::new(CollectingSink::default()),
    );
    assert!(coordinator.is_injecting("twin device"));
    assert!(!first_released.load(Ordering::Acquire));

    // starting again for the same device stops the first session before
    // the new one registers
    let (second_source, second_released) = ScriptedSource::new(Vec::new());
    coordinator.start_with_io(
        "twin device",
        mapping,
        Box::new(second_source),
        Arc::new(CollectingSink::default()),
    );
    assert!(first_released.load(Ordering::Acquire), "old grab leaked");
    assert!(coordinator.is_injecting("twin device"));
    assert_eq!(coordinator.active_devices().len(), 1);

    coordinator.stop_all();
    assert!(second_released.load(Ordering::Acquire));
    assert!(!coordinator.is_injecting("twin device"));
}

#[test]
fn test_coordinator_stop_is_idempotent() {
    let coordinator = Coordinator::new(
        Arc::new(KeyNameTable::builtin()),
        Some(PathBuf::from("/nonexistent/remapd/config.json")),
    );
    assert!(coordinator.stop("twin device").is_ok());

    let mapping = load_preset("idempotent", r#"{"mapping": {"1,58,1": "escape"}}"#);
    let (source, released) = ScriptedSource::new(Vec::new());
    coordinator.start_with_io(
        "twin device",
        mapping,
        Box::new(source),
        Arc::new(CollectingSink::default()),
    );
    assert!(coordinator.stop("twin device").is_ok());
    assert!(released.load(Ordering::Acquire));
    assert!(coordinator.stop("twin device").is_ok());
}
