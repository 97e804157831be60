// Remapd Core Library
// Event-to-action dispatch engine for system-wide input remapping

pub mod chord;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod injector;
pub mod input;
pub mod key;
pub mod macros;
pub mod mapping;
pub mod output;

pub use chord::{Chord, ChordParseError};
pub use config::{AutoloadEntry, GlobalConfig};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use event::RawEvent;
pub use injector::{Dispatcher, InjectorSession, SessionState};
pub use input::{list_devices, DeviceInfo, EvdevSource, EventSource, InputError};
pub use key::{EventKind, KeyIdentifier, KeyNameTable};
pub use macros::exec::MacroExecution;
pub use macros::parser::{parse as parse_macro, SyntaxError};
pub use macros::{MacroNode, Program};
pub use mapping::{Action, ChordOverlapPolicy, Mapping, Settings};
pub use output::{EventSink, OutputError, UinputSink, VirtualOutput};
