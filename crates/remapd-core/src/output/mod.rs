// Remapd Output Layer
// Where transformed events get written

pub mod uinput;

pub use uinput::{UinputSink, VirtualOutput};

use crate::event::RawEvent;

/// Errors from the output side.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to create virtual device: {0}")]
    DeviceCreation(String),

    #[error("failed to write event: {0}")]
    Write(String),
}

/// An output sink for synthetic events.
///
/// Shared between an injector's event loop and its macro executions, which
/// run on their own threads; implementations serialize writes internally.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RawEvent) -> Result<(), OutputError>;
}
