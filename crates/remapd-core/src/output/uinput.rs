// Remapd uinput Output
// Virtual device creation and synthetic event emission

use std::collections::HashSet;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key, RelativeAxisType};
use parking_lot::Mutex;

use super::{EventSink, OutputError};
use crate::event::{RawEvent, KEY_DOWN, KEY_UP};
use crate::key::EventKind;

/// A virtual uinput device that synthetic events are written to.
///
/// Applications cannot tell its events from genuine hardware input.
pub struct VirtualOutput {
    device: VirtualDevice,
    /// Synthetic EV_KEY codes currently down, so they can be force
    /// released when the device goes away.
    pressed: HashSet<u16>,
}

impl VirtualOutput {
    /// Create the virtual device. `name` should carry the source device
    /// name so several sessions stay distinguishable.
    pub fn new(name: &str) -> Result<Self, OutputError> {
        let mut keys = AttributeSet::new();
        // the full key/button range, injected codes are only known at
        // mapping load time and capabilities cannot change afterwards
        for code in 0..0x2ff_u16 {
            keys.insert(Key::new(code));
        }

        let mut axes = AttributeSet::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_HWHEEL);

        let device = VirtualDeviceBuilder::new()
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?
            .name(name)
            .with_keys(&keys)
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?
            .with_relative_axes(&axes)
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?
            .build()
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?;

        log::debug!("created virtual device \"{}\"", name);
        Ok(Self {
            device,
            pressed: HashSet::new(),
        })
    }

    /// Write one event followed by the SYN report the kernel needs to
    /// deliver it.
    pub fn write(&mut self, event: RawEvent) -> Result<(), OutputError> {
        let event_type = match event.kind {
            EventKind::Key => EventType::KEY,
            EventKind::Relative => EventType::RELATIVE,
            EventKind::Absolute => EventType::ABSOLUTE,
        };
        let input = InputEvent::new(event_type, event.code, event.value);
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.device
            .emit(&[input, syn])
            .map_err(|e: std::io::Error| OutputError::Write(e.to_string()))?;

        if event.kind == EventKind::Key {
            match event.value {
                KEY_DOWN => {
                    self.pressed.insert(event.code);
                }
                KEY_UP => {
                    self.pressed.remove(&event.code);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Release every key still down, so nothing stays stuck when the
    /// session ends mid-press.
    pub fn release_all(&mut self) -> Result<(), OutputError> {
        let held: Vec<u16> = self.pressed.drain().collect();
        for code in held {
            self.write(RawEvent::key(code, KEY_UP))?;
        }
        Ok(())
    }
}

impl Drop for VirtualOutput {
    fn drop(&mut self) {
        if let Err(error) = self.release_all() {
            log::error!("failed to release held keys: {}", error);
        }
    }
}

/// Thread-safe sink over a virtual output device, shared between an
/// injector loop and its macro executions.
pub struct UinputSink {
    inner: Mutex<VirtualOutput>,
}

impl UinputSink {
    pub fn new(name: &str) -> Result<Self, OutputError> {
        Ok(Self {
            inner: Mutex::new(VirtualOutput::new(name)?),
        })
    }
}

impl EventSink for UinputSink {
    fn emit(&self, event: RawEvent) -> Result<(), OutputError> {
        self.inner.lock().write(event)
    }
}
