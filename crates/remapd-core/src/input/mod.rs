// Remapd Input Layer
// Device discovery and grabbed evdev event sources

use std::os::unix::io::AsRawFd;

use evdev::{Device, EventType, InputEvent};

use crate::event::RawEvent;
use crate::key::EventKind;

/// Name prefix of our own virtual output devices. Sources must never pick
/// these up or injected events would feed back into the input side.
pub const VIRTUAL_DEVICE_PREFIX: &str = "remapd";

/// Errors from the input side.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("cannot grab {0}: {1}")]
    Grab(String, std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A blocking-with-timeout source of raw events.
///
/// The injector thread polls with a short timeout and checks its stop flag
/// between polls, so a stop request unblocks within one timeout period.
pub trait EventSource: Send {
    /// Wait up to `timeout_ms` for events. An empty vector means timeout.
    fn poll(&mut self, timeout_ms: i32) -> Result<Vec<RawEvent>, InputError>;

    /// Release the underlying device. Also called on drop; must be
    /// idempotent.
    fn release(&mut self) {}
}

/// One discovered input device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub path: String,
}

/// All key-capable devices, for the `--list-devices` listing.
pub fn list_devices() -> Result<Vec<DeviceInfo>, InputError> {
    let mut infos = Vec::new();
    for (path, device) in evdev::enumerate() {
        let name = device.name().unwrap_or("Unknown");
        if is_virtual_device(name) {
            continue;
        }
        if !device.supported_events().contains(EventType::KEY) {
            continue;
        }
        infos.push(DeviceInfo {
            name: name.to_string(),
            path: path.to_string_lossy().to_string(),
        });
    }
    if infos.is_empty() {
        return Err(InputError::DeviceNotFound(
            "no input devices found".to_string(),
        ));
    }
    Ok(infos)
}

fn is_virtual_device(name: &str) -> bool {
    name.starts_with(VIRTUAL_DEVICE_PREFIX)
}

/// A grabbed set of evdev nodes belonging to one hardware device.
///
/// One piece of hardware can expose several event nodes (keyboard plus
/// media keys, for example), all reporting the same device name; they are
/// grabbed together and polled through a single poll set.
pub struct EvdevSource {
    devices: Vec<Device>,
    poll_fds: Vec<libc::pollfd>,
    grabbed: bool,
}

impl std::fmt::Debug for EvdevSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvdevSource")
            .field("devices", &self.devices.len())
            .field("poll_fds", &self.poll_fds.len())
            .field("grabbed", &self.grabbed)
            .finish()
    }
}

impl EvdevSource {
    /// Open and grab every node matching the device name or node path.
    pub fn open(device: &str) -> Result<Self, InputError> {
        let mut devices = Vec::new();
        for (path, dev) in evdev::enumerate() {
            let name = dev.name().unwrap_or("");
            if is_virtual_device(name) {
                continue;
            }
            if name == device || path.to_str() == Some(device) {
                devices.push((path, dev));
            }
        }

        if devices.is_empty() {
            return Err(InputError::DeviceNotFound(device.to_string()));
        }

        // a previous instance may have died without ungrabbing
        for (_, dev) in &mut devices {
            let _ = dev.ungrab();
        }
        for (path, dev) in &mut devices {
            dev.grab()
                .map_err(|e| InputError::Grab(path.display().to_string(), e))?;
            log::debug!("grabbed {}", path.display());
        }

        let devices: Vec<Device> = devices.into_iter().map(|(_, d)| d).collect();
        let poll_fds = devices
            .iter()
            .map(|d| libc::pollfd {
                fd: d.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        Ok(Self {
            devices,
            poll_fds,
            grabbed: true,
        })
    }

    fn convert(event: InputEvent) -> Option<RawEvent> {
        let kind = if event.event_type() == EventType::KEY {
            EventKind::Key
        } else if event.event_type() == EventType::RELATIVE {
            EventKind::Relative
        } else if event.event_type() == EventType::ABSOLUTE {
            EventKind::Absolute
        } else {
            // SYN, MSC and friends carry nothing we remap
            return None;
        };
        Some(RawEvent::new(kind, event.code(), event.value()))
    }
}

impl EventSource for EvdevSource {
    fn poll(&mut self, timeout_ms: i32) -> Result<Vec<RawEvent>, InputError> {
        let result = unsafe {
            libc::poll(
                self.poll_fds.as_mut_ptr(),
                self.poll_fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if result < 0 {
            let error = std::io::Error::last_os_error();
            // a delivered signal is not fatal, treat it like a timeout;
            // the session loop will notice its stop flag
            if error.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }
            return Err(InputError::Io(error));
        }
        if result == 0 {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for (i, device) in self.devices.iter_mut().enumerate() {
            if self.poll_fds[i].revents & libc::POLLIN == 0 {
                continue;
            }
            let fetched = device.fetch_events().map_err(InputError::Io)?;
            events.extend(fetched.filter_map(Self::convert));
        }
        Ok(events)
    }

    fn release(&mut self) {
        if self.grabbed {
            for device in &mut self.devices {
                let _ = device.ungrab();
            }
            self.grabbed = false;
        }
    }
}

/// The grab must come undone even on panic, or the physical device stays
/// dead to the rest of the system.
impl Drop for EvdevSource {
    fn drop(&mut self) {
        self.release();
    }
}
