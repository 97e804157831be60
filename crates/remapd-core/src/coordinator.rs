// Remapd Coordinator
// Single source of truth for which devices are being remapped

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::{AutoloadEntry, GlobalConfig};
use crate::error::{Error, Result};
use crate::injector::InjectorSession;
use crate::input::{EventSource, EvdevSource, VIRTUAL_DEVICE_PREFIX};
use crate::key::KeyNameTable;
use crate::mapping::Mapping;
use crate::output::{EventSink, UinputSink};

type Registry = HashMap<String, InjectorSession>;

/// Owns the set of active injector sessions, at most one per device.
///
/// Every lifecycle operation runs under the registry lock, so concurrent
/// callers cannot race on the same device entry. The coordinator has no
/// knowledge of any user session; it does what it is told with the paths
/// it is given and keeps doing it afterwards.
pub struct Coordinator {
    keys: Arc<KeyNameTable>,
    config_path: PathBuf,
    config: Mutex<GlobalConfig>,
    injectors: Mutex<Registry>,
}

impl Coordinator {
    pub fn new(keys: Arc<KeyNameTable>, config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(GlobalConfig::default_path);
        let config = GlobalConfig::load(&config_path).unwrap_or_else(|error| {
            log::error!("failed to load config: {}", error);
            GlobalConfig::default()
        });
        log::debug!("creating coordinator");
        Self {
            keys,
            config_path,
            config: Mutex::new(config),
            injectors: Mutex::new(Registry::new()),
        }
    }

    /// Start injecting the preset for a device. An existing session for the
    /// same device is stopped first, so restarting is always safe.
    ///
    /// Fails with `Error::Config` if the preset cannot be parsed and with
    /// `Error::Device` if the device cannot be opened or grabbed; no
    /// partial session stays registered either way.
    pub fn start(&self, device: &str, preset: &Path, aux: Option<&Path>) -> Result<()> {
        let mut injectors = self.injectors.lock();
        if let Some(existing) = injectors.remove(device) {
            existing.stop();
        }

        // the config may have been edited since the last start
        self.reload_config();

        let table = self.session_table(aux);
        let defaults = *self.config.lock().settings();
        let mapping = Mapping::load(preset, &defaults, &table)?;
        if mapping.is_empty() {
            log::warn!("preset \"{}\" contains no usable mappings", preset.display());
        }

        let source = EvdevSource::open(device).map_err(|e| Error::Device(e.to_string()))?;
        let sink = UinputSink::new(&format!("{} {}", VIRTUAL_DEVICE_PREFIX, device))
            .map_err(|e| Error::Device(e.to_string()))?;

        let session = InjectorSession::spawn(
            device.to_string(),
            mapping,
            Box::new(source),
            Arc::new(sink),
        );
        injectors.insert(device.to_string(), session);
        Ok(())
    }

    /// Like `start`, but over caller-provided IO. This is the seam used by
    /// tests and by transports that bring their own devices.
    pub fn start_with_io(
        &self,
        device: &str,
        mapping: Mapping,
        source: Box<dyn EventSource>,
        sink: Arc<dyn EventSink>,
    ) {
        let mut injectors = self.injectors.lock();
        if let Some(existing) = injectors.remove(device) {
            existing.stop();
        }
        let session = InjectorSession::spawn(device.to_string(), mapping, source, sink);
        injectors.insert(device.to_string(), session);
    }

    /// Stop injecting for one device. Succeeds as a no-op when no session
    /// exists.
    pub fn stop(&self, device: &str) -> Result<()> {
        let mut injectors = self.injectors.lock();
        match injectors.remove(device) {
            Some(session) => session.stop(),
            None => log::debug!("no injection running for device \"{}\"", device),
        }
        Ok(())
    }

    /// Stop every registered session; used on process shutdown.
    pub fn stop_all(&self) {
        log::info!("stopping all injections");
        let sessions: Vec<InjectorSession> = {
            let mut injectors = self.injectors.lock();
            injectors.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            session.stop();
        }
    }

    /// Is this device being mapped?
    pub fn is_injecting(&self, device: &str) -> bool {
        self.injectors
            .lock()
            .get(device)
            .map(InjectorSession::is_active)
            .unwrap_or(false)
    }

    /// Devices with a registered session.
    pub fn active_devices(&self) -> Vec<String> {
        self.injectors.lock().keys().cloned().collect()
    }

    /// Stop everything, then start one session per entry. A later entry for
    /// the same device overrides an earlier one; a failing entry is logged
    /// and does not keep the remaining entries from loading.
    pub fn autoload_entries(&self, entries: &[AutoloadEntry]) {
        self.stop_all();
        for entry in dedupe_last_wins(entries) {
            if let Err(error) = self.start(&entry.device, &entry.preset, None) {
                log::error!("autoload for \"{}\" failed: {}", entry.device, error);
            }
        }
    }

    /// Autoload from the `autoload` section of the global config.
    pub fn autoload(&self) {
        self.reload_config();
        let entries = self.config.lock().autoload_entries().to_vec();
        if entries.is_empty() {
            log::info!("nothing configured for autoload");
        }
        self.autoload_entries(&entries);
    }

    /// Liveness probe: echoes the payload unchanged.
    pub fn hello(&self, payload: &str) -> String {
        log::info!("received \"{}\" from client", payload);
        payload.to_string()
    }

    fn reload_config(&self) {
        match GlobalConfig::load(&self.config_path) {
            Ok(config) => *self.config.lock() = config,
            Err(error) => {
                // keep the previous defaults, a broken edit must not take
                // running sessions down
                log::error!("failed to reload config: {}", error);
            }
        }
    }

    /// The key name table for one session, extended by the aux layout dump
    /// when one is provided and readable.
    fn session_table(&self, aux: Option<&Path>) -> Arc<KeyNameTable> {
        let Some(path) = aux else {
            return self.keys.clone();
        };
        match self.keys.with_overrides(path) {
            Ok(table) => Arc::new(table),
            Err(error) => {
                log::error!("could not use \"{}\": {}", path.display(), error);
                self.keys.clone()
            }
        }
    }
}

/// Collapse autoload entries so the last entry per device wins, preserving
/// the order of first appearance.
fn dedupe_last_wins(entries: &[AutoloadEntry]) -> Vec<AutoloadEntry> {
    let mut wanted: IndexMap<String, PathBuf> = IndexMap::new();
    for entry in entries {
        wanted.insert(entry.device.clone(), entry.preset.clone());
    }
    wanted
        .into_iter()
        .map(|(device, preset)| AutoloadEntry { device, preset })
        .collect()
}
