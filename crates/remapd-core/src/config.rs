// Remapd Global Config
// Which presets load for which device, plus default macro settings

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::mapping::{Settings, SettingsSection};

/// One device -> preset binding from the autoload section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoloadEntry {
    /// Device name (or device node path for nested instance entries).
    pub device: String,
    /// Resolved path of the preset document.
    pub preset: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AutoloadValue {
    /// `"Device Name": "preset"`
    Preset(String),
    /// `"Device Name": { "instance": "preset" }` for telling apart several
    /// devices that report the same name.
    Instances(IndexMap<String, String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    autoload: IndexMap<String, AutoloadValue>,
    #[serde(default)]
    macros: Option<SettingsSection>,
}

/// The persisted global configuration. Lower-priority defaults layer for
/// preset settings, and the source of autoload entries.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    settings: Settings,
    autoload: Vec<AutoloadEntry>,
    config_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            autoload: Vec::new(),
            config_dir: Self::default_dir(),
        }
    }
}

impl GlobalConfig {
    /// `~/.config/remapd`
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("remapd")
    }

    /// `~/.config/remapd/config.json`
    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// Load the config document. A missing file is an empty config, not an
    /// error; anything else malformed is.
    pub fn load(path: &Path) -> Result<GlobalConfig> {
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_dir);

        if !path.exists() {
            log::debug!("config \"{}\" doesn't exist yet", path.display());
            return Ok(GlobalConfig {
                config_dir,
                ..GlobalConfig::default()
            });
        }

        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| Error::config_in(path, e))?;

        let mut settings = Settings::default();
        if let Some(ref section) = file.macros {
            section.merge_into(&mut settings)?;
        }

        let mut autoload = Vec::new();
        for (device, value) in &file.autoload {
            match value {
                AutoloadValue::Preset(preset) => autoload.push(AutoloadEntry {
                    device: device.clone(),
                    preset: resolve_preset(&config_dir, device, preset),
                }),
                AutoloadValue::Instances(instances) => {
                    for (instance, preset) in instances {
                        autoload.push(AutoloadEntry {
                            device: instance.clone(),
                            preset: resolve_preset(&config_dir, device, preset),
                        });
                    }
                }
            }
        }

        log::info!("loaded config from \"{}\"", path.display());
        Ok(GlobalConfig {
            settings,
            autoload,
            config_dir,
        })
    }

    /// Default settings layer that presets override field by field.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Autoload entries in document order.
    pub fn autoload_entries(&self) -> &[AutoloadEntry] {
        &self.autoload
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Preset values are either absolute paths or names living under
/// `<config dir>/presets/<device>/<name>.json`.
fn resolve_preset(config_dir: &Path, device: &str, preset: &str) -> PathBuf {
    let raw = Path::new(preset);
    if raw.is_absolute() {
        return raw.to_path_buf();
    }
    let file = if raw.extension().is_some() {
        preset.to_string()
    } else {
        format!("{}.json", preset)
    };
    config_dir.join("presets").join(device).join(file)
}
