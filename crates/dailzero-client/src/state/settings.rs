//! Persistent settings storage
//!
//! Saves connection and device preferences to a local JSON file. Missing
//! fields fall back to defaults so older settings files keep loading.

use dailzero_protocol::{DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_backend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_realtime_url() -> String {
    DEFAULT_REALTIME_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_REALTIME_MODEL.to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

/// Persistent user settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the DailZero backend
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// SDP exchange endpoint of the realtime provider
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    /// Realtime model to request
    #[serde(default = "default_model")]
    pub model: String,
    /// Tenant whose stored agent configuration the backend applies
    #[serde(default)]
    pub business_id: Option<String>,
    /// Selected audio input device name
    #[serde(default)]
    pub input_device: Option<String>,
    /// Selected audio output device name
    #[serde(default)]
    pub output_device: Option<String>,
    /// ICE server URLs for the peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            realtime_url: default_realtime_url(),
            model: default_model(),
            business_id: None,
            input_device: None,
            output_device: None,
            ice_servers: default_ice_servers(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dailzero").join("settings.json"))
    }

    /// Load settings from disk
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            tracing::warn!("Could not determine config directory");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Settings file does not exist, using defaults");
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    tracing::info!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::error!("Failed to parse settings file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read settings file: {}", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else {
            tracing::warn!("Could not determine config directory");
            return;
        };
        self.write_to(&path);
    }

    fn write_to(&self, path: &Path) {
        // Create directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!("Failed to create config directory: {}", e);
                return;
            }
        }

        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::error!("Failed to write settings file: {}", e);
                } else {
                    tracing::debug!("Saved settings to {:?}", path);
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize settings: {}", e);
            }
        }
    }

    /// Environment variables win over the settings file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DAILZERO_BACKEND_URL") {
            if !url.is_empty() {
                self.backend_url = url;
            }
        }
        if let Ok(model) = std::env::var("DAILZERO_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
        if let Ok(id) = std::env::var("DAILZERO_BUSINESS_ID") {
            if !id.is_empty() {
                self.business_id = Some(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.backend_url, "http://localhost:3000");
        assert_eq!(settings.model, DEFAULT_REALTIME_MODEL);
        assert_eq!(settings.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert!(settings.business_id.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"backend_url": "https://calls.example.com"}"#).unwrap();
        assert_eq!(settings.backend_url, "https://calls.example.com");
        assert_eq!(settings.realtime_url, DEFAULT_REALTIME_URL);
    }

    #[test]
    fn written_file_loads_back() {
        let path = std::env::temp_dir().join(format!(
            "dailzero-settings-test-{}.json",
            std::process::id()
        ));

        let settings = Settings {
            business_id: Some("biz_42".to_string()),
            ..Settings::default()
        };
        settings.write_to(&path);

        let contents = std::fs::read_to_string(&path).unwrap();
        let restored: Settings = serde_json::from_str(&contents).unwrap();
        assert_eq!(restored.business_id.as_deref(), Some("biz_42"));
        assert_eq!(restored.model, DEFAULT_REALTIME_MODEL);

        let _ = std::fs::remove_file(&path);
    }
}
