//! Engine-Konfiguration
//!
//! Wird aus `engine.json` im Konfigurationsverzeichnis der App geladen:
//! - Windows: `%APPDATA%/bpst/wein/config/engine.json`
//! - macOS: `~/Library/Application Support/com.bpst.wein/engine.json`
//! - Linux: `~/.config/wein/engine.json`
//!
//! Fehlt die Datei, gelten die Defaults. `WEIN_ENGINE_BACKEND` überschreibt
//! das Backend (`rtc` oder `simulated`).

use crate::media_engine::{CaptureDevice, DeviceSelector, Facing};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown engine backend: {0}")]
    UnknownBackend(String),
}

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// STUN/TURN Server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: username.into(),
            credential: credential.into(),
        }
    }
}

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        ..Default::default()
    }]
}

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Welche Media-Engine hinter der Facade steckt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// webrtc-rs
    #[default]
    Rtc,
    /// In-Process Engine ohne Netzwerk (Tests, Loopback-Demo)
    Simulated,
}

impl std::str::FromStr for EngineBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rtc" | "webrtc" => Ok(EngineBackend::Rtc),
            "simulated" | "sim" => Ok(EngineBackend::Simulated),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Kamera-Einstellungen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: DeviceSelector,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Geräte des virtuellen Capture-Backends
    pub devices: Vec<CaptureDevice>,
    pub permission_granted: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::FrontFacing,
            width: 640,
            height: 480,
            fps: 30,
            devices: vec![
                CaptureDevice::new("camera-front", "Front Camera", Facing::Front),
                CaptureDevice::new("camera-back", "Back Camera", Facing::Back),
            ],
            permission_granted: true,
        }
    }
}

/// Gesamtkonfiguration der Media-Engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: EngineBackend,
    pub ice_servers: Vec<IceServer>,
    pub capture: CaptureConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            ice_servers: default_ice_servers(),
            capture: CaptureConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Konfiguration für die In-Process Engine ohne STUN
    pub fn simulated() -> Self {
        Self {
            backend: EngineBackend::Simulated,
            ice_servers: Vec::new(),
            ..Default::default()
        }
    }

    /// Lädt die Konfiguration aus dem App-Verzeichnis oder nimmt die Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::get_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading engine config from {:?}", path);
                Self::from_file(&path)?
            }
            _ => {
                tracing::debug!("No engine config found, using defaults");
                Self::default()
            }
        };

        if let Ok(backend) = std::env::var("WEIN_ENGINE_BACKEND") {
            config.backend = backend.parse()?;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Setzt optionale TURN-Server Credentials
    pub fn add_turn_server(&mut self, url: String, username: String, credential: String) {
        self.ice_servers
            .push(IceServer::turn(url, username, credential));
    }

    /// Ermittelt den Pfad zur Konfigurationsdatei
    fn get_config_path() -> Option<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("com", "bpst", "wein")?;
        let mut path = proj_dirs.config_dir().to_path_buf();
        path.push("engine.json");
        Some(path)
    }
}

// ============================================================================
// TESTS
// ============================================================================
