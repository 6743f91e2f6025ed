//! Capture-Geräte (Kamera)
//!
//! Die eigentliche Aufnahme ist Sache der Plattform. Die Facade spricht nur
//! mit einem [`CaptureBackend`]; mitgeliefert wird ein virtuelles Backend,
//! dessen Geräteliste aus der Konfiguration kommt.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No capture device matches {0:?}")]
    NoMatchingDevice(DeviceSelector),

    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("Unsupported capture mode: {0}")]
    UnsupportedMode(String),

    #[error("Capture device busy, {0} is already in use")]
    DeviceBusy(String),

    #[error("Media engine is shut down")]
    EngineClosed,
}

// ============================================================================
// DEVICES
// ============================================================================

/// Ausrichtung einer Kamera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
    External,
}

/// Ein Capture-Gerät
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDevice {
    pub id: String,
    pub name: String,
    pub facing: Facing,
}

impl CaptureDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, facing: Facing) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            facing,
        }
    }
}

/// Auswahl eines Geräts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    #[serde(rename = "front")]
    FrontFacing,
    #[serde(rename = "back")]
    BackFacing,
    #[serde(rename = "first")]
    First,
    #[serde(rename = "id")]
    Id(String),
}

impl DeviceSelector {
    /// Wählt das erste passende Gerät
    pub fn select<'a>(&self, devices: &'a [CaptureDevice]) -> Option<&'a CaptureDevice> {
        devices.iter().find(|d| match self {
            DeviceSelector::FrontFacing => d.facing == Facing::Front,
            DeviceSelector::BackFacing => d.facing == Facing::Back,
            DeviceSelector::First => true,
            DeviceSelector::Id(id) => &d.id == id,
        })
    }
}

/// Auflösung und Bildrate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureMode {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    fn validate(&self) -> Result<(), DeviceError> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(DeviceError::UnsupportedMode(format!(
                "{}x{}@{}",
                self.width, self.height, self.fps
            )));
        }
        Ok(())
    }
}

// ============================================================================
// CAPTURE BACKEND
// ============================================================================

/// Schnittstelle zur Kamera der Plattform
pub trait CaptureBackend: Send + Sync {
    fn devices(&self) -> Vec<CaptureDevice>;

    /// Öffnet das Gerät. Schlägt fehl, wenn die Berechtigung fehlt.
    fn open(&self, device: &CaptureDevice, mode: CaptureMode) -> Result<(), DeviceError>;

    fn close(&self, device: &CaptureDevice);
}

/// Capture-Backend ohne echte Hardware
#[derive(Debug)]
pub struct VirtualCapture {
    devices: Vec<CaptureDevice>,
    permission_granted: bool,
    open: Mutex<Vec<String>>,
}

impl VirtualCapture {
    pub fn new(devices: Vec<CaptureDevice>, permission_granted: bool) -> Self {
        Self {
            devices,
            permission_granted,
            open: Mutex::new(Vec::new()),
        }
    }

    /// IDs der aktuell geöffneten Geräte
    pub fn open_devices(&self) -> Vec<String> {
        self.open.lock().clone()
    }
}

impl CaptureBackend for VirtualCapture {
    fn devices(&self) -> Vec<CaptureDevice> {
        self.devices.clone()
    }

    fn open(&self, device: &CaptureDevice, mode: CaptureMode) -> Result<(), DeviceError> {
        if !self.permission_granted {
            return Err(DeviceError::PermissionDenied);
        }
        mode.validate()?;

        tracing::info!(
            "Opening capture device {} ({}x{}@{})",
            device.name,
            mode.width,
            mode.height,
            mode.fps
        );
        self.open.lock().push(device.id.clone());
        Ok(())
    }

    fn close(&self, device: &CaptureDevice) {
        tracing::info!("Closing capture device {}", device.name);
        self.open.lock().retain(|id| id != &device.id);
    }
}

// ============================================================================
// TESTS
// ============================================================================
