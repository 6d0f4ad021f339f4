// Embedded metadata: the typed field set and the store that reads/writes it

pub mod exiftool;

use std::path::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::GPS_EPSILON_DEGREES;
use crate::error::Result;

pub use exiftool::ExifToolStore;

/// Decimal degrees, both-or-neither.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinates {
    /// Equal within what survives a round trip through EXIF rationals.
    pub fn approx_eq(&self, other: &GpsCoordinates) -> bool {
        (self.latitude - other.latitude).abs() <= GPS_EPSILON_DEGREES
            && (self.longitude - other.longitude).abs() <= GPS_EPSILON_DEGREES
    }
}

/// Metadata fields the engine reads and writes. `None` means absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fields {
    pub captured_at: Option<DateTime<Utc>>,
    pub gps: Option<GpsCoordinates>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl Fields {
    pub fn is_empty(&self) -> bool {
        self.captured_at.is_none() && self.gps.is_none() && self.title.is_none() && self.description.is_none()
    }
}

/// The sole boundary to format-specific metadata encoding.
pub trait MetadataStore: Send + Sync {
    /// Current embedded fields. Fails with `UnreadableFile`.
    fn read(&self, path: &Path) -> Result<Fields>;

    /// Write every present field in one step; absent fields are left untouched.
    /// Fails with `WriteRejected`.
    fn write(&self, path: &Path, fields: &Fields) -> Result<()>;
}
