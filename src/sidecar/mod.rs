// Sidecar JSON parsing (Google-Takeout style metadata files)

pub mod discover;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::metadata::GpsCoordinates;

pub use discover::{list_sidecars, scan_source, SourceAsset, SourceScan};

/// Metadata parsed from one sidecar. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarMetadata {
    /// Name the asset had before the exporter renamed it.
    pub original_filename: String,
    /// Absent means unknown; never defaulted.
    pub captured_at: Option<DateTime<Utc>>,
    /// User caption.
    pub title: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSidecar {
    title: Option<String>,
    description: Option<String>,
    photo_taken_time: Option<RawTimestamp>,
    creation_time: Option<RawTimestamp>,
    geo_data: Option<RawGeo>,
    geo_data_exif: Option<RawGeo>,
}

#[derive(Debug, Deserialize)]
struct RawTimestamp {
    timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawGeo {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl SidecarMetadata {
    /// Parse raw sidecar JSON. Fails with `MalformedSidecar` on invalid JSON
    /// or when the original file name is missing.
    pub fn parse(raw: &str, creation_time_fallback: bool) -> Result<Self> {
        let sidecar: RawSidecar = serde_json::from_str(raw)
            .map_err(|e| SyncError::MalformedSidecar(e.to_string()))?;

        let original_filename = sidecar
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::MalformedSidecar("missing title (original file name)".to_string()))?
            .to_string();

        let mut captured_at = sidecar.photo_taken_time.as_ref().and_then(parse_timestamp);
        if captured_at.is_none() && creation_time_fallback {
            captured_at = sidecar.creation_time.as_ref().and_then(parse_timestamp);
        }

        // geoData wins; geoDataExif only fills in when geoData carries nothing
        let (mut latitude, mut longitude) = sidecar.geo_data.as_ref().map(parse_geo).unwrap_or((None, None));
        if latitude.is_none() && longitude.is_none() {
            (latitude, longitude) = sidecar.geo_data_exif.as_ref().map(parse_geo).unwrap_or((None, None));
        }

        let title = sidecar
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(Self { original_filename, captured_at, title, latitude, longitude })
    }

    /// Both coordinates, or nothing.
    pub fn gps(&self) -> Option<GpsCoordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GpsCoordinates { latitude, longitude }),
            _ => None,
        }
    }
}

/// Epoch seconds, encoded as a string or a number.
fn parse_timestamp(raw: &RawTimestamp) -> Option<DateTime<Utc>> {
    let secs = match raw.timestamp.as_ref()? {
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        serde_json::Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_opt(secs, 0).single()
}

/// Exporters write 0.0 for "no location", so exact zero counts as absent.
fn parse_geo(raw: &RawGeo) -> (Option<f64>, Option<f64>) {
    let latitude = raw.latitude.filter(|v| *v != 0.0 && (-90.0..=90.0).contains(v));
    let longitude = raw.longitude.filter(|v| *v != 0.0 && (-180.0..=180.0).contains(v));
    (latitude, longitude)
}
