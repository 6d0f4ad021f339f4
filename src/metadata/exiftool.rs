// ExifTool-backed metadata store
//
// Reads with `-j -G -n` (grouped tags, numeric values) and writes every tag of
// a merge plan in a single `-overwrite_original` invocation, so a file gets
// its whole plan or none of it.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::error::{Result, SyncError};
use crate::fingerprint::MediaKind;
use crate::tools::{exiftool_path, is_exiftool_available, run_with_timeout};
use super::{Fields, GpsCoordinates, MetadataStore};

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

pub struct ExifToolStore {
    binary: PathBuf,
    timeout: Duration,
}

impl ExifToolStore {
    /// Fails with `ToolUnavailable` when exiftool cannot be run at all.
    pub fn new(timeout: Duration) -> Result<Self> {
        if !is_exiftool_available() {
            return Err(SyncError::ToolUnavailable(format!(
                "exiftool not found (looked for {})",
                exiftool_path().display()
            )));
        }
        Ok(Self { binary: exiftool_path(), timeout })
    }

    fn run(&self, path: &Path, args: &[String]) -> Result<std::process::Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).arg(path);
        run_with_timeout(cmd, self.timeout)?.ok_or_else(|| SyncError::ToolTimeout {
            path: path.to_path_buf(),
            secs: self.timeout.as_secs(),
        })
    }
}

impl MetadataStore for ExifToolStore {
    fn read(&self, path: &Path) -> Result<Fields> {
        let args = ["-j", "-G", "-n"].map(String::from);
        let output = self.run(path, &args)?;

        if !output.status.success() {
            return Err(SyncError::UnreadableFile {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw_array: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| SyncError::ExifTool(format!("Failed to parse exiftool JSON: {}", e)))?;

        // exiftool returns an array; take the first element
        let dump = raw_array
            .as_array()
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        Ok(parse_fields(&dump))
    }

    fn write(&self, path: &Path, fields: &Fields) -> Result<()> {
        let args = write_args(fields, MediaKind::from_path(path));
        if args.is_empty() {
            return Ok(());
        }

        let output = self.run(path, &args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SyncError::WriteRejected {
                path: path.to_path_buf(),
                reason: if stderr.is_empty() {
                    format!("exiftool exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        log::debug!("Wrote {} tag(s) to {}", args.len() - 1, path.display());
        Ok(())
    }
}

/// Parse the fields we reconcile from a `-G -n` dump.
fn parse_fields(dump: &serde_json::Value) -> Fields {
    // Date: prefer the capture date over container dates
    let date = get_grouped_string(dump, "DateTimeOriginal")
        .or_else(|| get_grouped_string(dump, "CreateDate"))
        .or_else(|| get_grouped_string(dump, "MediaCreateDate"));
    let offset = get_grouped_string(dump, "OffsetTimeOriginal");
    let captured_at = date.and_then(|d| parse_exif_date(&d, offset.as_deref()));

    // With -n, GPS values are signed decimals
    let gps = match (
        get_grouped_number(dump, "GPSLatitude"),
        get_grouped_number(dump, "GPSLongitude"),
    ) {
        (Some(latitude), Some(longitude)) => Some(GpsCoordinates { latitude, longitude }),
        _ => None,
    };

    let title = get_tag(dump, "XMP:Title").or_else(|| get_grouped_string(dump, "Title"));
    let description = get_grouped_string(dump, "ImageDescription")
        .or_else(|| get_grouped_string(dump, "Description"));

    Fields { captured_at, gps, title, description }
}

/// Arguments for one write invocation, file path excluded. Empty when nothing is set.
fn write_args(fields: &Fields, kind: MediaKind) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(captured_at) = fields.captured_at {
        let date_str = captured_at.format(EXIF_DATE_FORMAT).to_string();
        args.push(format!("-DateTimeOriginal={}", date_str));
        args.push(format!("-CreateDate={}", date_str));
        args.push(format!("-ModifyDate={}", date_str));
        args.push("-OffsetTimeOriginal=+00:00".to_string());
        if kind == MediaKind::Video {
            args.push(format!("-QuickTime:CreateDate={}", date_str));
            args.push(format!("-QuickTime:MediaCreateDate={}", date_str));
            args.push(format!("-QuickTime:TrackCreateDate={}", date_str));
        }
    }

    if let Some(gps) = fields.gps {
        args.push(format!("-GPSLatitude={}", gps.latitude.abs()));
        args.push(format!("-GPSLatitudeRef={}", if gps.latitude >= 0.0 { "N" } else { "S" }));
        args.push(format!("-GPSLongitude={}", gps.longitude.abs()));
        args.push(format!("-GPSLongitudeRef={}", if gps.longitude >= 0.0 { "E" } else { "W" }));
    }

    if let Some(title) = &fields.title {
        args.push(format!("-XMP:Title={}", title));
    }

    if let Some(description) = &fields.description {
        args.push(format!("-ImageDescription={}", description));
        args.push(format!("-XMP:Description={}", description));
    }

    if !args.is_empty() {
        args.insert(0, "-overwrite_original".to_string());
    }
    args
}

fn get_tag(dump: &serde_json::Value, key: &str) -> Option<String> {
    dump.as_object()?.get(key).and_then(value_to_string)
}

/// Get a string value from a grouped exiftool dump.
/// With -G flag, keys are "Group:TagName". We search for any group containing the tag.
fn get_grouped_string(dump: &serde_json::Value, tag: &str) -> Option<String> {
    let obj = dump.as_object()?;
    // Prefer EXIF group, then any group
    if let Some(val) = obj.get(&format!("EXIF:{}", tag)).and_then(value_to_string) {
        return Some(val);
    }
    let suffix = format!(":{}", tag);
    obj.iter()
        .filter(|(key, _)| key.ends_with(&suffix) || key.as_str() == tag)
        .find_map(|(_, val)| value_to_string(val))
}

/// Get a numeric value from a grouped exiftool dump.
fn get_grouped_number(dump: &serde_json::Value, tag: &str) -> Option<f64> {
    let obj = dump.as_object()?;
    if let Some(val) = obj.get(&format!("EXIF:{}", tag)).and_then(|v| v.as_f64()) {
        return Some(val);
    }
    let suffix = format!(":{}", tag);
    obj.iter()
        .filter(|(key, _)| key.ends_with(&suffix) || key.as_str() == tag)
        .find_map(|(_, val)| val.as_f64())
}

/// Convert a JSON value to string (handles both string and numeric values).
fn value_to_string(val: &serde_json::Value) -> Option<String> {
    match val {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse "YYYY:MM:DD HH:MM:SS[.sss][±HH:MM|Z]". Without an inline or separate
/// offset the value is taken as UTC. Zeroed placeholder dates yield `None`.
fn parse_exif_date(date_str: &str, offset_tag: Option<&str>) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(date_str.get(..19)?, EXIF_DATE_FORMAT).ok()?;

    // Skip fractional seconds, keep any inline zone
    let rest = date_str[19..].trim_start_matches(|c: char| c == '.' || c.is_ascii_digit());
    let offset = match rest.trim() {
        "" => offset_tag.and_then(parse_offset),
        "Z" => Some(FixedOffset::east_opt(0)?),
        inline => parse_offset(inline),
    };

    match offset {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc)),
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}

/// "+02:00" / "-0530" style offsets.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let sign = match raw.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits: String = raw[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
