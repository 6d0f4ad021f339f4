// Per-field merge decisions for one matched pair
//
// Field policy:
// - capture time: sidecar, else source embedded value; always wins over the target
// - GPS: only a complete sidecar coordinate pair is written; overwrites the target
// - title: sidecar caption fills an empty target title; an existing one is kept
// - anything else present on both sides and differing is a conflict

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::{Fields, GpsCoordinates};
use crate::sidecar::SidecarMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Nothing to write from the source side.
    NoSourceValue,
    /// Target already holds the value.
    AlreadyEqual,
    /// Target value outranks the source for this field.
    TargetPreserved,
    /// Sidecar has only one of latitude/longitude.
    IncompleteCoordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "camelCase")]
pub enum FieldDecision<T> {
    Write(T),
    Skip(SkipReason),
    Conflict { source: T, target: T },
}

impl<T> FieldDecision<T> {
    pub fn write_value(&self) -> Option<&T> {
        match self {
            FieldDecision::Write(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, FieldDecision::Write(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FieldDecision::Conflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    pub captured_at: FieldDecision<DateTime<Utc>>,
    pub gps: FieldDecision<GpsCoordinates>,
    pub title: FieldDecision<String>,
    pub description: FieldDecision<String>,
}

impl MergePlan {
    /// The fields to hand to the store. Empty when nothing is to be written.
    pub fn writes(&self) -> Fields {
        Fields {
            captured_at: self.captured_at.write_value().copied(),
            gps: self.gps.write_value().copied(),
            title: self.title.write_value().cloned(),
            description: self.description.write_value().cloned(),
        }
    }

    pub fn has_writes(&self) -> bool {
        !self.writes().is_empty()
    }

    /// Names of conflicting fields, for review.
    pub fn conflicts(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.captured_at.is_conflict() {
            names.push("capturedAt");
        }
        if self.gps.is_conflict() {
            names.push("gps");
        }
        if self.title.is_conflict() {
            names.push("title");
        }
        if self.description.is_conflict() {
            names.push("description");
        }
        names
    }
}

/// Stateless; resolution has no side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataResolver;

impl MetadataResolver {
    pub fn resolve(
        &self,
        sidecar: Option<&SidecarMetadata>,
        source_embedded: &Fields,
        target_embedded: &Fields,
    ) -> MergePlan {
        MergePlan {
            captured_at: resolve_captured_at(sidecar, source_embedded, target_embedded),
            gps: resolve_gps(sidecar, target_embedded),
            title: resolve_title(sidecar, target_embedded),
            description: resolve_generic(
                non_empty(source_embedded.description.as_deref()),
                non_empty(target_embedded.description.as_deref()),
            ),
        }
    }
}

fn resolve_captured_at(
    sidecar: Option<&SidecarMetadata>,
    source_embedded: &Fields,
    target_embedded: &Fields,
) -> FieldDecision<DateTime<Utc>> {
    let value = match sidecar.and_then(|s| s.captured_at).or(source_embedded.captured_at) {
        Some(value) => value,
        None => return FieldDecision::Skip(SkipReason::NoSourceValue),
    };
    // EXIF dates carry whole seconds only
    match target_embedded.captured_at {
        Some(current) if current.timestamp() == value.timestamp() => FieldDecision::Skip(SkipReason::AlreadyEqual),
        _ => FieldDecision::Write(value),
    }
}

fn resolve_gps(sidecar: Option<&SidecarMetadata>, target_embedded: &Fields) -> FieldDecision<GpsCoordinates> {
    let sidecar = match sidecar {
        Some(sidecar) => sidecar,
        None => return FieldDecision::Skip(SkipReason::NoSourceValue),
    };
    let value = match (sidecar.gps(), sidecar.latitude.is_some() || sidecar.longitude.is_some()) {
        (Some(value), _) => value,
        (None, true) => return FieldDecision::Skip(SkipReason::IncompleteCoordinates),
        (None, false) => return FieldDecision::Skip(SkipReason::NoSourceValue),
    };
    match target_embedded.gps {
        Some(current) if current.approx_eq(&value) => FieldDecision::Skip(SkipReason::AlreadyEqual),
        _ => FieldDecision::Write(value),
    }
}

fn resolve_title(sidecar: Option<&SidecarMetadata>, target_embedded: &Fields) -> FieldDecision<String> {
    let value = match sidecar.and_then(|s| non_empty(s.title.as_deref())) {
        Some(value) => value,
        None => return FieldDecision::Skip(SkipReason::NoSourceValue),
    };
    match non_empty(target_embedded.title.as_deref()) {
        Some(current) if current == value => FieldDecision::Skip(SkipReason::AlreadyEqual),
        Some(_) => FieldDecision::Skip(SkipReason::TargetPreserved),
        None => FieldDecision::Write(value.to_string()),
    }
}

fn resolve_generic(source: Option<&str>, target: Option<&str>) -> FieldDecision<String> {
    match (source, target) {
        (None, _) => FieldDecision::Skip(SkipReason::NoSourceValue),
        (Some(s), None) => FieldDecision::Write(s.to_string()),
        (Some(s), Some(t)) if s == t => FieldDecision::Skip(SkipReason::AlreadyEqual),
        (Some(s), Some(t)) => FieldDecision::Conflict {
            source: s.to_string(),
            target: t.to_string(),
        },
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
