//! Defines the subjects of collection: weather stations and municipalities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What an [`Entity`] identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A weather station, identified by its station code (e.g. "0076").
    Station,
    /// A municipality, identified by its five digit municipal code (e.g. "08019").
    Municipality,
}

impl EntityKind {
    /// Column holding the identifier in the reference list for this kind.
    pub(crate) fn default_id_column(&self) -> &'static str {
        match self {
            EntityKind::Station => "indicativo",
            EntityKind::Municipality => "CUMUN",
        }
    }

    /// Normalizes a raw identifier read from a reference list or a payload.
    ///
    /// Municipal codes lose their leading zeros in many exports, so they are
    /// left padded back to five digits.
    pub fn normalize_id(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self {
            EntityKind::Station => Some(trimmed.to_string()),
            EntityKind::Municipality => Some(format!("{trimmed:0>5}")),
        }
    }
}

/// An identifiable subject of collection.
///
/// Entities come from an external reference list and are never mutated by
/// the harvester.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier (station code or municipal code).
    pub entity_id: String,
    pub entity_kind: EntityKind,
}

impl Entity {
    pub fn station(id: impl Into<String>) -> Self {
        Self {
            entity_id: id.into(),
            entity_kind: EntityKind::Station,
        }
    }

    pub fn municipality(id: impl Into<String>) -> Self {
        Self {
            entity_id: id.into(),
            entity_kind: EntityKind::Municipality,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_municipal_codes_are_zero_padded() {
        assert_eq!(
            EntityKind::Municipality.normalize_id(" 8019 "),
            Some("08019".to_string())
        );
        assert_eq!(
            EntityKind::Municipality.normalize_id("41904"),
            Some("41904".to_string())
        );
        assert_eq!(EntityKind::Municipality.normalize_id("   "), None);
    }

    #[test]
    fn test_station_codes_are_kept_verbatim() {
        assert_eq!(
            EntityKind::Station.normalize_id("0076"),
            Some("0076".to_string())
        );
    }
}
