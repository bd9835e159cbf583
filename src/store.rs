//! Tuning session persistence.
//!
//! One JSON document per piano: metadata plus a map of MIDI index to
//! committed measurement. The map is a BTreeMap so documents diff cleanly
//! and keys always serialize in keyboard order.

use crate::types::{NoteMeasurement, PianoMetadata};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Document schema version. Bump the minor for additive changes.
pub const SCHEMA_VERSION: &str = "1.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningSession {
    pub schema_version: String,
    pub piano: PianoMetadata,
    pub measurements: BTreeMap<u8, NoteMeasurement>,
}

impl TuningSession {
    pub fn new(piano: PianoMetadata) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            piano,
            measurements: BTreeMap::new(),
        }
    }

    /// Insert or replace the measurement for its MIDI index.
    pub fn insert(&mut self, measurement: NoteMeasurement) {
        self.measurements
            .insert(measurement.midi_index, measurement);
    }

    /// Load from a JSON file. Returns None if the file is absent,
    /// malformed, or from an incompatible schema generation.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Self>(&data) {
            Ok(session) => {
                if !session.schema_version.starts_with("1.") {
                    warn!(
                        "Session file {:?} has schema {} (expected {}); refusing to load",
                        path, session.schema_version, SCHEMA_VERSION
                    );
                    return None;
                }
                info!(
                    "Loaded session from {:?} ({} measurements)",
                    path,
                    session.measurements.len()
                );
                Some(session)
            }
            Err(e) => {
                warn!("Failed to parse session file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!(
            "Session saved to {:?} ({} measurements)",
            path,
            self.measurements.len()
        );
        Ok(())
    }
}
