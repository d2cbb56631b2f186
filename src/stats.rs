use crate::models::EntityKind;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Counters collected for one entity type over a run
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    pub records_read: u64,
    pub malformed_skipped: u64,
    pub rows_written: u64,
    pub rows_loaded: u64,
    pub duplicates_dropped: u64,
    pub unresolved_dropped: u64,
    pub missing_source: bool,
}

impl EntityStats {
    pub fn inc_read(&mut self) {
        self.records_read += 1;
    }

    pub fn add_malformed(&mut self, count: u64) {
        self.malformed_skipped += count;
    }

    pub fn inc_written(&mut self) {
        self.rows_written += 1;
    }

    pub fn add_duplicates(&mut self, count: u64) {
        self.duplicates_dropped += count;
    }

    pub fn add_unresolved(&mut self, count: u64) {
        self.unresolved_dropped += count;
    }

    pub fn set_loaded(&mut self, count: u64) {
        self.rows_loaded = count;
    }

    pub fn mark_missing(&mut self) {
        self.missing_source = true;
    }

    /// Anything dropped or skipped for this entity type
    pub fn has_losses(&self) -> bool {
        self.missing_source
            || self.malformed_skipped > 0
            || self.duplicates_dropped > 0
            || self.unresolved_dropped > 0
    }
}

/// Per-entity counters for a whole run, printed before any analysis output.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunReport {
    entities: BTreeMap<EntityKind, EntityStats>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, kind: EntityKind) -> EntityStats {
        self.entities.get(&kind).cloned().unwrap_or_default()
    }

    pub fn entity_mut(&mut self, kind: EntityKind) -> &mut EntityStats {
        self.entities.entry(kind).or_default()
    }

    pub fn log(&self) {
        for (kind, stats) in &self.entities {
            if stats.has_losses() {
                warn!(
                    entity = %kind,
                    missing = stats.missing_source,
                    malformed = stats.malformed_skipped,
                    duplicates = stats.duplicates_dropped,
                    unresolved = stats.unresolved_dropped,
                    "Records dropped"
                );
            } else {
                info!(entity = %kind, loaded = stats.rows_loaded, "No records dropped");
            }
        }
    }

    pub fn print_summary(&self) {
        println!();
        println!("=== Summary ===");
        println!(
            "{:<12} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10}  source",
            "entity", "read", "malformed", "written", "loaded", "dupes", "unresolved"
        );
        for kind in EntityKind::ALL {
            let s = self.entity(kind);
            println!(
                "{:<12} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10}  {}",
                kind.to_string(),
                s.records_read,
                s.malformed_skipped,
                s.rows_written,
                s.rows_loaded,
                s.duplicates_dropped,
                s.unresolved_dropped,
                if s.missing_source { "missing" } else { "ok" }
            );
        }
    }
}
