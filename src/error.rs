use crate::models::{ColumnType, EntityKind};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy of a run. `MalformedRecord` and `UnresolvedReference`
/// are counted and logged; `MissingSource` stops one entity type;
/// `SchemaViolation` stops the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed {entity} record #{index}: {reason}")]
    MalformedRecord {
        entity: EntityKind,
        index: u64,
        reason: String,
    },

    #[error("no readable source for {entity} at {}", .path.display())]
    MissingSource {
        entity: EntityKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "schema violation in {} at line {line}, column {column}: {value:?} is not a valid {expected}",
        .file.display()
    )]
    SchemaViolation {
        file: PathBuf,
        column: String,
        line: u64,
        value: String,
        expected: ColumnType,
    },

    #[error(
        "{entity} {id} references {target} {}, which is not loaded",
        .reference.map_or_else(|| "null".to_string(), |r| r.to_string())
    )]
    UnresolvedReference {
        entity: EntityKind,
        id: i64,
        target: EntityKind,
        reference: Option<i64>,
    },

    #[error("cannot render {chart}: {reason}")]
    Chart { chart: &'static str, reason: String },
}
