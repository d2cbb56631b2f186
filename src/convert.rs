use crate::config::CSV_BUFFER_SIZE;
use crate::context::AnalysisContext;
use crate::error::PipelineError;
use crate::models::{Comment, Entity, EntityKind, Post, PostHistory, User};
use crate::parser::{RawRecord, Source};
use crate::stats::EntityStats;
use anyhow::{Context, Result};
use csv::Writer;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Converts every entity type found in the dump directory into a CSV table.
/// A missing source stops only its own entity type.
pub fn convert_all(ctx: &mut AnalysisContext) -> Result<()> {
    let input_dir = ctx.config.input_dir.clone();
    let tables_dir = ctx.config.tables_dir.clone();

    fs::create_dir_all(&tables_dir).with_context(|| {
        format!(
            "Failed to create tables directory: {}",
            tables_dir.display()
        )
    })?;

    for kind in EntityKind::ALL {
        let result = {
            let stats = ctx.report.entity_mut(kind);
            match kind {
                EntityKind::Post => convert_entity::<Post>(&input_dir, &tables_dir, stats),
                EntityKind::Comment => convert_entity::<Comment>(&input_dir, &tables_dir, stats),
                EntityKind::User => convert_entity::<User>(&input_dir, &tables_dir, stats),
                EntityKind::PostHistory => {
                    convert_entity::<PostHistory>(&input_dir, &tables_dir, stats)
                }
            }
        };

        if let Err(e) = result {
            match e.downcast_ref::<PipelineError>() {
                Some(PipelineError::MissingSource { .. }) => {
                    warn!(entity = %kind, error = %e, "Skipping entity type");
                    remove_stale_table(&tables_dir.join(kind.table_file()))?;
                    ctx.report.entity_mut(kind).mark_missing();
                }
                _ => return Err(e),
            }
        }
    }

    Ok(())
}

/// A table left over from an earlier run must not outlive its source, or
/// the next load would read rows this run never converted.
fn remove_stale_table(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale table: {}", path.display()))?;
        info!(path = %path.display(), "Removed table of missing source");
    }
    Ok(())
}

/// Reads one entity type's dump and writes `<tables_dir>/<kind>.csv`.
/// A source that fails mid-read is a `MissingSource`; nothing is written.
pub fn convert_entity<T: Entity>(
    input_dir: &Path,
    tables_dir: &Path,
    stats: &mut EntityStats,
) -> Result<()> {
    let source = Source::locate(input_dir, T::KIND)?;
    let mut rows = source.rows()?;
    let output = tables_dir.join(T::KIND.table_file());
    let tmp_path = output.with_extension("csv.tmp");

    write_rows::<T, _>(rows.by_ref(), &tmp_path, stats)?;

    if let Some(read_error) = rows.take_read_error() {
        *stats = EntityStats::default();
        if let Err(e) = fs::remove_file(&tmp_path) {
            warn!(path = %tmp_path.display(), error = %e, "Failed to remove partial table");
        }
        return Err(PipelineError::MissingSource {
            entity: T::KIND,
            path: source.path().to_path_buf(),
            source: read_error,
        }
        .into());
    }

    stats.records_read += rows.skipped();
    stats.add_malformed(rows.skipped());
    move_into_place(&tmp_path, &output)?;

    info!(
        entity = %T::KIND,
        source = %source.path().display(),
        output = %output.display(),
        written = stats.rows_written,
        malformed = stats.malformed_skipped,
        "Converted"
    );
    Ok(())
}

/// Validates each raw record into `T` and writes the table atomically via
/// a temporary file and rename.
pub fn write_table<T: Entity, I: Iterator<Item = RawRecord>>(
    records: I,
    output: &Path,
    stats: &mut EntityStats,
) -> Result<()> {
    let tmp_path = output.with_extension("csv.tmp");
    write_rows::<T, _>(records, &tmp_path, stats)?;
    move_into_place(&tmp_path, output)
}

fn move_into_place(tmp_path: &Path, output: &Path) -> Result<()> {
    fs::rename(tmp_path, output)
        .with_context(|| format!("Failed to move table into place: {}", output.display()))
}

fn write_rows<T: Entity, I: Iterator<Item = RawRecord>>(
    records: I,
    tmp_path: &Path,
    stats: &mut EntityStats,
) -> Result<()> {
    let file = File::create(tmp_path)
        .with_context(|| format!("Failed to create table file: {}", tmp_path.display()))?;
    let mut writer = Writer::from_writer(BufWriter::with_capacity(CSV_BUFFER_SIZE, file));

    write_header::<T, _>(&mut writer)?;

    for raw in records {
        stats.inc_read();
        match T::from_fields(&raw) {
            Ok(record) => {
                write_row(&mut writer, &record)?;
                stats.inc_written();
            }
            Err(e) => {
                stats.add_malformed(1);
                let err = PipelineError::MalformedRecord {
                    entity: T::KIND,
                    index: stats.records_read,
                    reason: e.to_string(),
                };
                debug!(error = %err, "Skipping record");
            }
        }
    }

    writer
        .flush()
        .with_context(|| format!("Failed to flush table file: {}", tmp_path.display()))?;
    Ok(())
}

pub fn write_header<T: Entity, W: Write>(writer: &mut Writer<W>) -> Result<()> {
    writer.write_record(T::COLUMNS.iter().map(|c| c.name))?;
    Ok(())
}

/// Nulls are written as empty fields; quoting is left to the CSV writer so
/// delimiters and newlines inside text survive a reload.
pub fn write_row<T: Entity, W: Write>(writer: &mut Writer<W>, record: &T) -> Result<()> {
    let fields = record.to_fields();
    writer.write_record(fields.iter().map(|f| f.as_deref().unwrap_or("")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use tempfile::TempDir;

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn header_follows_schema_order() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("comments.csv");
        let mut stats = EntityStats::default();

        write_table::<Comment, _>(std::iter::empty(), &out, &mut stats).unwrap();

        let content = fs::read_to_string(&out).unwrap();
        assert_eq!(content.trim(), "Id,PostId,Score,Text,CreationDate,UserId");
    }

    #[test]
    fn missing_attributes_become_empty_fields() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("comments.csv");
        let mut stats = EntityStats::default();

        write_table::<Comment, _>(
            vec![raw(&[("Id", "5"), ("Text", "hi")])].into_iter(),
            &out,
            &mut stats,
        )
        .unwrap();

        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], "5,,,hi,,");
        assert_eq!(stats.rows_written, 1);
    }

    #[test]
    fn malformed_records_are_counted_not_written() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("posts.csv");
        let mut stats = EntityStats::default();

        let records = vec![
            raw(&[("Id", "1")]),
            raw(&[("Id", "two")]),
            raw(&[("Id", "3"), ("Score", "1.5")]),
            raw(&[("Title", "no id")]),
        ];
        write_table::<Post, _>(records.into_iter(), &out, &mut stats).unwrap();

        assert_eq!(stats.records_read, 4);
        assert_eq!(stats.rows_written, 1);
        assert_eq!(stats.malformed_skipped, 3);
    }

    #[test]
    fn text_with_delimiters_is_quoted() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("comments.csv");
        let mut stats = EntityStats::default();

        write_table::<Comment, _>(
            vec![raw(&[("Id", "1"), ("Text", "a, \"b\"\nc")])].into_iter(),
            &out,
            &mut stats,
        )
        .unwrap();

        let content = fs::read_to_string(&out).unwrap();
        assert!(content.contains("\"a, \"\"b\"\"\nc\""));
    }

    #[test]
    fn convert_all_continues_past_missing_sources() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(
            input.path().join("Users.xml"),
            r#"<users><row Id="1" DisplayName="ann" /></users>"#,
        )
        .unwrap();

        let config = PipelineConfig::under(input.path(), output.path());
        let mut ctx = AnalysisContext::new(config);
        convert_all(&mut ctx).unwrap();

        assert!(ctx.report.entity(EntityKind::Post).missing_source);
        assert!(ctx.report.entity(EntityKind::Comment).missing_source);
        assert!(!ctx.report.entity(EntityKind::User).missing_source);
        assert_eq!(ctx.report.entity(EntityKind::User).rows_written, 1);
        assert!(ctx.config.tables_dir.join("users.csv").exists());
        assert!(!ctx.config.tables_dir.join("posts.csv").exists());
    }

    #[test]
    fn unreadable_source_is_missing_and_writes_nothing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("Posts.xml.bz2"), b"this is not bzip2 at all").unwrap();

        let config = PipelineConfig::under(input.path(), output.path());
        let mut ctx = AnalysisContext::new(config);
        convert_all(&mut ctx).unwrap();

        let posts = ctx.report.entity(EntityKind::Post);
        assert!(posts.missing_source);
        assert_eq!(posts.records_read, 0);
        assert_eq!(posts.malformed_skipped, 0);
        assert!(!ctx.config.tables_dir.join("posts.csv").exists());
        assert!(!ctx.config.tables_dir.join("posts.csv.tmp").exists());
    }

    #[test]
    fn missing_source_removes_earlier_table() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(
            input.path().join("Posts.xml"),
            r#"<posts><row Id="1" /><row Id="2" /></posts>"#,
        )
        .unwrap();

        let mut first = AnalysisContext::new(PipelineConfig::under(input.path(), output.path()));
        convert_all(&mut first).unwrap();
        assert!(first.config.tables_dir.join("posts.csv").exists());

        fs::remove_file(input.path().join("Posts.xml")).unwrap();
        let mut second = AnalysisContext::new(PipelineConfig::under(input.path(), output.path()));
        convert_all(&mut second).unwrap();

        assert!(second.report.entity(EntityKind::Post).missing_source);
        assert!(!second.config.tables_dir.join("posts.csv").exists());
    }
}
