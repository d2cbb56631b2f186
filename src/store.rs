use crate::context::AnalysisContext;
use crate::error::PipelineError;
use crate::models::{Comment, Entity, EntityKind, FieldSource, Post, PostHistory, User};
use crate::stats::RunReport;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Typed rows of one entity type plus an id lookup. Read-only once built.
#[derive(Debug)]
pub struct Table<T> {
    path: PathBuf,
    rows: Vec<T>,
    by_id: FxHashMap<i64, usize>,
}

impl<T: Entity> Table<T> {
    fn new(path: PathBuf, rows: Vec<T>) -> Self {
        let by_id = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.id(), i))
            .collect();
        Self { path, rows, by_id }
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.by_id.get(&id).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The four loaded tables of one run.
#[derive(Debug)]
pub struct TableStore {
    pub posts: Table<Post>,
    pub comments: Table<Comment>,
    pub users: Table<User>,
    pub post_history: Table<PostHistory>,
}

impl TableStore {
    pub fn post(&self, id: i64) -> Option<&Post> {
        self.posts.get(id)
    }

    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.get(id)
    }

    /// Loads every table from the run's tables directory, then enforces
    /// uniqueness and post references.
    pub fn load(ctx: &mut AnalysisContext) -> Result<Self> {
        let dir = ctx.config.tables_dir.clone();
        let report = &mut ctx.report;

        let posts = load_or_empty::<Post>(&dir, report)?;
        let comments = load_or_empty::<Comment>(&dir, report)?;
        let users = load_or_empty::<User>(&dir, report)?;
        let post_history = load_or_empty::<PostHistory>(&dir, report)?;

        Ok(Self::assemble(
            &dir,
            posts,
            comments,
            users,
            post_history,
            report,
        ))
    }

    /// Builds a store from already-typed rows. Duplicate ids are dropped
    /// (first wins); comments and history rows whose post is not loaded are
    /// dropped. Both are counted in `report`.
    pub fn assemble(
        dir: &Path,
        posts: Vec<Post>,
        comments: Vec<Comment>,
        users: Vec<User>,
        post_history: Vec<PostHistory>,
        report: &mut RunReport,
    ) -> Self {
        let posts = dedup(posts, report);
        let users = dedup(users, report);
        let comments = dedup(comments, report);
        let post_history = dedup(post_history, report);

        let post_ids: FxHashSet<i64> = posts.iter().map(|p| p.id).collect();
        let comments = retain_resolved(comments, &post_ids, |c| c.post_id, report);
        let post_history = retain_resolved(post_history, &post_ids, |h| h.post_id, report);

        let store = Self {
            posts: Table::new(dir.join(EntityKind::Post.table_file()), posts),
            comments: Table::new(dir.join(EntityKind::Comment.table_file()), comments),
            users: Table::new(dir.join(EntityKind::User.table_file()), users),
            post_history: Table::new(
                dir.join(EntityKind::PostHistory.table_file()),
                post_history,
            ),
        };

        report.entity_mut(EntityKind::Post).set_loaded(store.posts.len() as u64);
        report
            .entity_mut(EntityKind::Comment)
            .set_loaded(store.comments.len() as u64);
        report.entity_mut(EntityKind::User).set_loaded(store.users.len() as u64);
        report
            .entity_mut(EntityKind::PostHistory)
            .set_loaded(store.post_history.len() as u64);

        store.log_tables();
        store
    }

    fn log_tables(&self) {
        let tables = [
            (EntityKind::Post, self.posts.path(), self.posts.len()),
            (EntityKind::Comment, self.comments.path(), self.comments.len()),
            (EntityKind::User, self.users.path(), self.users.len()),
            (
                EntityKind::PostHistory,
                self.post_history.path(),
                self.post_history.len(),
            ),
        ];
        for (kind, path, rows) in tables {
            info!(entity = %kind, path = %path.display(), rows, "Table loaded");
        }
    }
}

fn load_or_empty<T: Entity>(dir: &Path, report: &mut RunReport) -> Result<Vec<T>> {
    let path = dir.join(T::KIND.table_file());
    if !path.exists() {
        warn!(entity = %T::KIND, path = %path.display(), "Table file not found, using empty table");
        report.entity_mut(T::KIND).mark_missing();
        return Ok(Vec::new());
    }
    read_table(&path)
}

/// A CSV row addressed by header name.
struct CsvRow<'a> {
    columns: &'a FxHashMap<String, usize>,
    record: &'a StringRecord,
}

impl FieldSource for CsvRow<'_> {
    fn field(&self, name: &str) -> Option<&str> {
        self.columns.get(name).and_then(|&i| self.record.get(i))
    }
}

/// Reads one table file into typed rows. Any declared column that is absent
/// from the header, or any value that does not parse as its column type, is a
/// `SchemaViolation` rather than a null.
pub fn read_table<T: Entity>(path: &Path) -> Result<Vec<T>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;

    let columns: FxHashMap<String, usize> = reader
        .headers()
        .with_context(|| format!("Failed to read header of: {}", path.display()))?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();

    if let Some(missing) = T::COLUMNS.iter().find(|c| !columns.contains_key(c.name)) {
        return Err(PipelineError::SchemaViolation {
            file: path.to_path_buf(),
            column: missing.name.to_string(),
            line: 1,
            value: "<absent from header>".to_string(),
            expected: missing.kind,
        }
        .into());
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record =
            result.with_context(|| format!("Failed to read row of: {}", path.display()))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row = CsvRow {
            columns: &columns,
            record: &record,
        };
        let typed = T::from_fields(&row).map_err(|e| PipelineError::SchemaViolation {
            file: path.to_path_buf(),
            column: e.column.to_string(),
            line,
            value: e.value,
            expected: e.expected,
        })?;
        rows.push(typed);
    }

    debug!(entity = %T::KIND, rows = rows.len(), path = %path.display(), "Table read");
    Ok(rows)
}

fn dedup<T: Entity>(rows: Vec<T>, report: &mut RunReport) -> Vec<T> {
    let before = rows.len();
    let mut seen = FxHashSet::default();
    let kept: Vec<T> = rows.into_iter().filter(|r| seen.insert(r.id())).collect();

    let dropped = (before - kept.len()) as u64;
    if dropped > 0 {
        warn!(entity = %T::KIND, dropped, "Dropped duplicate ids");
        report.entity_mut(T::KIND).add_duplicates(dropped);
    }
    kept
}

fn retain_resolved<T: Entity>(
    rows: Vec<T>,
    post_ids: &FxHashSet<i64>,
    post_ref: impl Fn(&T) -> Option<i64>,
    report: &mut RunReport,
) -> Vec<T> {
    let mut dropped = 0u64;
    let kept: Vec<T> = rows
        .into_iter()
        .filter(|row| {
            let reference = post_ref(row);
            if reference.is_some_and(|id| post_ids.contains(&id)) {
                return true;
            }
            let err = PipelineError::UnresolvedReference {
                entity: T::KIND,
                id: row.id(),
                target: EntityKind::Post,
                reference,
            };
            debug!(error = %err, "Dropping row");
            dropped += 1;
            false
        })
        .collect();

    if dropped > 0 {
        warn!(entity = %T::KIND, dropped, "Dropped rows with unresolved post references");
        report.entity_mut(T::KIND).add_unresolved(dropped);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn post(id: i64, owner: Option<i64>) -> Post {
        Post {
            id,
            post_type_id: Some(1),
            parent_id: None,
            accepted_answer_id: None,
            creation_date: None,
            score: Some(0),
            view_count: None,
            body: None,
            owner_user_id: owner,
            title: None,
            tags: None,
            answer_count: None,
            comment_count: None,
        }
    }

    fn comment(id: i64, post_id: Option<i64>) -> Comment {
        Comment {
            id,
            post_id,
            score: None,
            text: None,
            creation_date: None,
            user_id: None,
        }
    }

    #[test]
    fn orphan_comments_are_dropped_and_counted() {
        let mut report = RunReport::new();
        let store = TableStore::assemble(
            Path::new("tables"),
            vec![post(1, None), post(2, Some(5))],
            vec![comment(10, Some(1)), comment(11, Some(99)), comment(12, None)],
            Vec::new(),
            Vec::new(),
            &mut report,
        );

        assert_eq!(store.comments.len(), 1);
        assert_eq!(store.comments.rows()[0].id, 10);
        assert_eq!(report.entity(EntityKind::Comment).unresolved_dropped, 2);
        assert_eq!(report.entity(EntityKind::Comment).rows_loaded, 1);
    }

    fn history(id: i64, post_id: Option<i64>) -> PostHistory {
        PostHistory {
            id,
            post_history_type_id: Some(2),
            post_id,
            revision_guid: None,
            creation_date: None,
            user_id: None,
            comment: None,
            text: None,
        }
    }

    #[test]
    fn orphan_history_rows_are_dropped_and_counted() {
        let mut report = RunReport::new();
        let store = TableStore::assemble(
            Path::new("tables"),
            vec![post(1, None)],
            Vec::new(),
            Vec::new(),
            vec![history(20, Some(1)), history(21, Some(42)), history(22, None)],
            &mut report,
        );

        assert_eq!(store.post_history.len(), 1);
        assert!(store.post_history.contains(20));
        let stats = report.entity(EntityKind::PostHistory);
        assert_eq!(stats.unresolved_dropped, 2);
        assert_eq!(stats.rows_loaded, 1);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let mut report = RunReport::new();
        let mut second = post(1, Some(7));
        second.score = Some(42);
        let store = TableStore::assemble(
            Path::new("tables"),
            vec![post(1, None), second],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &mut report,
        );

        assert_eq!(store.posts.len(), 1);
        assert_eq!(store.posts.get(1).unwrap().score, Some(0));
        assert_eq!(report.entity(EntityKind::Post).duplicates_dropped, 1);
    }

    #[test]
    fn lookup_by_id() {
        let mut report = RunReport::new();
        let store = TableStore::assemble(
            Path::new("tables"),
            vec![post(3, None), post(8, None)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &mut report,
        );
        assert!(store.posts.contains(8));
        assert_eq!(store.posts.get(3).map(|p| p.id), Some(3));
        assert!(store.posts.get(4).is_none());
        assert_eq!(store.post(8).map(|p| p.id), Some(8));
        assert!(store.user(3).is_none());
        assert_eq!(store.posts.path(), Path::new("tables/posts.csv"));
    }

    #[test]
    fn unparseable_integer_is_schema_violation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.csv");
        fs::write(
            &path,
            "Id,PostId,Score,Text,CreationDate,UserId\n1,2,3,ok,,\n2,2,many,bad,,\n",
        )
        .unwrap();

        let err = read_table::<Comment>(&path).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::SchemaViolation {
                file,
                column,
                line,
                value,
                ..
            }) => {
                assert_eq!(file, &path);
                assert_eq!(column, "Score");
                assert_eq!(*line, 3);
                assert_eq!(value, "many");
            }
            other => panic!("expected schema violation, got {:?}", other),
        }
    }

    #[test]
    fn unparseable_datetime_is_schema_violation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.csv");
        fs::write(
            &path,
            "Id,Reputation,CreationDate,DisplayName,LastAccessDate,Location,AboutMe,Views,UpVotes,DownVotes\n\
             1,10,last tuesday,ann,,,,,,\n",
        )
        .unwrap();

        let err = read_table::<User>(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("users.csv"));
        assert!(msg.contains("CreationDate"));
    }

    #[test]
    fn missing_header_column_is_schema_violation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.csv");
        fs::write(&path, "Id,PostId,Text\n1,2,hi\n").unwrap();

        let err = read_table::<Comment>(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SchemaViolation { column, .. }) if column == "Score"
        ));
    }

    #[test]
    fn empty_fields_load_as_nulls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.csv");
        fs::write(&path, "Id,PostId,Score,Text,CreationDate,UserId\n4,,,,,\n").unwrap();

        let rows = read_table::<Comment>(&path).unwrap();
        assert_eq!(rows, vec![comment(4, None)]);
    }
}
