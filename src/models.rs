use crate::config::TIMESTAMP_FORMAT;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntityKind {
    Post,
    Comment,
    User,
    PostHistory,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Post,
        EntityKind::Comment,
        EntityKind::User,
        EntityKind::PostHistory,
    ];

    /// File stem used by the dump, e.g. `Posts` for `Posts.xml`.
    pub fn source_stem(self) -> &'static str {
        match self {
            EntityKind::Post => "Posts",
            EntityKind::Comment => "Comments",
            EntityKind::User => "Users",
            EntityKind::PostHistory => "PostHistory",
        }
    }

    pub fn table_file(self) -> &'static str {
        match self {
            EntityKind::Post => "posts.csv",
            EntityKind::Comment => "comments.csv",
            EntityKind::User => "users.csv",
            EntityKind::PostHistory => "post_history.csv",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Post => "Post",
            EntityKind::Comment => "Comment",
            EntityKind::User => "User",
            EntityKind::PostHistory => "PostHistory",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    DateTime,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::DateTime => "datetime",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

const fn col(name: &'static str, kind: ColumnType) -> Column {
    Column { name, kind }
}

/// Anything that can hand out a record's raw attribute values by name:
/// an XML row's attributes or a CSV row with its header.
pub trait FieldSource {
    fn field(&self, name: &str) -> Option<&str>;
}

/// A single attribute that failed its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub column: &'static str,
    pub value: String,
    pub expected: ColumnType,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "required {} column {} is missing", self.expected, self.column)
        } else {
            write!(
                f,
                "column {}: {:?} is not a valid {}",
                self.column, self.value, self.expected
            )
        }
    }
}

impl std::error::Error for FieldError {}

/// A typed per-entity record. `from_fields` is the single place where raw
/// values are checked against the column schema.
pub trait Entity: Sized {
    const KIND: EntityKind;
    const COLUMNS: &'static [Column];

    fn id(&self) -> i64;

    fn from_fields<S: FieldSource + ?Sized>(src: &S) -> Result<Self, FieldError>;

    /// Values in `COLUMNS` order; `None` is a null.
    fn to_fields(&self) -> Vec<Option<String>>;

    /// Free-text column lookup for the feature rules.
    fn text(&self, column: &str) -> Option<&str>;
}

fn required_int<S: FieldSource + ?Sized>(
    src: &S,
    column: &'static str,
) -> Result<i64, FieldError> {
    int(src, column)?.ok_or(FieldError {
        column,
        value: String::new(),
        expected: ColumnType::Integer,
    })
}

fn int<S: FieldSource + ?Sized>(src: &S, column: &'static str) -> Result<Option<i64>, FieldError> {
    match src.field(column) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| FieldError {
            column,
            value: v.to_string(),
            expected: ColumnType::Integer,
        }),
    }
}

fn datetime<S: FieldSource + ?Sized>(
    src: &S,
    column: &'static str,
) -> Result<Option<NaiveDateTime>, FieldError> {
    match src.field(column) {
        None | Some("") => Ok(None),
        Some(v) => NaiveDateTime::parse_from_str(v, TIMESTAMP_FORMAT)
            .map(Some)
            .map_err(|_| FieldError {
                column,
                value: v.to_string(),
                expected: ColumnType::DateTime,
            }),
    }
}

/// Empty text is stored as null so every typed record has one spelling.
fn text<S: FieldSource + ?Sized>(src: &S, column: &str) -> Option<String> {
    src.field(column)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn int_out(v: Option<i64>) -> Option<String> {
    v.map(|n| n.to_string())
}

fn ts_out(v: Option<NaiveDateTime>) -> Option<String> {
    v.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
}

pub fn format_timestamp(t: &NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PostType {
    Question,
    Answer,
    Other(i64),
}

impl PostType {
    pub fn from_id(id: i64) -> Self {
        match id {
            1 => PostType::Question,
            2 => PostType::Answer,
            other => PostType::Other(other),
        }
    }

    pub fn label(self) -> String {
        match self {
            PostType::Question => "question".to_string(),
            PostType::Answer => "answer".to_string(),
            PostType::Other(id) => format!("other ({id})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub post_type_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub accepted_answer_id: Option<i64>,
    pub creation_date: Option<NaiveDateTime>,
    pub score: Option<i64>,
    pub view_count: Option<i64>,
    pub body: Option<String>,
    pub owner_user_id: Option<i64>,
    pub title: Option<String>,
    pub tags: Option<String>,
    pub answer_count: Option<i64>,
    pub comment_count: Option<i64>,
}

impl Post {
    pub fn post_type(&self) -> Option<PostType> {
        self.post_type_id.map(PostType::from_id)
    }

    pub fn is_question(&self) -> bool {
        self.post_type() == Some(PostType::Question)
    }

    pub fn is_answer(&self) -> bool {
        self.post_type() == Some(PostType::Answer)
    }
}

impl Entity for Post {
    const KIND: EntityKind = EntityKind::Post;
    const COLUMNS: &'static [Column] = &[
        col("Id", ColumnType::Integer),
        col("PostTypeId", ColumnType::Integer),
        col("ParentId", ColumnType::Integer),
        col("AcceptedAnswerId", ColumnType::Integer),
        col("CreationDate", ColumnType::DateTime),
        col("Score", ColumnType::Integer),
        col("ViewCount", ColumnType::Integer),
        col("Body", ColumnType::Text),
        col("OwnerUserId", ColumnType::Integer),
        col("Title", ColumnType::Text),
        col("Tags", ColumnType::Text),
        col("AnswerCount", ColumnType::Integer),
        col("CommentCount", ColumnType::Integer),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_fields<S: FieldSource + ?Sized>(src: &S) -> Result<Self, FieldError> {
        Ok(Self {
            id: required_int(src, "Id")?,
            post_type_id: int(src, "PostTypeId")?,
            parent_id: int(src, "ParentId")?,
            accepted_answer_id: int(src, "AcceptedAnswerId")?,
            creation_date: datetime(src, "CreationDate")?,
            score: int(src, "Score")?,
            view_count: int(src, "ViewCount")?,
            body: text(src, "Body"),
            owner_user_id: int(src, "OwnerUserId")?,
            title: text(src, "Title"),
            tags: text(src, "Tags"),
            answer_count: int(src, "AnswerCount")?,
            comment_count: int(src, "CommentCount")?,
        })
    }

    fn to_fields(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            int_out(self.post_type_id),
            int_out(self.parent_id),
            int_out(self.accepted_answer_id),
            ts_out(self.creation_date),
            int_out(self.score),
            int_out(self.view_count),
            self.body.clone(),
            int_out(self.owner_user_id),
            self.title.clone(),
            self.tags.clone(),
            int_out(self.answer_count),
            int_out(self.comment_count),
        ]
    }

    fn text(&self, column: &str) -> Option<&str> {
        match column {
            "Body" => self.body.as_deref(),
            "Title" => self.title.as_deref(),
            "Tags" => self.tags.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub post_id: Option<i64>,
    pub score: Option<i64>,
    pub text: Option<String>,
    pub creation_date: Option<NaiveDateTime>,
    pub user_id: Option<i64>,
}

impl Entity for Comment {
    const KIND: EntityKind = EntityKind::Comment;
    const COLUMNS: &'static [Column] = &[
        col("Id", ColumnType::Integer),
        col("PostId", ColumnType::Integer),
        col("Score", ColumnType::Integer),
        col("Text", ColumnType::Text),
        col("CreationDate", ColumnType::DateTime),
        col("UserId", ColumnType::Integer),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_fields<S: FieldSource + ?Sized>(src: &S) -> Result<Self, FieldError> {
        Ok(Self {
            id: required_int(src, "Id")?,
            post_id: int(src, "PostId")?,
            score: int(src, "Score")?,
            text: text(src, "Text"),
            creation_date: datetime(src, "CreationDate")?,
            user_id: int(src, "UserId")?,
        })
    }

    fn to_fields(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            int_out(self.post_id),
            int_out(self.score),
            self.text.clone(),
            ts_out(self.creation_date),
            int_out(self.user_id),
        ]
    }

    fn text(&self, column: &str) -> Option<&str> {
        match column {
            "Text" => self.text.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub reputation: Option<i64>,
    pub creation_date: Option<NaiveDateTime>,
    pub display_name: Option<String>,
    pub last_access_date: Option<NaiveDateTime>,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub views: Option<i64>,
    pub up_votes: Option<i64>,
    pub down_votes: Option<i64>,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;
    const COLUMNS: &'static [Column] = &[
        col("Id", ColumnType::Integer),
        col("Reputation", ColumnType::Integer),
        col("CreationDate", ColumnType::DateTime),
        col("DisplayName", ColumnType::Text),
        col("LastAccessDate", ColumnType::DateTime),
        col("Location", ColumnType::Text),
        col("AboutMe", ColumnType::Text),
        col("Views", ColumnType::Integer),
        col("UpVotes", ColumnType::Integer),
        col("DownVotes", ColumnType::Integer),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_fields<S: FieldSource + ?Sized>(src: &S) -> Result<Self, FieldError> {
        Ok(Self {
            id: required_int(src, "Id")?,
            reputation: int(src, "Reputation")?,
            creation_date: datetime(src, "CreationDate")?,
            display_name: text(src, "DisplayName"),
            last_access_date: datetime(src, "LastAccessDate")?,
            location: text(src, "Location"),
            about_me: text(src, "AboutMe"),
            views: int(src, "Views")?,
            up_votes: int(src, "UpVotes")?,
            down_votes: int(src, "DownVotes")?,
        })
    }

    fn to_fields(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            int_out(self.reputation),
            ts_out(self.creation_date),
            self.display_name.clone(),
            ts_out(self.last_access_date),
            self.location.clone(),
            self.about_me.clone(),
            int_out(self.views),
            int_out(self.up_votes),
            int_out(self.down_votes),
        ]
    }

    fn text(&self, column: &str) -> Option<&str> {
        match column {
            "DisplayName" => self.display_name.as_deref(),
            "Location" => self.location.as_deref(),
            "AboutMe" => self.about_me.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostHistory {
    pub id: i64,
    pub post_history_type_id: Option<i64>,
    pub post_id: Option<i64>,
    pub revision_guid: Option<String>,
    pub creation_date: Option<NaiveDateTime>,
    pub user_id: Option<i64>,
    pub comment: Option<String>,
    pub text: Option<String>,
}

impl Entity for PostHistory {
    const KIND: EntityKind = EntityKind::PostHistory;
    const COLUMNS: &'static [Column] = &[
        col("Id", ColumnType::Integer),
        col("PostHistoryTypeId", ColumnType::Integer),
        col("PostId", ColumnType::Integer),
        col("RevisionGUID", ColumnType::Text),
        col("CreationDate", ColumnType::DateTime),
        col("UserId", ColumnType::Integer),
        col("Comment", ColumnType::Text),
        col("Text", ColumnType::Text),
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn from_fields<S: FieldSource + ?Sized>(src: &S) -> Result<Self, FieldError> {
        Ok(Self {
            id: required_int(src, "Id")?,
            post_history_type_id: int(src, "PostHistoryTypeId")?,
            post_id: int(src, "PostId")?,
            revision_guid: text(src, "RevisionGUID"),
            creation_date: datetime(src, "CreationDate")?,
            user_id: int(src, "UserId")?,
            comment: text(src, "Comment"),
            text: text(src, "Text"),
        })
    }

    fn to_fields(&self) -> Vec<Option<String>> {
        vec![
            Some(self.id.to_string()),
            int_out(self.post_history_type_id),
            int_out(self.post_id),
            self.revision_guid.clone(),
            ts_out(self.creation_date),
            int_out(self.user_id),
            self.comment.clone(),
            self.text.clone(),
        ]
    }

    fn text(&self, column: &str) -> Option<&str> {
        match column {
            "Comment" => self.comment.as_deref(),
            "Text" => self.text.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    impl FieldSource for HashMap<&'static str, &'static str> {
        fn field(&self, name: &str) -> Option<&str> {
            self.get(name).copied()
        }
    }

    fn fields(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn post_from_minimal_fields() {
        let post = Post::from_fields(&fields(&[("Id", "7")])).unwrap();
        assert_eq!(post.id, 7);
        assert_eq!(post.owner_user_id, None);
        assert_eq!(post.body, None);
        assert_eq!(post.post_type(), None);
    }

    #[test]
    fn post_parses_timestamp_with_millis() {
        let post = Post::from_fields(&fields(&[
            ("Id", "1"),
            ("CreationDate", "2008-07-31T21:42:52.667"),
        ]))
        .unwrap();
        let ts = post.creation_date.unwrap();
        assert_eq!(format_timestamp(&ts), "2008-07-31T21:42:52.667");
    }

    #[test]
    fn timestamp_without_fraction_keeps_spelling() {
        let user = User::from_fields(&fields(&[
            ("Id", "1"),
            ("CreationDate", "2010-01-02T03:04:05"),
        ]))
        .unwrap();
        assert_eq!(
            user.to_fields()[2].as_deref(),
            Some("2010-01-02T03:04:05")
        );
    }

    #[test]
    fn missing_id_is_an_error() {
        let err = Comment::from_fields(&fields(&[("PostId", "3")])).unwrap_err();
        assert_eq!(err.column, "Id");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn bad_integer_names_column() {
        let err = Post::from_fields(&fields(&[("Id", "1"), ("Score", "lots")])).unwrap_err();
        assert_eq!(err.column, "Score");
        assert_eq!(err.value, "lots");
        assert_eq!(err.expected, ColumnType::Integer);
    }

    #[test]
    fn bad_timestamp_names_column() {
        let err =
            PostHistory::from_fields(&fields(&[("Id", "1"), ("CreationDate", "yesterday")]))
                .unwrap_err();
        assert_eq!(err.column, "CreationDate");
        assert_eq!(err.expected, ColumnType::DateTime);
    }

    #[test]
    fn empty_text_becomes_null() {
        let user = User::from_fields(&fields(&[("Id", "1"), ("AboutMe", "")])).unwrap();
        assert_eq!(user.about_me, None);
    }

    #[test]
    fn field_count_matches_schema() {
        let post = Post::from_fields(&fields(&[("Id", "1")])).unwrap();
        let comment = Comment::from_fields(&fields(&[("Id", "1")])).unwrap();
        let user = User::from_fields(&fields(&[("Id", "1")])).unwrap();
        let history = PostHistory::from_fields(&fields(&[("Id", "1")])).unwrap();
        assert_eq!(post.to_fields().len(), Post::COLUMNS.len());
        assert_eq!(comment.to_fields().len(), Comment::COLUMNS.len());
        assert_eq!(user.to_fields().len(), User::COLUMNS.len());
        assert_eq!(history.to_fields().len(), PostHistory::COLUMNS.len());
    }

    #[test]
    fn post_type_classification() {
        assert_eq!(PostType::from_id(1), PostType::Question);
        assert_eq!(PostType::from_id(2), PostType::Answer);
        assert_eq!(PostType::from_id(5), PostType::Other(5));
        assert_eq!(PostType::Other(5).label(), "other (5)");
    }
}
