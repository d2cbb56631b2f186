use crate::models::{Entity, EntityKind};
use crate::store::TableStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One complete `<tag>` token.
static TAG_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>|\s]+)>").unwrap());

/// Leading run of complete `|tag|` tokens, anchored at the start.
static TAG_PIPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|((?:[^<>|\s]+\|)+)").unwrap());

/// Start of a `<pre>` block or a ``` / ~~~ fence at the start of a line.
static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)<pre\b[^>]*>|^[ \t]{0,3}(?:```|~~~)").unwrap());

/// Whole code block spans, used to cut code out before counting words.
/// An unterminated block runs to the end of the text.
static CODE_BLOCK_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ims)<pre\b[^>]*>.*?(?:</pre>|\z)|^[ \t]{0,3}(?:```|~~~)[^\n]*\n.*?(?:^[ \t]{0,3}(?:```|~~~)[ \t]*$|\z)",
    )
    .unwrap()
});

/// HTML anchor with an http(s) href, or a Markdown `[text](url)` link.
static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<a\s[^>]*?\bhref\s*=\s*["'](https?://[^"'\s>]+)["']|\[[^\]\n]*\]\((https?://[^)\s]+)\)"#,
    )
    .unwrap()
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").unwrap());

static HTML_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:[a-zA-Z]+|#[0-9]+|#x[0-9a-fA-F]+);").unwrap());

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’-][\p{L}\p{N}]+)*").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureValue {
    Flag(bool),
    Count(u64),
    Tags(BTreeSet<String>),
    Links(Vec<String>),
}

impl FeatureValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FeatureValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            FeatureValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            FeatureValue::Tags(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_links(&self) -> Option<&[String]> {
        match self {
            FeatureValue::Links(l) => Some(l),
            _ => None,
        }
    }
}

/// A declarative text feature: which column it reads, the pattern it is
/// anchored on and how a match becomes a value. Absent text is passed as
/// `""`, which every extractor maps to its zero value.
pub struct FeatureRule {
    pub name: &'static str,
    pub entity: EntityKind,
    pub column: &'static str,
    pub pattern: &'static Regex,
    pub extract: fn(&Regex, &str) -> FeatureValue,
}

impl FeatureRule {
    pub fn apply(&self, text: Option<&str>) -> FeatureValue {
        (self.extract)(self.pattern, text.unwrap_or(""))
    }
}

pub static RULES: Lazy<Vec<FeatureRule>> = Lazy::new(|| {
    vec![
        FeatureRule {
            name: "tags",
            entity: EntityKind::Post,
            column: "Tags",
            pattern: &TAG_BRACKET,
            extract: |re, text| FeatureValue::Tags(tag_set(re, text)),
        },
        FeatureRule {
            name: "has_code_block",
            entity: EntityKind::Post,
            column: "Body",
            pattern: &CODE_BLOCK,
            extract: |re, text| FeatureValue::Flag(re.is_match(text)),
        },
        FeatureRule {
            name: "body_link_count",
            entity: EntityKind::Post,
            column: "Body",
            pattern: &LINK,
            extract: |re, text| FeatureValue::Count(link_targets(re, text).len() as u64),
        },
        FeatureRule {
            name: "body_word_count",
            entity: EntityKind::Post,
            column: "Body",
            pattern: &WORD,
            extract: |re, text| FeatureValue::Count(words(re, text)),
        },
        FeatureRule {
            name: "about_me_links",
            entity: EntityKind::User,
            column: "AboutMe",
            pattern: &LINK,
            extract: |re, text| FeatureValue::Links(link_targets(re, text)),
        },
        FeatureRule {
            name: "about_me_word_count",
            entity: EntityKind::User,
            column: "AboutMe",
            pattern: &WORD,
            extract: |re, text| FeatureValue::Count(words(re, text)),
        },
    ]
});

/// Tag tokens from `<a><b>` or `|a|b|` strings. Only complete tokens count;
/// a dangling `<re` or `|re` is ignored.
fn tag_set(bracket: &Regex, text: &str) -> BTreeSet<String> {
    if let Some(caps) = TAG_PIPE.captures(text) {
        return caps[1]
            .split('|')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
    }
    bracket
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

fn link_targets(link: &Regex, text: &str) -> Vec<String> {
    link.captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Words outside code blocks, markup and entities.
fn words(word: &Regex, text: &str) -> u64 {
    let without_code = CODE_BLOCK_SPAN.replace_all(text, " ");
    let without_tags = HTML_TAG.replace_all(&without_code, " ");
    let plain = HTML_ENTITY.replace_all(&without_tags, "");
    word.find_iter(&plain).count() as u64
}

pub fn tags(text: Option<&str>) -> BTreeSet<String> {
    tag_set(&TAG_BRACKET, text.unwrap_or(""))
}

pub fn has_code_block(text: Option<&str>) -> bool {
    text.is_some_and(|t| CODE_BLOCK.is_match(t))
}

pub fn links(text: Option<&str>) -> Vec<String> {
    text.map(|t| link_targets(&LINK, t)).unwrap_or_default()
}

pub fn word_count(text: Option<&str>) -> u64 {
    text.map(|t| words(&WORD, t)).unwrap_or(0)
}

/// Derived columns for one table, row-aligned with it. Source rows are
/// never touched.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    entity: EntityKind,
    ids: Vec<i64>,
    columns: BTreeMap<&'static str, Vec<FeatureValue>>,
}

impl FeatureFrame {
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn value(&self, row: usize, name: &str) -> Option<&FeatureValue> {
        self.columns.get(name).and_then(|c| c.get(row))
    }

    pub fn flag(&self, row: usize, name: &str) -> bool {
        self.value(row, name)
            .and_then(FeatureValue::as_flag)
            .unwrap_or(false)
    }

    pub fn count(&self, row: usize, name: &str) -> u64 {
        self.value(row, name)
            .and_then(FeatureValue::as_count)
            .unwrap_or(0)
    }

    pub fn tags(&self, row: usize, name: &str) -> Option<&BTreeSet<String>> {
        self.value(row, name).and_then(FeatureValue::as_tags)
    }

    pub fn links(&self, row: usize, name: &str) -> &[String] {
        self.value(row, name)
            .and_then(FeatureValue::as_links)
            .unwrap_or(&[])
    }
}

/// Runs every rule registered for `T` over the rows.
pub fn extract<T: Entity>(rows: &[T]) -> FeatureFrame {
    let mut columns = BTreeMap::new();
    for rule in RULES.iter().filter(|r| r.entity == T::KIND) {
        let values: Vec<FeatureValue> = rows
            .iter()
            .map(|row| rule.apply(row.text(rule.column)))
            .collect();
        columns.insert(rule.name, values);
    }

    debug!(
        entity = %T::KIND,
        rows = rows.len(),
        features = columns.len(),
        "Features extracted"
    );

    FeatureFrame {
        entity: T::KIND,
        ids: rows.iter().map(Entity::id).collect(),
        columns,
    }
}

/// Feature columns for the tables that carry free text we analyse.
#[derive(Debug, Clone)]
pub struct Features {
    pub posts: FeatureFrame,
    pub users: FeatureFrame,
}

impl Features {
    pub fn extract(store: &TableStore) -> Self {
        Self {
            posts: extract(store.posts.rows()),
            users: extract(store.users.rows()),
        }
    }
}
