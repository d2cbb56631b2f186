use crate::config::{ABOUT_LINK_CAP, BODY_LINK_CAP, WORD_COUNT_BUCKET, WORD_COUNT_CAP};
use crate::features::Features;
use crate::join::{inner_join, left_join};
use crate::models::{Post, PostType};
use crate::store::TableStore;
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// One component of a grouping key. Orders nulls first, then integers, then
/// text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Key {
    Null,
    Int(i64),
    Text(String),
}

impl Key {
    pub fn text(s: impl Into<String>) -> Self {
        Key::Text(s.into())
    }

    fn opt_text(s: Option<&str>) -> Self {
        s.map_or(Key::Null, Key::text)
    }

    fn opt_int(n: Option<i64>) -> Self {
        n.map_or(Key::Null, Key::Int)
    }

    fn post_type(t: Option<PostType>) -> Self {
        t.map_or(Key::Null, |t| Key::Text(t.label()))
    }

    fn flag(b: bool) -> Self {
        Key::text(if b { "yes" } else { "no" })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Null => f.write_str("(null)"),
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reduction {
    Count,
    Sum,
    Mean,
}

/// What an aggregate groups by, what it measures and how it reduces.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AggregateSpec {
    pub name: &'static str,
    pub keys: &'static [&'static str],
    pub measure: &'static str,
    pub reduction: Reduction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub key: Vec<Key>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregate {
    pub spec: AggregateSpec,
    pub rows: Vec<AggregateRow>,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    sum: f64,
}

impl Aggregate {
    /// Groups `(key, measure)` observations. Null measures are ignored by
    /// every reduction, so a group only appears once it has a non-null
    /// measure. Rows come out ordered by key.
    pub fn group<I>(spec: AggregateSpec, observations: I) -> Self
    where
        I: IntoIterator<Item = (Vec<Key>, Option<f64>)>,
    {
        let mut groups: BTreeMap<Vec<Key>, Accumulator> = BTreeMap::new();
        for (key, measure) in observations {
            debug_assert_eq!(key.len(), spec.keys.len());
            let Some(value) = measure else { continue };
            let acc = groups.entry(key).or_default();
            acc.count += 1;
            acc.sum += value;
        }

        let rows = groups
            .into_iter()
            .map(|(key, acc)| AggregateRow {
                key,
                value: match spec.reduction {
                    Reduction::Count => acc.count as f64,
                    Reduction::Sum => acc.sum,
                    Reduction::Mean => acc.sum / acc.count as f64,
                },
            })
            .collect();

        Self { spec, rows }
    }

    pub fn get(&self, key: &[Key]) -> Option<f64> {
        self.rows.iter().find(|r| r.key == key).map(|r| r.value)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The `n` largest groups, ties broken by key. Selection only; values
    /// are not recomputed.
    pub fn top_n(&self, n: usize) -> Self {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.key.cmp(&b.key)));
        rows.truncate(n);
        Self {
            spec: self.spec,
            rows,
        }
    }
}

const QUESTIONS_PER_TAG: AggregateSpec = AggregateSpec {
    name: "questions_per_tag",
    keys: &["tag"],
    measure: "post id",
    reduction: Reduction::Count,
};

const POSTS_PER_MONTH: AggregateSpec = AggregateSpec {
    name: "posts_per_month",
    keys: &["month", "post_type"],
    measure: "post id",
    reduction: Reduction::Count,
};

const MEAN_SCORE_BY_CODE_BLOCK: AggregateSpec = AggregateSpec {
    name: "mean_score_by_code_block",
    keys: &["has_code_block"],
    measure: "score",
    reduction: Reduction::Mean,
};

const POSTS_BY_WORD_COUNT: AggregateSpec = AggregateSpec {
    name: "posts_by_word_count",
    keys: &["word_count_bucket"],
    measure: "post id",
    reduction: Reduction::Count,
};

const MEAN_REPUTATION_BY_ABOUT_LINKS: AggregateSpec = AggregateSpec {
    name: "mean_reputation_by_about_links",
    keys: &["about_me_link_bucket"],
    measure: "reputation",
    reduction: Reduction::Mean,
};

const MEAN_REPUTATION_BY_ABOUT_WORDS: AggregateSpec = AggregateSpec {
    name: "mean_reputation_by_about_words",
    keys: &["about_me_word_bucket"],
    measure: "reputation",
    reduction: Reduction::Mean,
};

const MEAN_SCORE_BY_BODY_LINKS: AggregateSpec = AggregateSpec {
    name: "mean_score_by_body_links",
    keys: &["body_link_bucket"],
    measure: "score",
    reduction: Reduction::Mean,
};

const COMMENTS_PER_POST: AggregateSpec = AggregateSpec {
    name: "comments_per_post",
    keys: &["post_type"],
    measure: "comments on post",
    reduction: Reduction::Mean,
};

const POSTS_PER_USER: AggregateSpec = AggregateSpec {
    name: "posts_per_user",
    keys: &["owner_user_id", "display_name"],
    measure: "post id",
    reduction: Reduction::Count,
};

const TAG_COOCCURRENCE: AggregateSpec = AggregateSpec {
    name: "tag_cooccurrence",
    keys: &["tag_a", "tag_b"],
    measure: "post id",
    reduction: Reduction::Count,
};

const ANSWERS_PER_QUESTION: AggregateSpec = AggregateSpec {
    name: "answers_per_question",
    keys: &["question_id"],
    measure: "answer id",
    reduction: Reduction::Count,
};

const USER_SIGNUPS_PER_YEAR: AggregateSpec = AggregateSpec {
    name: "user_signups_per_year",
    keys: &["year"],
    measure: "user id",
    reduction: Reduction::Count,
};

const POST_TYPE_BY_CODE_BLOCK: AggregateSpec = AggregateSpec {
    name: "post_type_by_code_block",
    keys: &["post_type", "has_code_block"],
    measure: "post id",
    reduction: Reduction::Count,
};

/// Counted observations carry a non-null placeholder measure.
const PRESENT: Option<f64> = Some(1.0);

pub fn questions_per_tag(store: &TableStore, features: &Features) -> Aggregate {
    let posts = store.posts.rows();
    let observations = posts
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_question())
        .flat_map(move |(i, _)| {
            features
                .posts
                .tags(i, "tags")
                .into_iter()
                .flatten()
                .map(|tag| (vec![Key::text(tag.as_str())], PRESENT))
        });
    Aggregate::group(QUESTIONS_PER_TAG, observations)
}

pub fn posts_per_month(store: &TableStore) -> Aggregate {
    let observations = store.posts.rows().iter().map(|p| {
        let month = p
            .creation_date
            .map_or(Key::Null, |d| Key::Text(d.format("%Y-%m").to_string()));
        (vec![month, Key::post_type(p.post_type())], PRESENT)
    });
    Aggregate::group(POSTS_PER_MONTH, observations)
}

pub fn mean_score_by_code_block(store: &TableStore, features: &Features) -> Aggregate {
    let observations = store.posts.rows().iter().enumerate().map(|(i, p)| {
        (
            vec![Key::flag(features.posts.flag(i, "has_code_block"))],
            p.score.map(|s| s as f64),
        )
    });
    Aggregate::group(MEAN_SCORE_BY_CODE_BLOCK, observations)
}

/// Posts without a body are left out rather than counted as zero words.
pub fn posts_by_word_count(store: &TableStore, features: &Features) -> Aggregate {
    let observations = store
        .posts
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, p)| p.body.is_some())
        .map(|(i, _)| {
            let words = features.posts.count(i, "body_word_count").min(WORD_COUNT_CAP);
            let bucket = words / WORD_COUNT_BUCKET * WORD_COUNT_BUCKET;
            (vec![Key::Int(bucket as i64)], PRESENT)
        });
    Aggregate::group(POSTS_BY_WORD_COUNT, observations)
}

pub fn mean_reputation_by_about_links(store: &TableStore, features: &Features) -> Aggregate {
    let observations = store.users.rows().iter().enumerate().map(|(i, u)| {
        let links = (features.users.links(i, "about_me_links").len() as u64).min(ABOUT_LINK_CAP);
        (vec![Key::Int(links as i64)], u.reputation.map(|r| r as f64))
    });
    Aggregate::group(MEAN_REPUTATION_BY_ABOUT_LINKS, observations)
}

/// Users without an AboutMe are left out, as posts without a body are for
/// word counts.
pub fn mean_reputation_by_about_words(store: &TableStore, features: &Features) -> Aggregate {
    let observations = store
        .users
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, u)| u.about_me.is_some())
        .map(|(i, u)| {
            let words = features
                .users
                .count(i, "about_me_word_count")
                .min(WORD_COUNT_CAP);
            let bucket = words / WORD_COUNT_BUCKET * WORD_COUNT_BUCKET;
            (vec![Key::Int(bucket as i64)], u.reputation.map(|r| r as f64))
        });
    Aggregate::group(MEAN_REPUTATION_BY_ABOUT_WORDS, observations)
}

pub fn mean_score_by_body_links(store: &TableStore, features: &Features) -> Aggregate {
    let observations = store.posts.rows().iter().enumerate().map(|(i, p)| {
        let links = features.posts.count(i, "body_link_count").min(BODY_LINK_CAP);
        (vec![Key::Int(links as i64)], p.score.map(|s| s as f64))
    });
    Aggregate::group(MEAN_SCORE_BY_BODY_LINKS, observations)
}

/// Post ⟕ Comment: posts without comments count as zero.
pub fn comments_per_post(store: &TableStore) -> Aggregate {
    let joined = left_join(
        store.posts.rows(),
        store.comments.rows(),
        |p| Some(p.id),
        |c| c.post_id,
    );

    let mut per_post: Vec<(&Post, u64)> = Vec::new();
    for (post, comment) in joined {
        match per_post.last_mut() {
            Some((last, n)) if last.id == post.id => *n += u64::from(comment.is_some()),
            _ => per_post.push((post, u64::from(comment.is_some()))),
        }
    }

    let observations = per_post
        .into_iter()
        .map(|(p, n)| (vec![Key::post_type(p.post_type())], Some(n as f64)));
    Aggregate::group(COMMENTS_PER_POST, observations)
}

/// Post ⟕ User: posts by deleted or unknown users keep a null display name.
pub fn posts_per_user(store: &TableStore) -> Aggregate {
    let joined = left_join(
        store.posts.rows(),
        store.users.rows(),
        |p| p.owner_user_id,
        |u| Some(u.id),
    );
    let observations = joined.into_iter().map(|(post, user)| {
        (
            vec![
                Key::opt_int(post.owner_user_id),
                Key::opt_text(user.and_then(|u| u.display_name.as_deref())),
            ],
            PRESENT,
        )
    });
    Aggregate::group(POSTS_PER_USER, observations)
}

/// Unordered tag pairs on the same question, stored with `tag_a < tag_b`.
pub fn tag_cooccurrence(store: &TableStore, features: &Features) -> Aggregate {
    let mut observations = Vec::new();
    for (i, post) in store.posts.rows().iter().enumerate() {
        if !post.is_question() {
            continue;
        }
        let Some(tags) = features.posts.tags(i, "tags") else {
            continue;
        };
        let tags: Vec<&String> = tags.iter().collect();
        for (a, tag_a) in tags.iter().enumerate() {
            for tag_b in &tags[a + 1..] {
                observations.push((
                    vec![Key::text(tag_a.as_str()), Key::text(tag_b.as_str())],
                    PRESENT,
                ));
            }
        }
    }
    Aggregate::group(TAG_COOCCURRENCE, observations)
}

/// Answer ⋈ Question (inner): answers whose question is not loaded are not
/// counted, and unanswered questions have no row.
pub fn answers_per_question(store: &TableStore) -> Aggregate {
    let posts = store.posts.rows();
    let answers: Vec<&Post> = posts.iter().filter(|p| p.is_answer()).collect();
    let questions: Vec<&Post> = posts.iter().filter(|p| p.is_question()).collect();

    let joined = inner_join(&answers, &questions, |a| a.parent_id, |q| Some(q.id));
    let observations = joined
        .into_iter()
        .map(|(_, question)| (vec![Key::Int(question.id)], PRESENT));
    Aggregate::group(ANSWERS_PER_QUESTION, observations)
}

pub fn user_signups_per_year(store: &TableStore) -> Aggregate {
    let observations = store.users.rows().iter().map(|u| {
        let year = u
            .creation_date
            .map_or(Key::Null, |d| Key::Int(i64::from(d.year())));
        (vec![year], PRESENT)
    });
    Aggregate::group(USER_SIGNUPS_PER_YEAR, observations)
}

/// Cross-tabulation of post type against code-block presence.
pub fn post_type_by_code_block(store: &TableStore, features: &Features) -> Aggregate {
    let observations = store.posts.rows().iter().enumerate().map(|(i, p)| {
        (
            vec![
                Key::post_type(p.post_type()),
                Key::flag(features.posts.flag(i, "has_code_block")),
            ],
            PRESENT,
        )
    });
    Aggregate::group(POST_TYPE_BY_CODE_BLOCK, observations)
}

/// Every aggregate of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub questions_per_tag: Aggregate,
    pub top_tags: Aggregate,
    pub posts_per_month: Aggregate,
    pub mean_score_by_code_block: Aggregate,
    pub posts_by_word_count: Aggregate,
    pub mean_reputation_by_about_links: Aggregate,
    pub mean_reputation_by_about_words: Aggregate,
    pub mean_score_by_body_links: Aggregate,
    pub comments_per_post: Aggregate,
    pub posts_per_user: Aggregate,
    pub tag_cooccurrence: Aggregate,
    pub answers_per_question: Aggregate,
    pub user_signups_per_year: Aggregate,
    pub post_type_by_code_block: Aggregate,
}

impl Insights {
    pub fn compute(store: &TableStore, features: &Features, top_tags: usize) -> Self {
        let questions_per_tag = questions_per_tag(store, features);
        let insights = Self {
            top_tags: questions_per_tag.top_n(top_tags),
            questions_per_tag,
            posts_per_month: posts_per_month(store),
            mean_score_by_code_block: mean_score_by_code_block(store, features),
            posts_by_word_count: posts_by_word_count(store, features),
            mean_reputation_by_about_links: mean_reputation_by_about_links(store, features),
            mean_reputation_by_about_words: mean_reputation_by_about_words(store, features),
            mean_score_by_body_links: mean_score_by_body_links(store, features),
            comments_per_post: comments_per_post(store),
            posts_per_user: posts_per_user(store),
            tag_cooccurrence: tag_cooccurrence(store, features),
            answers_per_question: answers_per_question(store),
            user_signups_per_year: user_signups_per_year(store),
            post_type_by_code_block: post_type_by_code_block(store, features),
        };

        for agg in insights.all() {
            debug!(aggregate = agg.spec.name, groups = agg.len(), "Aggregate computed");
        }
        insights
    }

    pub fn all(&self) -> [&Aggregate; 14] {
        [
            &self.questions_per_tag,
            &self.top_tags,
            &self.posts_per_month,
            &self.mean_score_by_code_block,
            &self.posts_by_word_count,
            &self.mean_reputation_by_about_links,
            &self.mean_reputation_by_about_words,
            &self.mean_score_by_body_links,
            &self.comments_per_post,
            &self.posts_per_user,
            &self.tag_cooccurrence,
            &self.answers_per_question,
            &self.user_signups_per_year,
            &self.post_type_by_code_block,
        ]
    }

    /// Plain-text exploration report: the largest groups of each aggregate.
    pub fn print_report(&self, limit: usize) {
        // top_tags is a selection of questions_per_tag, which is printed anyway
        for agg in self.all() {
            if std::ptr::eq(agg, &self.top_tags) {
                continue;
            }
            println!();
            println!(
                "--- {} ({:?} of {} by {}) ---",
                agg.spec.name,
                agg.spec.reduction,
                agg.spec.measure,
                agg.spec.keys.join(", ")
            );
            let shown = agg.top_n(limit);
            for row in &shown.rows {
                let key: Vec<String> = row.key.iter().map(Key::to_string).collect();
                println!("{:<48} {:>12.2}", key.join(" | "), row.value);
            }
            if agg.len() > limit {
                println!("... {} more groups", agg.len() - limit);
            }
        }
    }
}
