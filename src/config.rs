use std::path::{Path, PathBuf};

/// Progress update interval (tick every N rows)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Buffer size for CSV writers
pub const CSV_BUFFER_SIZE: usize = 128 * 1024;

/// Timestamp layout used by the dump and by the intermediate tables
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Number of tags shown in the top-tags chart
pub const DEFAULT_TOP_TAGS: usize = 15;

/// Width of a body word-count histogram bucket
pub const WORD_COUNT_BUCKET: u64 = 50;

/// Word counts at or above this land in the last histogram bucket
pub const WORD_COUNT_CAP: u64 = 500;

/// AboutMe link counts at or above this share one bucket
pub const ABOUT_LINK_CAP: u64 = 3;

/// Body link counts at or above this share one bucket
pub const BODY_LINK_CAP: u64 = 3;

/// Chart canvas size in pixels
pub const CHART_SIZE: (u32, u32) = (1024, 640);

pub const CHART_TOP_TAGS: &str = "top_tags.svg";
pub const CHART_POSTS_PER_MONTH: &str = "posts_per_month.svg";
pub const CHART_SCORE_BY_CODE_BLOCK: &str = "score_by_code_block.svg";
pub const CHART_BODY_WORD_COUNTS: &str = "body_word_counts.svg";
pub const CHART_REPUTATION_BY_ABOUT_LINKS: &str = "reputation_by_about_links.svg";

/// Directories and knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub tables_dir: PathBuf,
    pub charts_dir: PathBuf,
    pub top_tags: usize,
}

impl PipelineConfig {
    /// Lays out `tables/` and `charts/` under a single output directory.
    pub fn under(input_dir: impl Into<PathBuf>, output_dir: &Path) -> Self {
        Self {
            input_dir: input_dir.into(),
            tables_dir: output_dir.join("tables"),
            charts_dir: output_dir.join("charts"),
            top_tags: DEFAULT_TOP_TAGS,
        }
    }
}
