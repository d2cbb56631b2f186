use crate::config::{
    ABOUT_LINK_CAP, CHART_BODY_WORD_COUNTS, CHART_POSTS_PER_MONTH,
    CHART_REPUTATION_BY_ABOUT_LINKS, CHART_SCORE_BY_CODE_BLOCK, CHART_SIZE, CHART_TOP_TAGS,
    WORD_COUNT_CAP,
};
use crate::error::PipelineError;
use crate::insights::{Aggregate, Insights, Key};
use anyhow::{Context, Result};
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SERIES_COLORS: [RGBColor; 5] = [BLUE, RED, GREEN, MAGENTA, CYAN];

/// Renders every chart into `charts_dir`. A chart whose aggregate has the
/// wrong shape (or no rows) is logged and skipped; I/O failures are fatal.
/// Returns the paths written.
pub fn render_all(insights: &Insights, charts_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(charts_dir).with_context(|| {
        format!(
            "Failed to create charts directory: {}",
            charts_dir.display()
        )
    })?;

    let jobs: [(&str, &Aggregate, fn(&Aggregate, &Path) -> Result<()>); 5] = [
        (CHART_TOP_TAGS, &insights.top_tags, top_tags),
        (CHART_POSTS_PER_MONTH, &insights.posts_per_month, posts_per_month),
        (
            CHART_SCORE_BY_CODE_BLOCK,
            &insights.mean_score_by_code_block,
            score_by_code_block,
        ),
        (
            CHART_BODY_WORD_COUNTS,
            &insights.posts_by_word_count,
            body_word_counts,
        ),
        (
            CHART_REPUTATION_BY_ABOUT_LINKS,
            &insights.mean_reputation_by_about_links,
            reputation_by_about_links,
        ),
    ];

    let mut written = Vec::new();
    for (file, aggregate, draw) in jobs {
        let path = charts_dir.join(file);
        match draw(aggregate, &path) {
            Ok(()) => {
                info!(chart = file, path = %path.display(), "Chart rendered");
                written.push(path);
            }
            Err(e) => match e.downcast_ref::<PipelineError>() {
                Some(PipelineError::Chart { .. }) => {
                    warn!(chart = file, error = %e, "Skipping chart");
                }
                _ => return Err(e),
            },
        }
    }
    Ok(written)
}

pub fn top_tags(aggregate: &Aggregate, path: &Path) -> Result<()> {
    let bars = bars(CHART_TOP_TAGS, aggregate, |k| k.to_string())?;
    bar_chart(path, "Questions per tag (top tags)", "Tag", "Questions", &bars)
}

pub fn score_by_code_block(aggregate: &Aggregate, path: &Path) -> Result<()> {
    let bars = bars(CHART_SCORE_BY_CODE_BLOCK, aggregate, |k| match k {
        Key::Text(flag) => format!("code block: {flag}"),
        other => other.to_string(),
    })?;
    bar_chart(path, "Mean score by code block", "Body", "Mean score", &bars)
}

pub fn body_word_counts(aggregate: &Aggregate, path: &Path) -> Result<()> {
    let bars = bars(CHART_BODY_WORD_COUNTS, aggregate, |k| match k.as_int() {
        Some(n) if n >= WORD_COUNT_CAP as i64 => format!("{n}+"),
        Some(n) => n.to_string(),
        None => k.to_string(),
    })?;
    bar_chart(path, "Posts by body word count", "Words", "Posts", &bars)
}

pub fn reputation_by_about_links(aggregate: &Aggregate, path: &Path) -> Result<()> {
    let bars = bars(CHART_REPUTATION_BY_ABOUT_LINKS, aggregate, |k| {
        match k.as_int() {
            Some(n) if n >= ABOUT_LINK_CAP as i64 => format!("{n}+"),
            Some(n) => n.to_string(),
            None => k.to_string(),
        }
    })?;
    bar_chart(
        path,
        "Mean reputation by AboutMe links",
        "Links in AboutMe",
        "Mean reputation",
        &bars,
    )
}

/// One line per post type over calendar months. Posts without a creation
/// date have no month and are left off the axis.
pub fn posts_per_month(aggregate: &Aggregate, path: &Path) -> Result<()> {
    let chart = CHART_POSTS_PER_MONTH;
    if aggregate.spec.keys.len() != 2 {
        return Err(shape_error(chart, "expected a (month, post type) key").into());
    }

    let mut months: Vec<&str> = Vec::new();
    let mut series: BTreeMap<String, Vec<(&str, f64)>> = BTreeMap::new();
    for row in &aggregate.rows {
        let Key::Text(month) = &row.key[0] else {
            continue;
        };
        if months.last() != Some(&month.as_str()) {
            months.push(month);
        }
        series
            .entry(row.key[1].to_string())
            .or_default()
            .push((month.as_str(), row.value));
    }
    if months.is_empty() {
        return Err(shape_error(chart, "no dated rows").into());
    }

    let position: BTreeMap<&str, i32> = months
        .iter()
        .enumerate()
        .map(|(i, m)| (*m, i as i32))
        .collect();
    let y_max = aggregate
        .rows
        .iter()
        .map(|r| r.value)
        .fold(0.0_f64, f64::max)
        .max(1.0)
        * 1.1;
    let x_max = (months.len() as i32 - 1).max(1);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Posts per month", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(60)
        .build_cartesian_2d(0..x_max, 0f64..y_max)?;

    chart
        .configure_mesh()
        .x_labels(months.len().min(24))
        .x_label_formatter(&|x| {
            months
                .get(*x as usize)
                .map_or_else(String::new, |m| m.to_string())
        })
        .x_desc("Month")
        .y_desc("Posts")
        .draw()?;

    for (i, (post_type, points)) in series.into_iter().enumerate() {
        let color = SERIES_COLORS[i % SERIES_COLORS.len()];
        let points: Vec<(i32, f64)> = points
            .into_iter()
            .filter_map(|(m, v)| position.get(m).map(|x| (*x, v)))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))?
            .label(post_type)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()
        .with_context(|| format!("Failed to write chart: {}", path.display()))?;
    Ok(())
}

/// Labels and values of a single-key aggregate, in row order.
fn bars(
    chart: &'static str,
    aggregate: &Aggregate,
    label: impl Fn(&Key) -> String,
) -> Result<Vec<(String, f64)>, PipelineError> {
    if aggregate.spec.keys.len() != 1 {
        return Err(shape_error(chart, "expected a single grouping key"));
    }
    if aggregate.is_empty() {
        return Err(shape_error(chart, "no rows"));
    }
    Ok(aggregate
        .rows
        .iter()
        .map(|r| (label(&r.key[0]), r.value))
        .collect())
}

fn shape_error(chart: &'static str, reason: &str) -> PipelineError {
    PipelineError::Chart {
        chart,
        reason: reason.to_string(),
    }
}

fn bar_chart(
    path: &Path,
    caption: &str,
    x_desc: &str,
    y_desc: &str,
    bars: &[(String, f64)],
) -> Result<()> {
    let lo = bars.iter().map(|b| b.1).fold(0.0_f64, f64::min);
    let hi = bars.iter().map(|b| b.1).fold(0.0_f64, f64::max);
    let (lo, hi) = if hi - lo < f64::EPSILON {
        (lo, lo + 1.0)
    } else {
        (lo * 1.1, hi * 1.1)
    };

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d((0..bars.len() as i32).into_segmented(), lo..hi)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len())
        .x_label_formatter(&|x| match x {
            SegmentValue::CenterOf(i) => bars
                .get(*i as usize)
                .map_or_else(String::new, |b| b.0.clone()),
            _ => String::new(),
        })
        .x_desc(x_desc)
        .y_desc(y_desc)
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
        let i = i as i32;
        let mut bar = Rectangle::new(
            [
                (SegmentValue::Exact(i), 0.0),
                (SegmentValue::Exact(i + 1), *value),
            ],
            BLUE.mix(0.7).filled(),
        );
        bar.set_margin(0, 0, 5, 5);
        bar
    }))?;

    root.present()
        .with_context(|| format!("Failed to write chart: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{AggregateRow, AggregateSpec, Reduction};
    use tempfile::TempDir;

    const ONE_KEY: AggregateSpec = AggregateSpec {
        name: "one_key",
        keys: &["k"],
        measure: "m",
        reduction: Reduction::Count,
    };

    const TWO_KEYS: AggregateSpec = AggregateSpec {
        name: "two_keys",
        keys: &["month", "post_type"],
        measure: "m",
        reduction: Reduction::Count,
    };

    fn aggregate(spec: AggregateSpec, rows: Vec<(Vec<Key>, f64)>) -> Aggregate {
        Aggregate {
            spec,
            rows: rows
                .into_iter()
                .map(|(key, value)| AggregateRow { key, value })
                .collect(),
        }
    }

    fn is_svg(path: &Path) -> bool {
        fs::read_to_string(path)
            .map(|s| s.contains("<svg"))
            .unwrap_or(false)
    }

    #[test]
    fn bar_chart_writes_svg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags.svg");
        let agg = aggregate(
            ONE_KEY,
            vec![
                (vec![Key::text("rust")], 3.0),
                (vec![Key::text("csv")], 1.0),
            ],
        );

        top_tags(&agg, &path).unwrap();

        assert!(is_svg(&path));
        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("Questions per tag"));
    }

    #[test]
    fn negative_means_render() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("score.svg");
        let agg = aggregate(
            ONE_KEY,
            vec![
                (vec![Key::text("no")], -2.5),
                (vec![Key::text("yes")], 4.0),
            ],
        );

        score_by_code_block(&agg, &path).unwrap();
        assert!(is_svg(&path));
    }

    #[test]
    fn line_chart_writes_svg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monthly.svg");
        let agg = aggregate(
            TWO_KEYS,
            vec![
                (vec![Key::Null, Key::text("question")], 1.0),
                (vec![Key::text("2024-01"), Key::text("answer")], 2.0),
                (vec![Key::text("2024-01"), Key::text("question")], 1.0),
                (vec![Key::text("2024-02"), Key::text("question")], 5.0),
            ],
        );

        posts_per_month(&agg, &path).unwrap();
        assert!(is_svg(&path));
    }

    #[test]
    fn wrong_shape_is_a_chart_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.svg");

        let two_keys = aggregate(TWO_KEYS, vec![(vec![Key::Null, Key::Null], 1.0)]);
        let err = top_tags(&two_keys, &path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Chart { .. })
        ));

        let empty = aggregate(ONE_KEY, Vec::new());
        assert!(body_word_counts(&empty, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn undated_posts_only_is_a_chart_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monthly.svg");
        let agg = aggregate(TWO_KEYS, vec![(vec![Key::Null, Key::text("question")], 1.0)]);

        assert!(posts_per_month(&agg, &path).is_err());
    }
}
