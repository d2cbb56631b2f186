use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use stacklens::config::{PipelineConfig, DEFAULT_TOP_TAGS};
use stacklens::context::AnalysisContext;
use stacklens::features::Features;
use stacklens::insights::{Aggregate, Insights};
use stacklens::stats::RunReport;
use stacklens::store::TableStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Groups shown per aggregate in the text report
const REPORT_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "stacklens")]
#[command(about = "Convert Stack Exchange dumps to tables and chart what is in them")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert Posts/Comments/Users/PostHistory XML into CSV tables
    Convert(ConvertArgs),
    /// Load converted tables, print aggregates and render charts
    Analyze(AnalyzeArgs),
    /// Convert then analyze, with tables and charts under one directory
    Run(RunArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Directory holding the dump files (.xml or .xml.bz2)
    #[arg(short, long, env = "STACKLENS_INPUT")]
    input: PathBuf,

    /// Directory for the CSV tables
    #[arg(short, long, env = "STACKLENS_TABLES")]
    tables: PathBuf,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Directory holding converted CSV tables
    #[arg(short, long, env = "STACKLENS_TABLES")]
    tables: PathBuf,

    /// Directory for the chart SVGs
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    report: ReportArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding the dump files (.xml or .xml.bz2)
    #[arg(short, long, env = "STACKLENS_INPUT")]
    input: PathBuf,

    /// Output directory; tables/ and charts/ are created inside
    #[arg(short, long, env = "STACKLENS_OUTPUT")]
    output: PathBuf,

    #[command(flatten)]
    report: ReportArgs,
}

#[derive(Args)]
struct ReportArgs {
    /// Number of tags in the top-tags chart
    #[arg(long, default_value_t = DEFAULT_TOP_TAGS)]
    top_tags: usize,

    /// Print the run report and every aggregate as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a RunReport,
    aggregates: Vec<&'a Aggregate>,
    charts: &'a [PathBuf],
}

fn run_convert(ctx: &mut AnalysisContext) -> Result<()> {
    let start = Instant::now();
    stacklens::convert::convert_all(ctx)?;
    ctx.report.log();
    info!(
        duration_secs = start.elapsed().as_secs_f64(),
        tables = %ctx.config.tables_dir.display(),
        "Conversion complete"
    );
    Ok(())
}

fn run_analyze(ctx: &mut AnalysisContext, json: bool) -> Result<()> {
    let start = Instant::now();
    let store = TableStore::load(ctx)?;
    ctx.report.log();
    if !json {
        ctx.report.print_summary();
    }

    let features = Features::extract(&store);
    let insights = Insights::compute(&store, &features, ctx.config.top_tags);
    let charts = stacklens::render::render_all(&insights, &ctx.config.charts_dir)?;

    if json {
        let output = JsonOutput {
            report: &ctx.report,
            aggregates: insights.all().to_vec(),
            charts: &charts,
        };
        let text =
            serde_json::to_string_pretty(&output).context("Failed to serialize aggregates")?;
        println!("{text}");
    } else {
        insights.print_report(REPORT_LIMIT);
        println!();
        println!("Charts written:     {} of 5", charts.len());
        for chart in &charts {
            println!("  {}", chart.display());
        }
    }

    info!(
        duration_secs = start.elapsed().as_secs_f64(),
        "Analysis complete"
    );
    Ok(())
}

fn config(input: &Path, tables: &Path, charts: &Path, top_tags: usize) -> PipelineConfig {
    PipelineConfig {
        input_dir: input.to_path_buf(),
        tables_dir: tables.to_path_buf(),
        charts_dir: charts.to_path_buf(),
        top_tags,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Convert(args) => {
            let mut ctx = AnalysisContext::new(config(
                &args.input,
                &args.tables,
                Path::new(""),
                DEFAULT_TOP_TAGS,
            ));
            run_convert(&mut ctx).map(|()| ctx.report.print_summary())
        }
        Commands::Analyze(args) => {
            let mut ctx = AnalysisContext::new(config(
                Path::new(""),
                &args.tables,
                &args.output,
                args.report.top_tags,
            ));
            run_analyze(&mut ctx, args.report.json)
        }
        Commands::Run(args) => {
            let mut config = PipelineConfig::under(&args.input, &args.output);
            config.top_tags = args.report.top_tags;
            let mut ctx = AnalysisContext::new(config);
            run_convert(&mut ctx).and_then(|()| run_analyze(&mut ctx, args.report.json))
        }
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
