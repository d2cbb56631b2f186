//! Stacklens: Stack Exchange dump conversion and analysis pipeline
//!
//! This crate turns a Stack Exchange XML data dump into typed CSV tables and
//! then into a handful of aggregates and charts:
//!
//! 1. **Conversion Pass** -- Stream each `Posts`/`Comments`/`Users`/`PostHistory`
//!    file (plain or `.bz2`), validate every `<row>` into a typed record and
//!    write one CSV table per entity type
//! 2. **Load Pass** -- Read the tables back with column type checks, drop
//!    duplicate ids and comments/history rows whose post is not loaded
//! 3. **Analysis Pass** -- Extract text features (tags, code blocks, links,
//!    word counts), join tables and compute explicit grouped aggregates
//! 4. **Render Pass** -- Write five SVG charts from fixed-shape aggregates
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- Rows are read one event at a time; only the
//!   typed tables are held in memory
//! - **Typed records** -- Every entity type declares its column schema once;
//!   the same schema drives CSV headers, parsing and validation
//! - **Explicit context** -- [`context::AnalysisContext`] carries the run
//!   configuration and the per-entity counters through every stage
//! - **Counted losses** -- Malformed, duplicate and unresolved records are
//!   skipped and counted, never silently dropped
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming `<row>` reader with BZ2 decompression
//! - [`convert`] -- XML to CSV conversion with atomic writes
//! - [`store`] -- Typed CSV loading with schema and reference checks
//! - [`features`] -- Declarative regex rules over free-text columns
//! - [`join`] -- Left-preserving and inner joins
//! - [`insights`] -- Grouped aggregates and the text report
//! - [`render`] -- SVG charts
//! - [`models`] -- Entity records and column schemas
//! - [`stats`] -- Per-entity counters and the run summary
//! - [`error`] -- Pipeline error taxonomy
//! - [`config`] -- Constants and run configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Convert and analyze in one go
//! stacklens run -i dumps/superuser/ -o output/
//!
//! # Or in two steps
//! stacklens convert -i dumps/superuser/ -t output/tables
//! stacklens analyze -t output/tables -o output/charts --top-tags 20
//! ```

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod features;
pub mod insights;
pub mod join;
pub mod models;
pub mod parser;
pub mod render;
pub mod stats;
pub mod store;
