use crate::config::PipelineConfig;
use crate::stats::RunReport;

/// State scoped to one analysis run. Every stage takes it explicitly;
/// nothing is cached between runs.
#[derive(Debug)]
pub struct AnalysisContext {
    pub config: PipelineConfig,
    pub report: RunReport,
}

impl AnalysisContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            report: RunReport::new(),
        }
    }
}
