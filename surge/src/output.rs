use crate::cli::OutputFormat;
use crate::plan::Plan;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, source: &str, plan: &Plan);
    fn progress(&self) -> Option<surge_core::ProgressFn>;
    fn print_summary(&self, result: &surge_core::RunResult) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat, quiet: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new(!quiet)),
        OutputFormat::Json => Box::new(json::JsonOutput { progress: !quiet }),
    }
}
