//! Pipeline stages in workflow order: orchestrate, scan, analyze, plan,
//! verify, report. The execute phase between plan and verify belongs to
//! the language queue (`crate::queue`), not to a stage here.
//!
//! Stages share one shape: take the run state by value, work, hand it
//! back. They degrade instead of failing: a dead reasoning backend
//! costs the analysis, not the run. Only the safety gate and the user
//! stop the pipeline.

mod analyze;
mod orchestrate;
mod plan;
mod report;
mod scan;
mod verify;

pub use analyze::AnalyzeStage;
pub use orchestrate::OrchestrateStage;
pub use plan::PlanStage;
pub use report::ReportStage;
pub use scan::ScanStage;
pub use verify::VerifyStage;

/// Render seconds the way humans read them.
pub(crate) fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
