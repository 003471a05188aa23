mod aggregate;
mod completeness;
mod context;
mod errors;
mod models;
mod planner;
mod runner;


pub use aggregate::{AggregatedData, EntrySummary, aggregate_results};
pub use completeness::{CompletenessReport, analyze_data_completeness};
pub use context::{ExecutionContext, evaluate_run_state};
pub use errors::StepError;
pub use models::{
    ExecutionStep, LimitOverrides, RunLimits, RunReport, RunState, StepDecision, StepKind,
    StepStatus,
};
pub use planner::{DecisionParseError, parse_decision};
pub use runner::Agent;
