use super::models::{ExecutionStep, RunLimits, RunState, StepKind, StepStatus};
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

/// Mutable state of one query run. Owned by a single `process_query`
/// invocation and dropped when it returns.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: String,
    pub user_query: String,
    pub steps: Vec<ExecutionStep>,
    pub current_step_index: usize,
    /// Results of completed steps, keyed by step id. Failed steps never
    /// write here.
    pub context: Map<String, Value>,
    /// Signatures of every decision attempted in this run.
    pub step_history: HashSet<String>,
    pub consecutive_failures: u32,
    pub last_step_result: Option<Value>,
}

impl ExecutionContext {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            user_query: user_query.into(),
            steps: Vec::new(),
            current_step_index: 0,
            context: Map::new(),
            step_history: HashSet::new(),
            consecutive_failures: 0,
            last_step_result: None,
        }
    }

    pub fn completed_steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
    }

    pub fn successful_count(&self) -> usize {
        self.completed_steps().count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Failed)
            .count()
    }

    /// Kinds of the most recent steps, newest last. Fed to the planner as
    /// loop-prevention telemetry.
    pub fn recent_kinds(&self, count: usize) -> Vec<StepKind> {
        self.steps
            .iter()
            .rev()
            .take(count)
            .map(|step| step.kind)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    pub fn steps_remaining(&self, limits: &RunLimits) -> usize {
        limits.max_steps.saturating_sub(self.current_step_index)
    }
}

/// Pure stop-condition evaluation, checked before each iteration. Keeping
/// it free of I/O makes every termination path testable without a network.
pub fn evaluate_run_state(ctx: &ExecutionContext, limits: &RunLimits) -> RunState {
    if ctx.consecutive_failures >= limits.max_consecutive_failures {
        return RunState::Exhausted;
    }
    if ctx.current_step_index >= limits.max_steps {
        return RunState::Exhausted;
    }

    // Coarser guard than the signature check: the same (kind, tool) pair
    // repeated back-to-back catches "same tool, different params" thrashing.
    let window = limits.max_similar_steps;
    if window > 0 && ctx.steps.len() >= window {
        let recent = &ctx.steps[ctx.steps.len() - window..];
        let first = (recent[0].kind, recent[0].tool.as_deref());
        if recent
            .iter()
            .all(|step| (step.kind, step.tool.as_deref()) == first)
        {
            return RunState::Stopped;
        }
    }

    RunState::Running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent::models::StepDecision;
    use serde_json::json;

    fn push_step(ctx: &mut ExecutionContext, kind: StepKind, tool: Option<&str>, ok: bool) {
        let decision = StepDecision {
            kind,
            tool: tool.map(String::from),
            parameters: None,
            query: None,
            reasoning: "test".into(),
            confidence: 0.9,
        };
        let mut step = ExecutionStep::from_decision(decision, ctx.steps.len());
        if ok {
            step.complete(json!("ok"));
        } else {
            step.fail("boom");
        }
        ctx.steps.push(step);
        ctx.current_step_index += 1;
    }

    #[test]
    fn fresh_context_keeps_running() {
        let ctx = ExecutionContext::new("query");
        assert_eq!(evaluate_run_state(&ctx, &RunLimits::default()), RunState::Running);
    }

    #[test]
    fn consecutive_failures_exhaust_the_run() {
        let mut ctx = ExecutionContext::new("query");
        ctx.consecutive_failures = 3;
        assert_eq!(
            evaluate_run_state(&ctx, &RunLimits::default()),
            RunState::Exhausted
        );
    }

    #[test]
    fn step_budget_exhausts_the_run() {
        let mut ctx = ExecutionContext::new("query");
        ctx.current_step_index = 8;
        assert_eq!(
            evaluate_run_state(&ctx, &RunLimits::default()),
            RunState::Exhausted
        );
    }

    #[test]
    fn repeated_kind_and_tool_pair_stops_the_run() {
        let mut ctx = ExecutionContext::new("query");
        push_step(&mut ctx, StepKind::ToolCall, Some("search"), true);
        push_step(&mut ctx, StepKind::ToolCall, Some("search"), true);
        assert_eq!(
            evaluate_run_state(&ctx, &RunLimits::default()),
            RunState::Stopped
        );
    }

    #[test]
    fn alternating_tools_keep_running() {
        let mut ctx = ExecutionContext::new("query");
        push_step(&mut ctx, StepKind::ToolCall, Some("search"), true);
        push_step(&mut ctx, StepKind::ToolCall, Some("fetch"), true);
        assert_eq!(
            evaluate_run_state(&ctx, &RunLimits::default()),
            RunState::Running
        );
    }

    #[test]
    fn recent_kinds_preserve_order() {
        let mut ctx = ExecutionContext::new("query");
        push_step(&mut ctx, StepKind::ToolCall, Some("search"), true);
        push_step(&mut ctx, StepKind::Reasoning, None, true);
        push_step(&mut ctx, StepKind::KnowledgeQuery, None, false);
        assert_eq!(
            ctx.recent_kinds(2),
            vec![StepKind::Reasoning, StepKind::KnowledgeQuery]
        );
    }
}
