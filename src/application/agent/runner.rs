use super::aggregate::aggregate_results;
use super::completeness::analyze_data_completeness;
use super::context::{ExecutionContext, evaluate_run_state};
use super::errors::StepError;
use super::models::{
    ExecutionStep, LimitOverrides, RunLimits, RunReport, RunState, StepDecision, StepKind,
};
use super::planner::{
    build_decision_prompt, build_reasoning_prompt, build_synthesis_prompt, parse_decision,
    planning_options, synthesis_options,
};
use crate::application::tooling::{ToolDescriptor, ToolDispatch};
use crate::infrastructure::model::InferenceProvider;
use crate::infrastructure::retrieval::KnowledgeRetriever;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The iterative agent loop: decide, execute, validate, accumulate, and
/// check completion until one of the stop conditions fires, then synthesize
/// a final answer from everything gathered.
pub struct Agent<P: InferenceProvider> {
    inference: Arc<P>,
    dispatch: Arc<dyn ToolDispatch>,
    retriever: Arc<dyn KnowledgeRetriever>,
    limits: RunLimits,
}

impl<P: InferenceProvider> Agent<P> {
    pub fn new(
        inference: Arc<P>,
        dispatch: Arc<dyn ToolDispatch>,
        retriever: Arc<dyn KnowledgeRetriever>,
    ) -> Self {
        Self {
            inference,
            dispatch,
            retriever,
            limits: RunLimits::default(),
        }
    }

    /// Overrides any subset of the run thresholds, leaving the rest as they
    /// were.
    pub fn set_limits(&mut self, overrides: &LimitOverrides) {
        self.limits.apply(overrides);
    }

    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    /// Answers one query. Always returns a string: failures along the way
    /// degrade the answer instead of propagating.
    pub async fn process_query(&self, user_query: &str) -> String {
        self.execute_query(user_query).await.answer
    }

    /// Like [`Self::process_query`] but keeps the step trace and terminal
    /// state alongside the answer.
    pub async fn execute_query(&self, user_query: &str) -> RunReport {
        let mut ctx = ExecutionContext::new(user_query);
        info!(
            run_id = ctx.run_id.as_str(),
            query = user_query,
            "Agent run started"
        );
        let state = self.drive(&mut ctx).await;
        info!(
            run_id = ctx.run_id.as_str(),
            ?state,
            steps = ctx.steps.len(),
            successful = ctx.successful_count(),
            failed = ctx.failed_count(),
            "Agent loop finished; synthesizing answer"
        );

        match self.synthesize(&ctx).await {
            Ok(answer) => RunReport {
                run_id: ctx.run_id,
                answer,
                state,
                steps: ctx.steps,
            },
            Err(err) => {
                warn!(%err, "Final synthesis failed; returning degraded answer");
                let answer = format!(
                    "I gathered data across {} step(s) but could not compose the final \
                     answer: {}",
                    ctx.steps.len(),
                    err.user_message()
                );
                RunReport {
                    run_id: ctx.run_id,
                    answer,
                    state,
                    steps: ctx.steps,
                }
            }
        }
    }

    /// Runs the per-iteration protocol until a terminal state. All step
    /// failures are absorbed here; only the terminal state escapes.
    async fn drive(&self, ctx: &mut ExecutionContext) -> RunState {
        let catalog = self.dispatch.list_tools().await;

        loop {
            let state = evaluate_run_state(ctx, &self.limits);
            if state != RunState::Running {
                info!(?state, steps = ctx.current_step_index, "Stop condition reached");
                return state;
            }

            let decision = self.next_decision(ctx, &catalog).await;
            if decision.kind == StepKind::FinalResponse {
                debug!(
                    confidence = decision.confidence,
                    "Planner chose to finalize"
                );
                return RunState::Completed;
            }
            if decision.confidence < self.limits.min_confidence {
                info!(
                    confidence = decision.confidence,
                    floor = self.limits.min_confidence,
                    "Plan confidence below floor; treating current data as good enough"
                );
                return RunState::Completed;
            }

            let signature = decision.signature();
            if !ctx.step_history.insert(signature.clone()) {
                warn!(
                    signature = signature.as_str(),
                    "Planner repeated an identical action; stopping"
                );
                return RunState::Stopped;
            }

            let index = ctx.steps.len();
            let step = ExecutionStep::from_decision(decision, index);
            info!(
                step = step.id.as_str(),
                kind = step.kind.as_str(),
                tool = step.tool.as_deref().unwrap_or(""),
                "Executing step"
            );
            ctx.steps.push(step);

            let (kind, tool, parameters, query, purpose) = {
                let step = &ctx.steps[index];
                (
                    step.kind,
                    step.tool.clone(),
                    step.parameters.clone(),
                    step.query.clone(),
                    step.reasoning.clone(),
                )
            };
            match self
                .dispatch_step(kind, tool, parameters, query, &purpose, ctx)
                .await
            {
                Ok(result) => {
                    let step = &mut ctx.steps[index];
                    step.complete(result.clone());
                    let id = step.id.clone();
                    ctx.context.insert(id, result.clone());
                    ctx.last_step_result = Some(result);
                    ctx.consecutive_failures = 0;
                }
                Err(err) => {
                    warn!(step = ctx.steps[index].id.as_str(), %err, "Step failed");
                    ctx.steps[index].fail(err.to_string());
                    ctx.consecutive_failures += 1;
                }
            }
            ctx.current_step_index += 1;
        }
    }

    async fn next_decision(
        &self,
        ctx: &ExecutionContext,
        catalog: &[ToolDescriptor],
    ) -> StepDecision {
        let prompt = build_decision_prompt(ctx, catalog, &self.limits);
        match self.inference.infer(&prompt, &planning_options()).await {
            Ok(content) => match parse_decision(&content) {
                Ok(decision) => {
                    debug!(
                        kind = decision.kind.as_str(),
                        confidence = decision.confidence,
                        "Planner proposed next step"
                    );
                    decision
                }
                Err(err) => {
                    warn!(%err, "Planner output could not be interpreted; substituting final response");
                    StepDecision::fallback("the planner response could not be interpreted")
                }
            },
            Err(err) => {
                warn!(%err, "Planner call failed; substituting final response");
                StepDecision::fallback("the planning service was unavailable")
            }
        }
    }

    pub(crate) async fn dispatch_step(
        &self,
        kind: StepKind,
        tool: Option<String>,
        parameters: Option<Value>,
        query: Option<String>,
        purpose: &str,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError> {
        match kind {
            StepKind::ToolCall => {
                let name = tool.unwrap_or_default();
                let params = parameters.unwrap_or_else(|| Value::Object(Map::new()));
                let raw = self.dispatch.call_tool(&name, params).await?;
                if raw
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    let message = extract_text_block(&raw)
                        .unwrap_or_else(|| "tool returned an error payload".to_string());
                    return Err(StepError::ToolReported(message));
                }
                let payload = extract_payload(raw);
                let report = analyze_data_completeness(&payload, &ctx.user_query);
                debug!(
                    tool = name.as_str(),
                    data_type = report.data_type.as_str(),
                    items = report.item_count,
                    complete = report.is_complete,
                    pagination = report.has_pagination,
                    "Tool result analyzed"
                );
                Ok(payload)
            }
            StepKind::KnowledgeQuery => {
                let question = query.unwrap_or_default();
                let outcome = self.retriever.retrieve(&question).await?;
                if let Some(error) = outcome.error {
                    return Err(StepError::RetrievalReported(error));
                }
                if !outcome.citations.is_empty() {
                    debug!(
                        citations = outcome.citations.len(),
                        "Knowledge query returned citations"
                    );
                }
                Ok(Value::String(outcome.result))
            }
            StepKind::Reasoning => {
                let prompt = build_reasoning_prompt(purpose, ctx);
                let analysis = self.inference.infer(&prompt, &planning_options()).await?;
                Ok(Value::String(analysis))
            }
            StepKind::FinalResponse => Err(StepError::Unsupported(kind.as_str())),
        }
    }

    async fn synthesize(&self, ctx: &ExecutionContext) -> Result<String, SynthesisError> {
        let aggregate = aggregate_results(&ctx.steps);
        info!(summary = aggregate.summary.as_str(), "Aggregated step results");
        let prompt = build_synthesis_prompt(ctx, &aggregate);
        let answer = self
            .inference
            .infer(&prompt, &synthesis_options())
            .await
            .map_err(SynthesisError)?;
        Ok(answer)
    }
}

/// Tool results frequently arrive as MCP content blocks wrapping a
/// JSON-encoded text payload. Unwrap and parse when possible, otherwise
/// keep the raw text, otherwise the raw result.
fn extract_payload(raw: Value) -> Value {
    if let Some(text) = extract_text_block(&raw) {
        return serde_json::from_str(&text).unwrap_or(Value::String(text));
    }
    raw
}

fn extract_text_block(result: &Value) -> Option<String> {
    let blocks = result.get("content").and_then(Value::as_array)?;
    for block in blocks {
        let is_text = block
            .get("type")
            .and_then(Value::as_str)
            .map(|kind| kind.eq_ignore_ascii_case("text"))
            .unwrap_or(false);
        if is_text {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct SynthesisError(#[from] crate::infrastructure::model::InferenceError);

impl SynthesisError {
    pub fn user_message(&self) -> String {
        self.0.user_message()
    }
}
