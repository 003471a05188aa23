use super::completeness::analyze_data_completeness;
use super::context::ExecutionContext;
use super::models::{RunLimits, StepDecision, StepKind, StepStatus};
use crate::application::tooling::ToolDescriptor;
use crate::infrastructure::model::GenerationOptions;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionParseError {
    #[error("expected a JSON object in planner response")]
    NotJson,
    #[error("planner decision missing 'type' field")]
    MissingKind,
    #[error("unknown step type: {0}")]
    UnknownKind(String),
    #[error("tool_call decision missing 'tool' field")]
    MissingTool,
    #[error("knowledge_query decision missing 'query' field")]
    MissingQuery,
}

/// Planning and reasoning calls stay near-deterministic.
pub fn planning_options() -> GenerationOptions {
    GenerationOptions {
        temperature: 0.1,
        top_p: 0.8,
        top_k: Some(20),
        max_output_tokens: 1024,
    }
}

/// The final synthesis gets a larger budget and a noticeably higher
/// temperature so the answer reads naturally.
pub fn synthesis_options() -> GenerationOptions {
    GenerationOptions {
        temperature: 0.7,
        top_p: 0.95,
        top_k: None,
        max_output_tokens: 4096,
    }
}

pub fn build_decision_prompt(
    ctx: &ExecutionContext,
    catalog: &[ToolDescriptor],
    limits: &RunLimits,
) -> String {
    let mut lines = vec![
        "You are the planning stage of an assistant that answers questions by calling \
         external tools."
            .to_string(),
        String::new(),
        format!("Original question: {}", ctx.user_query),
    ];

    if ctx.steps.is_empty() {
        lines.push("No steps have been executed yet.".to_string());
    } else {
        lines.push(String::new());
        lines.push("Steps executed so far:".to_string());
        for step in &ctx.steps {
            let produced = if step.result.is_some() {
                "produced data"
            } else {
                "no data"
            };
            lines.push(format!(
                "- {} [{} / {:?}] {} ({produced})",
                step.id,
                step.kind.as_str(),
                step.status,
                step.reasoning
            ));
            if step.status == StepStatus::Completed {
                if let Some(result) = &step.result {
                    let report = analyze_data_completeness(result, &ctx.user_query);
                    lines.push(format!("  data check: {}", report.describe()));
                }
            }
        }
    }

    if !ctx.context.is_empty() {
        lines.push(String::new());
        lines.push(
            "Accumulated results (complete; base further steps only on these):".to_string(),
        );
        lines.push(
            serde_json::to_string_pretty(&Value::Object(ctx.context.clone()))
                .unwrap_or_else(|_| "{}".to_string()),
        );
    }

    lines.push(String::new());
    if catalog.is_empty() {
        lines.push("No external tools are currently connected.".to_string());
    } else {
        lines.push("Available tools:".to_string());
        for descriptor in catalog {
            let description = descriptor
                .description
                .as_deref()
                .unwrap_or("No description.");
            lines.push(format!(
                "- {} (provider: {}): {description}",
                descriptor.name, descriptor.provider
            ));
        }
    }
    lines.push(
        "You can also issue a knowledge_query against the managed document corpus, or a \
         reasoning step to think over the data gathered so far."
            .to_string(),
    );

    let recent: Vec<&str> = ctx
        .recent_kinds(limits.max_similar_steps + 1)
        .into_iter()
        .map(|kind| kind.as_str())
        .collect();
    lines.push(String::new());
    lines.push(format!(
        "Run telemetry: consecutive failures {}; steps remaining {}; recent step types [{}]; \
         last step produced data: {}.",
        ctx.consecutive_failures,
        ctx.steps_remaining(limits),
        recent.join(", "),
        if ctx.last_step_result.is_some() {
            "yes"
        } else {
            "no"
        }
    ));
    lines.push(
        "Avoid repeating a step that already ran. When the accumulated results answer the \
         question, choose final_response."
            .to_string(),
    );

    lines.push(String::new());
    lines.push(
        "Respond with a single JSON object and no commentary: {\"type\":\"tool_call|\
         knowledge_query|reasoning|final_response\",\"tool\":\"...\",\"parameters\":{...},\
         \"query\":\"...\",\"reasoning\":\"...\",\"confidence\":0.0-1.0}."
            .to_string(),
    );

    lines.join("\n")
}

pub fn build_reasoning_prompt(purpose: &str, ctx: &ExecutionContext) -> String {
    let mut lines = vec![
        format!("Question being answered: {}", ctx.user_query),
        format!("Reasoning task: {purpose}"),
    ];
    if !ctx.context.is_empty() {
        lines.push("Data gathered so far:".to_string());
        lines.push(
            serde_json::to_string_pretty(&Value::Object(ctx.context.clone()))
                .unwrap_or_else(|_| "{}".to_string()),
        );
    }
    lines.push("Reply with your analysis as plain text.".to_string());
    lines.join("\n")
}

pub fn build_synthesis_prompt(
    ctx: &ExecutionContext,
    aggregate: &super::aggregate::AggregatedData,
) -> String {
    let mut lines = vec![
        "Compose the final answer for the user.".to_string(),
        String::new(),
        format!("Question: {}", ctx.user_query),
        format!("Data summary: {}", aggregate.summary),
    ];

    for entry in &aggregate.entries {
        lines.push(format!(
            "- {}: {} with {} item(s)",
            entry.label, entry.data_type, entry.item_count
        ));
    }

    lines.push(String::new());
    lines.push("Aggregated data (complete, not truncated):".to_string());
    lines.push(
        serde_json::to_string_pretty(&Value::Object(aggregate.data.clone()))
            .unwrap_or_else(|_| "{}".to_string()),
    );

    lines.push(String::new());
    lines.push("Steps taken:".to_string());
    for step in &ctx.steps {
        let note = match &step.error {
            Some(error) => format!(" (failed: {error})"),
            None => String::new(),
        };
        lines.push(format!(
            "- {} [{} / {:?}]{note}",
            step.id,
            step.kind.as_str(),
            step.status
        ));
    }
    lines.push(format!(
        "Run statistics: {} total steps, {} successful, {} failed, {} consecutive failures \
         at the end.",
        ctx.steps.len(),
        ctx.successful_count(),
        ctx.failed_count(),
        ctx.consecutive_failures
    ));

    lines.push(String::new());
    lines.push(
        "Answer the question directly. State the total number of items found. If the \
         question asked for all items but the data looks partial, say so explicitly. If any \
         steps failed, acknowledge that while still presenting the data that was gathered."
            .to_string(),
    );

    lines.join("\n")
}

/// The single seam where free-text model output becomes a structured
/// decision. Callers substitute [`StepDecision::fallback`] on any error.
pub fn parse_decision(content: &str) -> Result<StepDecision, DecisionParseError> {
    let value = extract_json(content).ok_or(DecisionParseError::NotJson)?;
    let map = match value {
        Value::Object(map) => map,
        _ => return Err(DecisionParseError::NotJson),
    };

    let raw_kind = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecisionParseError::MissingKind)?;
    let kind = StepKind::parse(raw_kind)
        .ok_or_else(|| DecisionParseError::UnknownKind(raw_kind.to_string()))?;

    let tool = map
        .get("tool")
        .and_then(Value::as_str)
        .map(|name| name.to_string());
    let query = map
        .get("query")
        .and_then(Value::as_str)
        .map(|text| text.to_string());
    let parameters = map.get("parameters").filter(|v| !v.is_null()).cloned();

    if kind == StepKind::ToolCall && tool.is_none() {
        return Err(DecisionParseError::MissingTool);
    }
    if kind == StepKind::KnowledgeQuery && query.is_none() {
        return Err(DecisionParseError::MissingQuery);
    }

    let reasoning = map
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("No reasoning provided")
        .to_string();
    let confidence = map
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(super::models::FALLBACK_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(StepDecision {
        kind,
        tool,
        parameters,
        query,
        reasoning,
        confidence,
    })
}

fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if trimmed.starts_with("```") {
        let stripped = trimmed.trim_start_matches("```json");
        let stripped = stripped.trim_start_matches("```JSON");
        let stripped = stripped.trim_start_matches("```");
        if let Some(end) = stripped.rfind("```") {
            let slice = &stripped[..end];
            if let Ok(value) = serde_json::from_str::<Value>(slice.trim()) {
                return Some(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            let candidate = &trimmed[start..=end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_direct_json_decision() {
        let decision = parse_decision(
            r#"{"type":"tool_call","tool":"list_projects","parameters":{},"reasoning":"enumerate","confidence":0.9}"#,
        )
        .expect("valid decision");
        assert_eq!(decision.kind, StepKind::ToolCall);
        assert_eq!(decision.tool.as_deref(), Some("list_projects"));
        assert_eq!(decision.confidence, 0.9);
    }

    #[test]
    fn parses_fenced_decision() {
        let content = "```json\n{\"type\":\"final_response\",\"reasoning\":\"done\",\"confidence\":0.95}\n```";
        let decision = parse_decision(content).expect("valid decision");
        assert_eq!(decision.kind, StepKind::FinalResponse);
    }

    #[test]
    fn parses_decision_wrapped_in_prose() {
        let content = r#"Sure, here is my plan: {"type":"knowledge_query","query":"release policy","reasoning":"check docs","confidence":0.8} hope that helps"#;
        let decision = parse_decision(content).expect("valid decision");
        assert_eq!(decision.kind, StepKind::KnowledgeQuery);
        assert_eq!(decision.query.as_deref(), Some("release policy"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_decision("I have no idea what to do"),
            Err(DecisionParseError::NotJson)
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(matches!(
            parse_decision(r#"{"type":"teleport","confidence":1.0}"#),
            Err(DecisionParseError::UnknownKind(_))
        ));
    }

    #[test]
    fn rejects_tool_call_without_tool() {
        assert!(matches!(
            parse_decision(r#"{"type":"tool_call","confidence":0.9}"#),
            Err(DecisionParseError::MissingTool)
        ));
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        let decision =
            parse_decision(r#"{"type":"reasoning","reasoning":"think","confidence":7.5}"#)
                .expect("valid decision");
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn decision_prompt_carries_query_tools_and_telemetry() {
        let ctx = crate::application::agent::ExecutionContext::new("list all projects");
        let catalog = vec![ToolDescriptor {
            name: "list_projects".into(),
            description: Some("Enumerate tracked projects.".into()),
            provider: "tracker".into(),
            input_schema: None,
        }];
        let prompt = build_decision_prompt(&ctx, &catalog, &RunLimits::default());

        assert!(prompt.contains("list all projects"));
        assert!(prompt.contains("list_projects (provider: tracker)"));
        assert!(prompt.contains("consecutive failures 0"));
        assert!(prompt.contains("steps remaining 8"));
    }

    #[test]
    fn decision_prompt_includes_full_context() {
        let mut ctx = crate::application::agent::ExecutionContext::new("query");
        ctx.context
            .insert("step_1".to_string(), json!(["alpha", "beta"]));
        let prompt = build_decision_prompt(&ctx, &[], &RunLimits::default());
        assert!(prompt.contains("alpha"));
        assert!(prompt.contains("beta"));
    }
}
