use super::models::ExecutionStep;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub label: String,
    pub data_type: String,
    pub item_count: usize,
}

/// Every completed step's result folded into one object for the final
/// synthesis prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedData {
    pub data: Map<String, Value>,
    pub entries: Vec<EntrySummary>,
    pub total_items: usize,
    pub summary: String,
}

/// Merges completed step results, keyed `step_<n>_<kind>`. Consecutive list
/// results are concatenated into the earliest list entry so the final answer
/// sees one combined list instead of fragmented chunks.
pub fn aggregate_results(steps: &[ExecutionStep]) -> AggregatedData {
    let mut data = Map::new();
    let mut merged_list_label: Option<String> = None;
    let mut aggregated_steps = 0usize;

    for step in steps {
        let Some(result) = step.result.as_ref() else {
            continue;
        };
        aggregated_steps += 1;
        let label = format!("{}_{}", step.id, step.kind.as_str());

        match result {
            Value::Array(items) => match merged_list_label.as_ref() {
                Some(existing_label) => {
                    if let Some(Value::Array(existing)) = data.get_mut(existing_label) {
                        existing.extend(items.iter().cloned());
                    }
                }
                None => {
                    data.insert(label.clone(), Value::Array(items.clone()));
                    merged_list_label = Some(label);
                }
            },
            other => {
                data.insert(label, other.clone());
            }
        }
    }

    let entries: Vec<EntrySummary> = data
        .iter()
        .map(|(label, value)| EntrySummary {
            label: label.clone(),
            data_type: value_type(value).to_string(),
            item_count: value_count(value),
        })
        .collect();
    let total_items: usize = entries.iter().map(|entry| entry.item_count).sum();

    let described: Vec<String> = entries
        .iter()
        .map(|entry| {
            format!(
                "{} ({}, {} item(s))",
                entry.label, entry.data_type, entry.item_count
            )
        })
        .collect();
    let summary = format!(
        "Aggregated {} steps: {} - Total items: {}",
        aggregated_steps,
        if described.is_empty() {
            "no data".to_string()
        } else {
            described.join(", ")
        },
        total_items
    );

    AggregatedData {
        data,
        entries,
        total_items,
        summary,
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "list",
        Value::Object(_) => "object",
        Value::String(_) => "text",
        Value::Null => "empty",
        _ => "value",
    }
}

fn value_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent::models::{StepDecision, StepKind};
    use serde_json::json;

    fn completed_step(index: usize, kind: StepKind, result: Value) -> ExecutionStep {
        let decision = StepDecision {
            kind,
            tool: None,
            parameters: None,
            query: None,
            reasoning: "test".into(),
            confidence: 0.9,
        };
        let mut step = ExecutionStep::from_decision(decision, index);
        step.complete(result);
        step
    }

    fn failed_step(index: usize) -> ExecutionStep {
        let decision = StepDecision {
            kind: StepKind::ToolCall,
            tool: Some("broken".into()),
            parameters: None,
            query: None,
            reasoning: "test".into(),
            confidence: 0.9,
        };
        let mut step = ExecutionStep::from_decision(decision, index);
        step.fail("boom");
        step
    }

    #[test]
    fn two_list_results_merge_into_one() {
        let steps = vec![
            completed_step(0, StepKind::ToolCall, json!(["a", "b"])),
            completed_step(1, StepKind::ToolCall, json!(["c"])),
        ];
        let aggregate = aggregate_results(&steps);

        assert_eq!(aggregate.data.len(), 1);
        assert_eq!(
            aggregate.data.get("step_1_tool_call"),
            Some(&json!(["a", "b", "c"]))
        );
        assert_eq!(aggregate.total_items, 3);
    }

    #[test]
    fn mixed_results_keep_their_own_entries() {
        let steps = vec![
            completed_step(0, StepKind::ToolCall, json!(["a"])),
            completed_step(1, StepKind::Reasoning, json!("the list looks short")),
            completed_step(2, StepKind::ToolCall, json!(["b", "c"])),
        ];
        let aggregate = aggregate_results(&steps);

        assert_eq!(aggregate.data.len(), 2);
        assert_eq!(
            aggregate.data.get("step_1_tool_call"),
            Some(&json!(["a", "b", "c"]))
        );
        assert_eq!(
            aggregate.data.get("step_2_reasoning"),
            Some(&json!("the list looks short"))
        );
        assert_eq!(aggregate.total_items, 4);
    }

    #[test]
    fn failed_steps_are_excluded() {
        let steps = vec![
            failed_step(0),
            completed_step(1, StepKind::KnowledgeQuery, json!("answer")),
        ];
        let aggregate = aggregate_results(&steps);

        assert_eq!(aggregate.data.len(), 1);
        assert!(aggregate.data.contains_key("step_2_knowledge_query"));
        assert!(aggregate.summary.starts_with("Aggregated 1 steps:"));
    }

    #[test]
    fn summary_reports_totals() {
        let steps = vec![completed_step(0, StepKind::ToolCall, json!([1, 2, 3, 4]))];
        let aggregate = aggregate_results(&steps);
        assert!(aggregate.summary.contains("Total items: 4"));
        assert!(aggregate.summary.contains("step_1_tool_call (list, 4 item(s))"));
    }

    #[test]
    fn empty_run_aggregates_to_nothing() {
        let aggregate = aggregate_results(&[]);
        assert!(aggregate.data.is_empty());
        assert_eq!(aggregate.total_items, 0);
        assert!(aggregate.summary.contains("no data"));
    }
}
