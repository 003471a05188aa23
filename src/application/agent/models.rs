use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_STEPS: usize = 8;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_MAX_SIMILAR_STEPS: usize = 2;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

/// Confidence attached to the synthetic decision substituted when the
/// planner output cannot be interpreted. Sits below
/// [`DEFAULT_MIN_CONFIDENCE`], so a parse failure always ends the run.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    KnowledgeQuery,
    Reasoning,
    FinalResponse,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ToolCall => "tool_call",
            StepKind::KnowledgeQuery => "knowledge_query",
            StepKind::Reasoning => "reasoning",
            StepKind::FinalResponse => "final_response",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "tool_call" => Some(StepKind::ToolCall),
            "knowledge_query" => Some(StepKind::KnowledgeQuery),
            "reasoning" => Some(StepKind::Reasoning),
            "final_response" => Some(StepKind::FinalResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// One planned-and-executed unit of work. Appended to the run's step list
/// before execution and mutated in place as execution resolves; never
/// removed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub id: String,
    pub kind: StepKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub reasoning: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionStep {
    /// Consumes a planner decision into a step about to execute. Step ids
    /// are sequence-scoped: `step_1`, `step_2`, ...
    pub fn from_decision(decision: StepDecision, index: usize) -> Self {
        Self {
            id: format!("step_{}", index + 1),
            kind: decision.kind,
            tool: decision.tool,
            parameters: decision.parameters,
            query: decision.query,
            reasoning: decision.reasoning,
            status: StepStatus::Executing,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn complete(&mut self, result: Value) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
    }
}

/// The planner's proposed next action. Lives only for the iteration that
/// consumes it.
#[derive(Debug, Clone)]
pub struct StepDecision {
    pub kind: StepKind,
    pub tool: Option<String>,
    pub parameters: Option<Value>,
    pub query: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
}

impl StepDecision {
    /// Safe terminal decision substituted when the planner call fails or
    /// returns something unparseable.
    pub fn fallback(reason: &str) -> Self {
        Self {
            kind: StepKind::FinalResponse,
            tool: None,
            parameters: None,
            query: None,
            reasoning: format!("Concluding with the data gathered so far: {reason}"),
            confidence: FALLBACK_CONFIDENCE,
        }
    }

    /// Canonical encoding used to detect a repeated plan within one run.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.kind.as_str(),
            self.tool.as_deref().unwrap_or(""),
            self.query.as_deref().unwrap_or(""),
            self.parameters
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default()
        )
    }
}

/// Runtime-tunable thresholds governing when a run stops.
#[derive(Debug, Clone)]
pub struct RunLimits {
    pub max_steps: usize,
    pub max_consecutive_failures: u32,
    pub max_similar_steps: usize,
    pub min_confidence: f64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_similar_steps: DEFAULT_MAX_SIMILAR_STEPS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl RunLimits {
    /// Applies only the fields present in the override, leaving the rest
    /// untouched.
    pub fn apply(&mut self, overrides: &LimitOverrides) {
        if let Some(value) = overrides.max_steps {
            self.max_steps = value;
        }
        if let Some(value) = overrides.max_consecutive_failures {
            self.max_consecutive_failures = value;
        }
        if let Some(value) = overrides.max_similar_steps {
            self.max_similar_steps = value;
        }
        if let Some(value) = overrides.min_confidence {
            self.min_confidence = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitOverrides {
    pub max_steps: Option<usize>,
    pub max_consecutive_failures: Option<u32>,
    pub max_similar_steps: Option<usize>,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Stopped,
    Exhausted,
}

/// What one query run produced. The answer is always populated, even when
/// the run degraded along the way.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub answer: String,
    pub state: RunState,
    pub steps: Vec<ExecutionStep>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_encodes_all_decision_fields() {
        let decision = StepDecision {
            kind: StepKind::ToolCall,
            tool: Some("search_issues".into()),
            parameters: Some(json!({"project": "OPS"})),
            query: None,
            reasoning: "look up open issues".into(),
            confidence: 0.9,
        };
        assert_eq!(
            decision.signature(),
            r#"tool_call:search_issues::{"project":"OPS"}"#
        );
    }

    #[test]
    fn limit_overrides_apply_independently() {
        let mut limits = RunLimits::default();
        limits.apply(&LimitOverrides {
            max_steps: Some(3),
            ..LimitOverrides::default()
        });
        assert_eq!(limits.max_steps, 3);
        assert_eq!(
            limits.max_consecutive_failures,
            DEFAULT_MAX_CONSECUTIVE_FAILURES
        );
        assert_eq!(limits.max_similar_steps, DEFAULT_MAX_SIMILAR_STEPS);
        assert_eq!(limits.min_confidence, DEFAULT_MIN_CONFIDENCE);

        limits.apply(&LimitOverrides {
            min_confidence: Some(0.5),
            ..LimitOverrides::default()
        });
        assert_eq!(limits.max_steps, 3);
        assert_eq!(limits.min_confidence, 0.5);
    }

    #[test]
    fn fallback_confidence_sits_below_default_floor() {
        let decision = StepDecision::fallback("planner unavailable");
        assert_eq!(decision.kind, StepKind::FinalResponse);
        assert!(decision.confidence < DEFAULT_MIN_CONFIDENCE);
    }

    #[test]
    fn step_status_transitions_are_terminal() {
        let decision = StepDecision {
            kind: StepKind::Reasoning,
            tool: None,
            parameters: None,
            query: None,
            reasoning: "think".into(),
            confidence: 0.8,
        };
        let mut step = ExecutionStep::from_decision(decision, 0);
        assert_eq!(step.id, "step_1");
        assert_eq!(step.status, StepStatus::Executing);

        step.complete(json!("insight"));
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.error.is_none());
    }
}
