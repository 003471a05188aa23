use serde::Serialize;
use serde_json::Value;

/// Pagination-indicator key names observed in issue tracker and wiki
/// responses. Matched exactly, after the generic "page"/"cursor" scan.
const PAGINATION_METADATA_KEYS: [&str; 5] =
    ["totalCount", "totalSize", "hasMore", "nextPage", "isLastPage"];

const SMALL_RESULT_THRESHOLD: usize = 5;
const COMPLEX_OBJECT_KEY_THRESHOLD: usize = 10;

/// Deterministic estimate of whether a result payload looks like the full
/// answer or a truncated page. Purely advisory: the loop logs it and the
/// planner reads it on its next call, but it never alters control flow on
/// its own.
#[derive(Debug, Clone, Serialize)]
pub struct CompletenessReport {
    pub data_type: String,
    pub item_count: usize,
    pub is_complete: bool,
    pub has_pagination: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl CompletenessReport {
    fn single_item(data_type: &str) -> Self {
        Self {
            data_type: data_type.to_string(),
            item_count: 1,
            is_complete: true,
            has_pagination: false,
            suggestions: Vec::new(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            data_type: "unknown".to_string(),
            item_count: 0,
            is_complete: true,
            has_pagination: false,
            suggestions: Vec::new(),
        }
    }

    /// One-line rendering for step summaries in planner prompts.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!(
            "{} with {} item(s), complete={}",
            self.data_type, self.item_count, self.is_complete
        )];
        if self.has_pagination {
            parts.push("pagination indicators present".to_string());
        }
        for suggestion in &self.suggestions {
            parts.push(suggestion.clone());
        }
        parts.join("; ")
    }
}

pub fn analyze_data_completeness(data: &Value, original_query: &str) -> CompletenessReport {
    match data {
        Value::Array(items) => analyze_sequence(items, original_query),
        Value::Object(map) => {
            // A single key wrapping a sequence is treated as that sequence.
            if map.len() == 1 {
                if let Some(Value::Array(items)) = map.values().next() {
                    return analyze_sequence(items, original_query);
                }
            }

            let mut report = CompletenessReport::single_item("object");
            if map.len() > COMPLEX_OBJECT_KEY_THRESHOLD {
                report
                    .suggestions
                    .push("complex object, may contain nested data".to_string());
            }
            if map
                .keys()
                .any(|key| PAGINATION_METADATA_KEYS.contains(&key.as_str()))
            {
                report.has_pagination = true;
                report
                    .suggestions
                    .push("result carries pagination metadata; more pages may exist".to_string());
            }
            report
        }
        Value::Null => CompletenessReport::unknown(),
        Value::String(_) => CompletenessReport::single_item("text"),
        _ => CompletenessReport::single_item("value"),
    }
}

fn analyze_sequence(items: &[Value], original_query: &str) -> CompletenessReport {
    let mut report = CompletenessReport {
        data_type: "list".to_string(),
        item_count: items.len(),
        is_complete: true,
        has_pagination: false,
        suggestions: Vec::new(),
    };

    let paginated = items.iter().any(|item| {
        item.as_object()
            .map(|map| map.keys().any(|key| is_pagination_key(key)))
            .unwrap_or(false)
    });
    if paginated {
        report.has_pagination = true;
        report
            .suggestions
            .push("items carry pagination fields; further queries may be needed".to_string());
    }

    if wants_everything(original_query) && items.len() <= SMALL_RESULT_THRESHOLD {
        report.is_complete = false;
        report.suggestions.push(format!(
            "the query asked for all results but only {} item(s) were returned",
            items.len()
        ));
    }

    report
}

fn is_pagination_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    lowered.contains("page")
        || lowered.contains("cursor")
        || key == "nextPageToken"
        || key == "hasMore"
        || key == "startAt"
}

fn wants_everything(query: &str) -> bool {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "all")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_list_is_incomplete_when_query_asks_for_all() {
        let report = analyze_data_completeness(&json!([1, 2, 3]), "show me all tickets");
        assert_eq!(report.data_type, "list");
        assert_eq!(report.item_count, 3);
        assert!(!report.is_complete);
        assert!(!report.suggestions.is_empty());
    }

    #[test]
    fn small_list_stays_complete_without_all() {
        let report = analyze_data_completeness(&json!([1, 2, 3]), "show me open tickets");
        assert!(report.is_complete);
    }

    #[test]
    fn wrapped_list_is_unwrapped_through_single_key() {
        let items: Vec<_> = (0..10).map(|n| json!({"id": n})).collect();
        let report = analyze_data_completeness(&json!({ "items": items }), "list issues");
        assert_eq!(report.data_type, "list");
        assert_eq!(report.item_count, 10);
        assert!(!report.has_pagination);
    }

    #[test]
    fn pagination_fields_inside_elements_are_flagged() {
        let data = json!([{"id": 1, "nextPageToken": "abc"}]);
        let report = analyze_data_completeness(&data, "find tickets");
        assert!(report.has_pagination);
    }

    #[test]
    fn cursor_keys_are_detected_case_insensitively() {
        let data = json!([{"id": 1, "endCursor": "xyz"}]);
        let report = analyze_data_completeness(&data, "find tickets");
        assert!(report.has_pagination);
    }

    #[test]
    fn object_with_pagination_metadata_is_flagged() {
        let data = json!({"values": [1, 2], "isLastPage": false});
        let report = analyze_data_completeness(&data, "search");
        assert_eq!(report.data_type, "object");
        assert!(report.has_pagination);
    }

    #[test]
    fn wide_object_is_called_out_as_complex() {
        let mut map = serde_json::Map::new();
        for n in 0..12 {
            map.insert(format!("field_{n}"), json!(n));
        }
        let report = analyze_data_completeness(&Value::Object(map), "inspect");
        assert!(
            report
                .suggestions
                .iter()
                .any(|s| s.contains("complex object"))
        );
    }

    #[test]
    fn scalar_counts_as_single_complete_item() {
        let report = analyze_data_completeness(&json!(42), "what is the answer");
        assert_eq!(report.item_count, 1);
        assert!(report.is_complete);
    }

    #[test]
    fn all_matches_whole_words_only() {
        assert!(wants_everything("List ALL projects"));
        assert!(!wants_everything("list allocated projects"));
    }
}
