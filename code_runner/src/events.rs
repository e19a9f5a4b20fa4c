//! Output events produced by the execution engine.
//!
//! The engine replies with a JSON array of objects tagged by `type`:
//!
//! ```json
//! [
//!   { "type": "text", "content": "hello" },
//!   { "type": "test_stats", "total_tests": 3, "success": 2, "fail": 1 },
//!   { "type": "code_metrics", "variable_count": 4, "function_count": 1 }
//! ]
//! ```
//!
//! Only `test_stats` drives grading. Unrecognized tags decode to
//! [`ExecutionEvent::Unknown`] so new engine output does not break decoding.
//! Missing numeric fields default to zero.

use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// One event from the engine's output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Text {
        #[serde(default)]
        content: String,
    },
    /// Encoded image, e.g. a plot.
    Image {
        #[serde(default)]
        content: String,
    },
    Error {
        #[serde(default)]
        content: String,
    },
    TestStats(TestStats),
    /// Per-test detail. Display only.
    TestResult {
        #[serde(default)]
        status: String,
        #[serde(default)]
        content: String,
    },
    CodeMetrics {
        #[serde(default)]
        variable_count: u32,
        #[serde(default)]
        function_count: u32,
    },
    #[serde(other)]
    Unknown,
}

/// Aggregate pass/fail counts for a submitted test batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStats {
    #[serde(default, alias = "total_tests")]
    pub total: u32,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub fail: u32,
}

/// Decodes a raw engine response body.
///
/// The top level must be an array. An element with a known tag whose body
/// does not match that tag's shape fails the whole decode.
pub fn decode_events(body: &str) -> Result<Vec<ExecutionEvent>, ExecutionError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ExecutionError::MalformedPayload(format!("invalid JSON: {e}")))?;

    if !value.is_array() {
        return Err(ExecutionError::MalformedPayload(
            "expected an array of events".into(),
        ));
    }

    serde_json::from_value(value).map_err(|e| ExecutionError::MalformedPayload(e.to_string()))
}

/// The first `test_stats` event, if the engine produced one.
pub fn test_stats(events: &[ExecutionEvent]) -> Option<TestStats> {
    events.iter().find_map(|event| match event {
        ExecutionEvent::TestStats(stats) => Some(*stats),
        _ => None,
    })
}

/// Content of the first `error` event.
pub fn first_error(events: &[ExecutionEvent]) -> Option<&str> {
    events.iter().find_map(|event| match event {
        ExecutionEvent::Error { content } => Some(content.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_mixed_stream() {
        let body = r#"[
            {"type": "text", "content": "Running 2 tests"},
            {"type": "image", "content": "iVBORw0KGgo="},
            {"type": "test_result", "status": "passed", "content": "test_sum"},
            {"type": "test_stats", "total_tests": 2, "success": 1, "fail": 1},
            {"type": "code_metrics", "variable_count": 3, "function_count": 1}
        ]"#;

        let events = decode_events(body).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            ExecutionEvent::Text {
                content: "Running 2 tests".into()
            }
        );
        assert_eq!(
            events[4],
            ExecutionEvent::CodeMetrics {
                variable_count: 3,
                function_count: 1
            }
        );
        assert_eq!(
            test_stats(&events),
            Some(TestStats {
                total: 2,
                success: 1,
                fail: 1
            })
        );
    }

    #[test]
    fn accepts_total_under_either_name() {
        let events =
            decode_events(r#"[{"type": "test_stats", "total": 4, "success": 4}]"#).unwrap();
        let stats = test_stats(&events).unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.success, 4);
        assert_eq!(stats.fail, 0);
    }

    #[test]
    fn unknown_tags_are_kept_as_unknown() {
        let raw = r#"[{"type": "input", "prompt": "name?"}, {"type": "error", "content": "boom"}]"#;
        let events = decode_events(raw).unwrap();
        assert_eq!(events[0], ExecutionEvent::Unknown);
        assert_eq!(first_error(&events), Some("boom"));
        assert_eq!(test_stats(&events), None);
    }

    #[test]
    fn first_test_stats_wins() {
        let events = decode_events(
            r#"[{"type": "test_stats", "total_tests": 1, "success": 0},
                {"type": "test_stats", "total_tests": 1, "success": 1}]"#,
        )
        .unwrap();
        assert_eq!(test_stats(&events).unwrap().success, 0);
    }

    #[test]
    fn rejects_non_array_body() {
        let err = decode_events(r#"{"type": "text", "content": "hi"}"#).unwrap_err();
        assert!(matches!(err, ExecutionError::MalformedPayload(_)));

        let err = decode_events("not json").unwrap_err();
        assert!(matches!(err, ExecutionError::MalformedPayload(_)));
    }

    #[test]
    fn rejects_known_tag_with_bad_body() {
        let err = decode_events(r#"[{"type": "test_stats", "success": "lots"}]"#).unwrap_err();
        assert!(matches!(err, ExecutionError::MalformedPayload(_)));
    }

    #[test]
    fn empty_array_has_no_stats() {
        let events = decode_events("[]").unwrap();
        assert!(events.is_empty());
        assert_eq!(test_stats(&events), None);
    }
}
