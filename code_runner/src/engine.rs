use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use util::config;

use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, decode_events};

/// Body of a test run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRequest {
    #[serde(rename = "type")]
    pub mode: String,
    pub code: String,
    /// Inputs of the active test cases, in order.
    pub testcases: Vec<String>,
    pub question_id: i64,
    pub student_id: i64,
}

impl ExecutionRequest {
    pub fn test(
        code: impl Into<String>,
        testcases: Vec<String>,
        question_id: i64,
        student_id: i64,
    ) -> Self {
        Self {
            mode: "test".into(),
            code: code.into(),
            testcases,
            question_id,
            student_id,
        }
    }
}

/// Something that can run student code against test inputs.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<ExecutionEvent>, ExecutionError>;
}

/// Execution engine reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExecutionEngine {
    client: Client,
    base_url: String,
}

impl HttpExecutionEngine {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExecutionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Engine at `EXECUTION_ENGINE_URL` with `EXECUTION_TIMEOUT_SECS`.
    pub fn from_config() -> Result<Self, ExecutionError> {
        Self::new(
            config::execution_engine_url(),
            Duration::from_secs(config::execution_timeout_secs()),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ExecutionEngine for HttpExecutionEngine {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<ExecutionEvent>, ExecutionError> {
        let url = format!("{}/test", self.base_url);
        let resp = self.client.post(&url).json(request).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ExecutionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        decode_events(&body)
    }
}

/// Runs `request` and always returns an event list.
///
/// Engine failures become a single `error` event so a failed call grades the
/// same way as code that produced no passing tests.
pub async fn run_tests(
    engine: &dyn ExecutionEngine,
    request: &ExecutionRequest,
) -> Vec<ExecutionEvent> {
    match engine.execute(request).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(
                question_id = request.question_id,
                student_id = request.student_id,
                error = %e,
                "Execution engine call failed"
            );
            vec![ExecutionEvent::Error {
                content: e.to_string(),
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl ExecutionEngine for Unreachable {
        async fn execute(
            &self,
            _request: &ExecutionRequest,
        ) -> Result<Vec<ExecutionEvent>, ExecutionError> {
            Err(ExecutionError::Transport("connection refused".into()))
        }
    }

    #[test]
    fn request_uses_engine_field_names() {
        let req = ExecutionRequest::test("print(1)", vec!["assert True".into()], 9, 4);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "test",
                "code": "print(1)",
                "testcases": ["assert True"],
                "question_id": 9,
                "student_id": 4
            })
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let engine =
            HttpExecutionEngine::new("http://engine:8001/", Duration::from_secs(1)).unwrap();
        assert_eq!(engine.base_url(), "http://engine:8001");
    }

    #[tokio::test]
    async fn run_tests_folds_errors_into_one_event() {
        let req = ExecutionRequest::test("x = 1", vec![], 1, 2);
        let events = run_tests(&Unreachable, &req).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ExecutionEvent::Error { content } => assert!(content.contains("connection refused")),
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
