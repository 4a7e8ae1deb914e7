// crates/taskloom-providers/src/http.rs
// ============================================================================
// Module: HTTP Executor
// Description: `Executor` implementation that delegates stage execution to an
//              external agent process over a blocking HTTP request.
// Purpose: Implement the JSON request/response protocol an external agent
//          executor process exposes over HTTP.
// Dependencies: reqwest (blocking), serde, serde_json, taskloom-core
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use taskloom_core::ExecutionRequest;
use taskloom_core::ExecutionResult;
use taskloom_core::Executor;
use taskloom_core::ExecutorError;
use taskloom_core::GateRejectionContext;
use taskloom_core::RetryContext;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for [`HttpExecutor`].
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Base URL of the agent executor service, e.g. `http://127.0.0.1:8700`.
    pub base_url: String,
    /// Additional request timeout margin added on top of a stage's own
    /// configured timeout, to allow for network round trips.
    pub timeout_margin_secs: u64,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
            timeout_margin_secs: 5,
        }
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ExecuteRequestBody<'a> {
    instruction: &'a str,
    context: &'a str,
    agent_role: &'a str,
    model_override: Option<&'a str>,
    max_turns: u32,
    timeout_secs: u64,
    workspace_path: Option<&'a str>,
    retry_context: Option<&'a RetryContext>,
    gate_rejection_context: Option<&'a GateRejectionContext>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponseBody {
    output_text: String,
    tokens_used: u64,
    turns_used: u32,
    cost_cents: u64,
}

#[derive(Debug, Deserialize)]
struct ExecuteErrorBody {
    kind: String,
    message: String,
}

// ============================================================================
// SECTION: HttpExecutor
// ============================================================================

/// Delegates stage execution to an agent executor reachable over HTTP.
pub struct HttpExecutor {
    client: reqwest::blocking::Client,
    config: HttpExecutorConfig,
}

impl HttpExecutor {
    /// Builds a new executor, constructing its own blocking HTTP client.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Unavailable`] if the client cannot be built.
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutorError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|error| ExecutorError::Unavailable(error.to_string()))?;
        Ok(Self { client, config })
    }
}

impl Executor for HttpExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        let body = ExecuteRequestBody {
            instruction: &request.instruction,
            context: &request.context,
            agent_role: &request.agent_role,
            model_override: request.model_override.as_deref(),
            max_turns: request.max_turns,
            timeout_secs: request.timeout_secs,
            workspace_path: request.workspace_path.as_deref(),
            retry_context: request.retry_context.as_ref(),
            gate_rejection_context: request.gate_rejection_context.as_ref(),
        };

        let timeout = Duration::from_secs(request.timeout_secs + self.config.timeout_margin_secs);
        let url = format!("{}/v1/execute", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|error| {
                if error.is_timeout() {
                    ExecutorError::Timeout(request.timeout_secs)
                } else {
                    ExecutorError::Unavailable(error.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.json::<ExecuteErrorBody>().ok();
            return Err(match error_body {
                Some(body) if body.kind == "max_turns_exceeded" => ExecutorError::MaxTurnsExceeded,
                Some(body) => ExecutorError::ToolFailure(format!("{} ({status}): {}", body.kind, body.message)),
                None => ExecutorError::Unavailable(format!("executor returned {status}")),
            });
        }

        let parsed: ExecuteResponseBody = response
            .json()
            .map_err(|error| ExecutorError::ToolFailure(format!("malformed executor response: {error}")))?;

        Ok(ExecutionResult {
            output_text: parsed.output_text,
            tokens_used: parsed.tokens_used,
            turns_used: parsed.turns_used,
            cost_cents: parsed.cost_cents,
        })
    }
}
