//! Fault-injection tools. Each call deterministically ends in one outcome
//! class: soft failure, structured hard failure, permanent suspension, or a
//! success after a caller-chosen delay.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::typed_args;
use crate::context::RequestContext;
use crate::envelope::{ToolError, ToolOutput};
use crate::registry::{RegistryError, ToolContract, ToolHandler, ToolRegistry};

const MODULE: &str = "faulty";

pub const HARD_FAILURE_RETRY_AFTER_SECS: u64 = 30;

pub fn register(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        ToolContract::new(
            MODULE,
            "simulate_api_error",
            "Error propagation probe (soft_fail / hard_500 / timeout / auth_fail).",
            SimulateApiError,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["soft_fail", "hard_500", "timeout", "auth_fail"]
                }
            },
            "required": ["type"]
        })),
    )?;

    registry.register(
        ToolContract::new(
            MODULE,
            "slow_operation",
            "Completes after the given number of seconds (hub timeout/cancellation probe).",
            SlowOperation,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "seconds": { "type": "number", "minimum": 0 }
            },
            "required": ["seconds"]
        })),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FaultMode {
    #[serde(rename = "soft_fail")]
    SoftFail,
    #[serde(rename = "hard_500")]
    HardFail,
    #[serde(rename = "auth_fail")]
    AuthFail,
    #[serde(rename = "timeout")]
    Timeout,
}

#[derive(Debug, Deserialize)]
struct SimulateArgs {
    #[serde(rename = "type")]
    mode: FaultMode,
}

pub fn soft_fail() -> ToolOutput {
    ToolOutput::text("The search returned 0 results.")
}

pub fn hard_fail() -> ToolError {
    ToolError::internal("Backend API Service is down (503)")
        .with_meta("retry_after", HARD_FAILURE_RETRY_AFTER_SECS)
        .with_meta("retryable", true)
}

pub fn auth_fail() -> ToolError {
    ToolError::invalid_request("Authentication failed")
        .with_meta("reason", "token_expired")
        .with_meta("action", "refresh_token")
}

/// Never resolves. Termination is the caller's business.
pub async fn suspend_forever<T>() -> T {
    std::future::pending().await
}

struct SimulateApiError;

#[async_trait]
impl ToolHandler for SimulateApiError {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let SimulateArgs { mode } = typed_args(args)?;
        match mode {
            FaultMode::SoftFail => Ok(soft_fail()),
            FaultMode::HardFail => Err(hard_fail()),
            FaultMode::AuthFail => Err(auth_fail()),
            FaultMode::Timeout => {
                tracing::debug!(event = "tool_suspended", tool = "simulate_api_error");
                suspend_forever().await
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlowArgs {
    seconds: f64,
}

struct SlowOperation;

#[async_trait]
impl ToolHandler for SlowOperation {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let SlowArgs { seconds } = typed_args(args)?;
        let delay = Duration::try_from_secs_f64(seconds).map_err(|err| {
            ToolError::invalid_request(format!("Unusable delay: {err}"))
                .with_meta("seconds", seconds)
        })?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolOutput::text(format!(
            "Completed after {} seconds",
            format_seconds(seconds)
        )))
    }
}

/// Renders whole numbers without a fraction, like `0` or `5`.
pub(crate) fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 && seconds.abs() < 1e15 {
        format!("{}", seconds as i64)
    } else {
        format!("{seconds}")
    }
}
