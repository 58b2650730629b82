//! Stateful isolation probes over the shared [`ProbeState`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{now_rfc3339, typed_args};
use crate::context::RequestContext;
use crate::envelope::{ToolError, ToolOutput};
use crate::registry::{RegistryError, ToolContract, ToolHandler, ToolRegistry};
use crate::state::{ProbeState, ServerStatus};

const MODULE: &str = "ops";

pub fn register(registry: &mut ToolRegistry, state: Arc<ProbeState>) -> Result<(), RegistryError> {
    registry.register(
        ToolContract::new(
            MODULE,
            "set_server_status",
            "Switches the server status between active and inactive for testing.",
            SetServerStatus {
                state: state.clone(),
            },
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "enum": ["active", "inactive"] }
            },
            "required": ["status"]
        })),
    )?;

    registry.register(ToolContract::new(
        MODULE,
        "status_aware_tool",
        "Fails while the server status is inactive.",
        StatusAwareTool {
            state: state.clone(),
        },
    ))?;

    registry.register(
        ToolContract::new(
            MODULE,
            "concurrent_test",
            "Concurrency and isolation probe: holds a slot for `delay` seconds.",
            ConcurrentTest { state },
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "delay": { "type": "number", "minimum": 0 }
            },
            "required": ["delay"]
        })),
    )?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StatusArgs {
    status: ServerStatus,
}

struct SetServerStatus {
    state: Arc<ProbeState>,
}

#[async_trait]
impl ToolHandler for SetServerStatus {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let StatusArgs { status } = typed_args(args)?;
        let status = self.state.set_status(status);
        tracing::info!(event = "server_status_changed", status = status.as_str());
        Ok(ToolOutput::json(&json!({ "status": status })))
    }
}

struct StatusAwareTool {
    state: Arc<ProbeState>,
}

#[async_trait]
impl ToolHandler for StatusAwareTool {
    async fn call(
        &self,
        _args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let status = self.state.status();
        if status != ServerStatus::Active {
            return Err(ToolError::invalid_request("Server is inactive")
                .with_meta("status", status.as_str()));
        }
        Ok(ToolOutput::text(format!(
            "Server is operating normally - {}",
            now_rfc3339()
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ConcurrentArgs {
    delay: f64,
}

struct ConcurrentTest {
    state: Arc<ProbeState>,
}

#[async_trait]
impl ToolHandler for ConcurrentTest {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let ConcurrentArgs { delay } = typed_args(args)?;
        let delay = Duration::try_from_secs_f64(delay).map_err(|err| {
            ToolError::invalid_request(format!("Unusable delay: {err}")).with_meta("delay", delay)
        })?;

        let slot = self.state.enter();
        tokio::time::sleep(delay).await;
        let snapshot = slot.snapshot();
        drop(slot);

        Ok(ToolOutput::json(&json!({
            "activeRequests": snapshot.active_requests,
            "maxConcurrent": snapshot.max_concurrent,
            "timestamp": now_rfc3339(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use tokio::task::JoinSet;

    use super::*;
    use crate::context::RawRequest;
    use crate::envelope::ErrorKind;
    use crate::tools::test_support::{dispatcher_with_state, text_json};

    #[tokio::test]
    async fn status_aware_tool_follows_the_latest_status() {
        let (dispatcher, state) = dispatcher_with_state();
        let request = RawRequest::default();

        let output = dispatcher
            .dispatch("status_aware_tool", None, &request)
            .await
            .unwrap();
        assert!(output.first_text().unwrap().starts_with("Server is operating normally"));

        let output = dispatcher
            .dispatch("set_server_status", Some(json!({ "status": "inactive" })), &request)
            .await
            .unwrap();
        assert_eq!(text_json(&output), json!({ "status": "inactive" }));
        assert_eq!(state.status(), ServerStatus::Inactive);

        let err = dispatcher
            .dispatch("status_aware_tool", Some(json!({ "ignored": 1 })), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.message(), "Server is inactive");
        assert_eq!(err.data(), json!({ "status": "inactive" }));

        for _ in 0..2 {
            dispatcher
                .dispatch("set_server_status", Some(json!({ "status": "active" })), &request)
                .await
                .unwrap();
        }
        assert_eq!(state.status(), ServerStatus::Active);
        assert!(dispatcher.dispatch("status_aware_tool", None, &request).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_status_leaves_state_untouched() {
        let (dispatcher, state) = dispatcher_with_state();
        let err = dispatcher
            .dispatch("set_server_status", Some(json!({ "status": "paused" })), &RawRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(state.status(), ServerStatus::Active);
    }

    #[tokio::test]
    async fn states_are_isolated_per_instance() {
        let (first, first_state) = dispatcher_with_state();
        let (_second, second_state) = dispatcher_with_state();
        first
            .dispatch("set_server_status", Some(json!({ "status": "inactive" })), &RawRequest::default())
            .await
            .unwrap();
        assert_eq!(first_state.status(), ServerStatus::Inactive);
        assert_eq!(second_state.status(), ServerStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_report_true_peak_and_release_every_slot() {
        let (dispatcher, state) = dispatcher_with_state();
        let mut calls = JoinSet::new();
        for delay in [1, 2, 3] {
            let dispatcher = dispatcher.clone();
            calls.spawn(async move {
                let output = dispatcher
                    .dispatch(
                        "concurrent_test",
                        Some(json!({ "delay": delay })),
                        &RawRequest::default(),
                    )
                    .await
                    .unwrap();
                (delay, text_json(&output))
            });
        }

        let mut snapshots = Vec::new();
        while let Some(joined) = calls.join_next().await {
            snapshots.push(joined.unwrap());
        }
        snapshots.sort_by_key(|(delay, _)| *delay);

        let active: Vec<u64> = snapshots
            .iter()
            .map(|(_, body)| body["activeRequests"].as_u64().unwrap())
            .collect();
        assert_eq!(active, vec![3, 2, 1]);
        assert!(snapshots.iter().all(|(_, body)| body["maxConcurrent"] == 3));
        assert!(snapshots.iter().all(|(_, body)| body["timestamp"].is_string()));
        assert_eq!(state.active_requests(), 0);
        assert_eq!(state.max_concurrent(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_still_releases_its_slot() {
        let (dispatcher, state) = dispatcher_with_state();
        let call = tokio::spawn(async move {
            dispatcher
                .dispatch("concurrent_test", Some(json!({ "delay": 60 })), &RawRequest::default())
                .await
        });

        while state.active_requests() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(state.active_requests(), 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(state.active_requests(), 0);
        assert_eq!(state.max_concurrent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_call_sees_only_itself() {
        let (dispatcher, state) = dispatcher_with_state();
        let output = dispatcher
            .dispatch("concurrent_test", Some(json!({ "delay": 0 })), &RawRequest::default())
            .await
            .unwrap();
        let body = text_json(&output);
        assert_eq!(body["activeRequests"], 1);
        assert_eq!(body["maxConcurrent"], 1);
        assert_eq!(state.active_requests(), 0);
    }
}
