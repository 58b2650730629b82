//! Newline-delimited JSON-RPC over stdio.
//!
//! Every request runs on its own task so a hanging or slow tool never blocks
//! the rest of the session. `notifications/cancelled` aborts the matching task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::context::RawRequest;
use crate::server::{McpServer, RpcError, error_response};

type InFlight = Arc<Mutex<HashMap<String, AbortHandle>>>;

pub async fn serve_stdio(server: McpServer) -> Result<(), String> {
    let reader = io::BufReader::new(io::stdin());
    serve(server, reader, io::stdout()).await
}

/// Serves one session over any line-oriented reader/writer pair until EOF.
/// Calls still running at EOF are aborted.
pub async fn serve<R, W>(server: McpServer, mut reader: R, writer: W) -> Result<(), String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
    let session_id = uuid::Uuid::now_v7();
    tracing::info!(event = "stdio_session_started", session_id = %session_id);

    loop {
        let line = read_message(&mut reader)
            .await
            .map_err(|e| format!("Failed to read MCP message: {e}"))?;
        let Some(line) = line else {
            break;
        };

        let incoming: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(event = "stdio_parse_error", error = %err);
                let _ = tx.send(error_response(Value::Null, RpcError::parse_error()));
                continue;
            }
        };

        if let Some(request_id) = cancelled_request_id(&incoming) {
            if let Some(handle) = lock(&in_flight).remove(&request_id) {
                handle.abort();
                tracing::info!(event = "stdio_request_aborted", request_id = %request_id);
            }
        }

        match incoming {
            // Every element is its own cancellable call; the batch reply keeps element order.
            Value::Array(items) if !items.is_empty() => {
                let calls: Vec<_> = items
                    .into_iter()
                    .map(|item| spawn_tracked(&server, item, &in_flight))
                    .collect();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut responses = Vec::new();
                    for call in calls {
                        if let Ok(Some(response)) = call.await {
                            responses.push(response);
                        }
                    }
                    if !responses.is_empty() {
                        let _ = tx.send(Value::Array(responses));
                    }
                });
            }
            empty @ Value::Array(_) => {
                for response in server
                    .handle_incoming_message(empty, &RawRequest::default())
                    .await
                {
                    let _ = tx.send(response);
                }
            }
            incoming => {
                let call = spawn_tracked(&server, incoming, &in_flight);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(Some(response)) = call.await {
                        let _ = tx.send(response);
                    }
                });
            }
        }
    }

    for (_, handle) in lock(&in_flight).drain() {
        handle.abort();
    }
    drop(tx);
    tracing::info!(event = "stdio_session_closed", session_id = %session_id);

    writer_task
        .await
        .map_err(|e| format!("MCP writer task failed: {e}"))?
        .map_err(|e| format!("Failed to write MCP response: {e}"))
}

/// Runs one message that is not a batch on its own task, registered for cancellation
/// under its request id while it runs.
fn spawn_tracked(
    server: &McpServer,
    incoming: Value,
    in_flight: &InFlight,
) -> JoinHandle<Option<Value>> {
    let key = request_key(&incoming);
    let server = server.clone();
    let tracked = in_flight.clone();
    let task_key = key.clone();
    // Held across spawn + insert so the task cannot deregister before it is registered.
    let mut registered = lock(in_flight);
    let task = tokio::spawn(async move {
        let response = server
            .handle_single_message(incoming, &RawRequest::default())
            .await;
        if let Some(key) = task_key {
            let mut tracked = lock(&tracked);
            // A later request may have reused the id; leave its handle alone.
            if tracked
                .get(&key)
                .is_some_and(|handle| handle.id() == tokio::task::id())
            {
                tracked.remove(&key);
            }
        }
        response
    });
    if let Some(key) = key {
        registered.insert(key, task.abort_handle());
    }
    task
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Value>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        write_message(&mut writer, &response).await?;
    }
    Ok(())
}

/// Next non-blank line, or `None` at EOF.
async fn read_message<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
    }
}

async fn write_message<W>(writer: &mut W, value: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = serde_json::to_vec(value).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    body.push(b'\n');
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Key identifying a single request so it can be cancelled later.
fn request_key(incoming: &Value) -> Option<String> {
    let obj = incoming.as_object()?;
    obj.get("method")?;
    obj.get("id").map(Value::to_string)
}

fn cancelled_request_id(incoming: &Value) -> Option<String> {
    if incoming.get("method").and_then(Value::as_str) != Some("notifications/cancelled") {
        return None;
    }
    incoming
        .pointer("/params/requestId")
        .map(Value::to_string)
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
    match in_flight.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
