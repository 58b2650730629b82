//! The tool catalogue, grouped by the behaviour each module probes.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::envelope::{ErrorKind, ToolError};
use crate::registry::{RegistryError, ToolRegistry};
use crate::state::ProbeState;

pub mod content;
pub mod faulty;
pub mod ops;
pub mod secure;

/// Registers every tool module into `registry`. Touches nothing but the registry.
pub fn register_all(registry: &mut ToolRegistry, state: Arc<ProbeState>) -> Result<(), RegistryError> {
    content::register(registry)?;
    faulty::register(registry)?;
    secure::register(registry)?;
    ops::register(registry, state)?;
    Ok(())
}

/// Decodes schema-checked arguments into a typed struct.
pub(crate) fn typed_args<T: DeserializeOwned>(args: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|err| {
        ToolError::new(ErrorKind::InvalidArguments, format!("Invalid arguments: {err}"))
    })
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
