//! Heterogeneous-content tools: nested typed schemas and mixed content kinds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::typed_args;
use crate::context::RequestContext;
use crate::envelope::{Content, ToolError, ToolOutput};
use crate::registry::{RegistryError, ToolContract, ToolHandler, ToolRegistry};

const MODULE: &str = "protocol";

/// 1x1 transparent PNG.
pub const METRICS_CHART_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mP8/x8AAwMCAO6q3h0AAAAASUVORK5CYII=";
pub const METRICS_CHART_MIME_TYPE: &str = "image/png";

pub fn register(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        ToolContract::new(
            MODULE,
            "provision_cloud_resource",
            "Echoes a complex argument structure (enums, arrays, nested objects) to verify schema forwarding.",
            ProvisionCloudResource,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "provider": {
                    "type": "string",
                    "enum": ["aws", "gcp", "azure"],
                    "description": "Cloud provider"
                },
                "resourceType": {
                    "type": "string",
                    "enum": ["vm", "storage", "database"],
                    "description": "Kind of resource to create"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tags applied to the resource"
                },
                "options": {
                    "type": "object",
                    "properties": {
                        "region": { "type": "string", "description": "Deployment region" },
                        "autoScaling": { "type": "boolean", "description": "Enable auto scaling" }
                    },
                    "required": ["region", "autoScaling"],
                    "description": "Detailed options"
                }
            },
            "required": ["provider", "resourceType", "tags", "options"]
        })),
    )?;

    registry.register(
        ToolContract::new(
            MODULE,
            "get_server_metrics_chart",
            "Returns an image item followed by a text item to verify mixed content envelopes.",
            ServerMetricsChart,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "serverId": { "type": "string" }
            },
            "required": ["serverId"]
        })),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

impl CloudProvider {
    fn as_str(self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Azure => "azure",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResourceType {
    Vm,
    Storage,
    Database,
}

impl ResourceType {
    fn as_str(self) -> &'static str {
        match self {
            ResourceType::Vm => "vm",
            ResourceType::Storage => "storage",
            ResourceType::Database => "database",
        }
    }
}

/// Only the declared fields survive decoding, so the echo never carries
/// keys the schema does not know.
#[derive(Debug, Serialize, Deserialize)]
struct ProvisionArgs {
    provider: CloudProvider,
    #[serde(rename = "resourceType")]
    resource_type: ResourceType,
    tags: Vec<String>,
    options: ProvisionOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProvisionOptions {
    region: String,
    #[serde(rename = "autoScaling")]
    auto_scaling: bool,
}

struct ProvisionCloudResource;

#[async_trait]
impl ToolHandler for ProvisionCloudResource {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: ProvisionArgs = typed_args(args)?;
        let request = serde_json::to_value(&parsed)
            .map_err(|err| ToolError::internal(format!("Failed to echo request: {err}")))?;
        Ok(ToolOutput::json(&json!({
            "success": true,
            "message": format!(
                "{} {} provisioning request accepted",
                parsed.provider.as_str(),
                parsed.resource_type.as_str()
            ),
            "request": request,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct ChartArgs {
    #[serde(rename = "serverId")]
    server_id: String,
}

struct ServerMetricsChart;

#[async_trait]
impl ToolHandler for ServerMetricsChart {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let ChartArgs { server_id } = typed_args(args)?;
        Ok(ToolOutput::new(vec![
            Content::image(METRICS_CHART_PNG_BASE64, METRICS_CHART_MIME_TYPE),
            Content::text(format!(
                "Server {server_id} metrics chart (CPU: 45%, Memory: 62%, Disk: 38%)"
            )),
        ]))
    }
}
