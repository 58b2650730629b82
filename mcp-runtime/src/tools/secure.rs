//! Context-dependent tools: their outcome depends on headers the hub forwards.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::typed_args;
use crate::context::{AUTHORIZATION_HEADER, RequestContext, USER_ID_HEADER, USER_ROLE_HEADER};
use crate::envelope::{ToolError, ToolOutput};
use crate::registry::{RegistryError, ToolContract, ToolHandler, ToolRegistry};

const MODULE: &str = "secure";

pub const HR_MANAGER_ROLE: &str = "HR_MANAGER";
/// Characters of a personal key that may appear in a response.
const KEY_PREFIX_CHARS: usize = 4;

pub fn register(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(ToolContract::new(
        MODULE,
        "get_my_info",
        "Reports the identity headers and raw headers that reached this server.",
        GetMyInfo,
    ))?;

    registry.register(
        ToolContract::new(
            MODULE,
            "get_salary_info",
            "Returns salary data only for the HR_MANAGER role (post-check after validation).",
            GetSalaryInfo,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "employeeId": { "type": "string" }
            },
            "required": ["employeeId"]
        })),
    )?;

    registry.register(
        ToolContract::new(
            MODULE,
            "external_api_call",
            "Requires a per-service personal key header (x-personal-<service>-key).",
            ExternalApiCall,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "service": { "type": "string", "enum": ["jira", "slack", "google"] }
            },
            "required": ["service"]
        })),
    )?;

    registry.register(
        ToolContract::new(
            MODULE,
            "get_customer_info",
            "Returns an unmasked customer record, for exercising downstream masking policy.",
            GetCustomerInfo,
        )
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "customerId": { "type": "string" }
            },
            "required": ["customerId"]
        })),
    )?;
    Ok(())
}

struct GetMyInfo;

#[async_trait]
impl ToolHandler for GetMyInfo {
    async fn call(
        &self,
        _args: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let mut received = Map::new();
        if let Some(user_id) = ctx.header(USER_ID_HEADER) {
            received.insert("userId".to_string(), json!(user_id));
        }
        if let Some(user_role) = ctx.header(USER_ROLE_HEADER) {
            received.insert("userRole".to_string(), json!(user_role));
        }
        received.insert(
            "hasAuthorization".to_string(),
            Value::Bool(ctx.header(AUTHORIZATION_HEADER).is_some()),
        );

        let mut payload = json!({
            "receivedHeaders": received,
            "raw": ctx.headers_value(),
        });
        if let Some(identity) = ctx.identity() {
            payload["identity"] = json!(identity);
        }
        Ok(ToolOutput::json(&payload))
    }
}

#[derive(Debug, Deserialize)]
struct SalaryArgs {
    #[serde(rename = "employeeId")]
    employee_id: String,
}

struct GetSalaryInfo;

#[async_trait]
impl ToolHandler for GetSalaryInfo {
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let SalaryArgs { employee_id } = typed_args(args)?;
        let role = ctx.header_first(USER_ROLE_HEADER);
        if role != Some(HR_MANAGER_ROLE) {
            let mut err = ToolError::invalid_request("Access Denied: HR Manager only")
                .with_meta("required_role", HR_MANAGER_ROLE);
            if let Some(role) = role {
                err = err.with_meta("current_role", role);
            }
            return Err(err);
        }
        Ok(ToolOutput::text(format!(
            "Employee {employee_id}: Salary $100,000"
        )))
    }
}

#[derive(Debug, Deserialize)]
struct ExternalCallArgs {
    service: String,
}

pub fn personal_key_header(service: &str) -> String {
    format!("x-personal-{service}-key")
}

/// Short prefix followed by a fixed mask; the rest of the key never leaves.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(KEY_PREFIX_CHARS).collect();
    format!("{prefix}****")
}

struct ExternalApiCall;

#[async_trait]
impl ToolHandler for ExternalApiCall {
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let ExternalCallArgs { service } = typed_args(args)?;
        let key = ctx
            .header_first(&personal_key_header(&service))
            .filter(|key| !key.is_empty());
        let Some(key) = key else {
            return Err(
                ToolError::invalid_request(format!("{service} Personal Key not found"))
                    .with_meta("action", "register_key")
                    .with_meta("service", service),
            );
        };
        Ok(ToolOutput::text(format!(
            "{service} API call succeeded (Key: {})",
            mask_key(key)
        )))
    }
}

#[derive(Debug, Deserialize)]
struct CustomerArgs {
    #[serde(rename = "customerId")]
    customer_id: String,
}

struct GetCustomerInfo;

#[async_trait]
impl ToolHandler for GetCustomerInfo {
    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &RequestContext,
    ) -> Result<ToolOutput, ToolError> {
        let CustomerArgs { customer_id } = typed_args(args)?;
        // Returned raw on purpose; masking belongs to the hub under test.
        Ok(ToolOutput::json(&json!({
            "id": customer_id,
            "name": "Hong Gildong",
            "phone": "010-1234-5678",
            "email": "hong@example.com",
            "ssn": "900101-1234567"
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RawRequest;
    use crate::envelope::ErrorKind;
    use crate::tools::test_support::{dispatcher, headers, text_json};

    #[tokio::test]
    async fn salary_is_returned_to_hr_managers() {
        let output = dispatcher()
            .dispatch(
                "get_salary_info",
                Some(json!({ "employeeId": "E1" })),
                &headers(&[("x-user-role", "HR_MANAGER")]),
            )
            .await
            .unwrap();
        assert_eq!(output.first_text(), Some("Employee E1: Salary $100,000"));
    }

    #[tokio::test]
    async fn salary_is_denied_for_other_roles() {
        let err = dispatcher()
            .dispatch(
                "get_salary_info",
                Some(json!({ "employeeId": "E1" })),
                &headers(&[("X-User-Role", "EMPLOYEE")]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            err.data(),
            json!({ "required_role": "HR_MANAGER", "current_role": "EMPLOYEE" })
        );
    }

    #[tokio::test]
    async fn salary_denial_without_role_omits_current_role() {
        let err = dispatcher()
            .dispatch("get_salary_info", Some(json!({ "employeeId": "E1" })), &RawRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.data(), json!({ "required_role": "HR_MANAGER" }));
    }

    #[tokio::test]
    async fn salary_uses_the_first_role_value() {
        let output = dispatcher()
            .dispatch(
                "get_salary_info",
                Some(json!({ "employeeId": "E7" })),
                &headers(&[("x-user-role", "HR_MANAGER"), ("x-user-role", "EMPLOYEE")]),
            )
            .await;
        assert!(output.is_ok());
    }

    #[tokio::test]
    async fn salary_validates_arguments_before_checking_the_role() {
        let err = dispatcher()
            .dispatch("get_salary_info", Some(json!({})), &RawRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert_eq!(err.data()["field"], "employeeId");
    }

    #[tokio::test]
    async fn external_call_without_key_asks_for_registration() {
        let err = dispatcher()
            .dispatch("external_api_call", Some(json!({ "service": "jira" })), &RawRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.message(), "jira Personal Key not found");
        assert_eq!(err.data(), json!({ "action": "register_key", "service": "jira" }));
    }

    #[tokio::test]
    async fn external_call_reveals_only_the_key_prefix() {
        let output = dispatcher()
            .dispatch(
                "external_api_call",
                Some(json!({ "service": "jira" })),
                &headers(&[("X-Personal-Jira-Key", "abcd1234")]),
            )
            .await
            .unwrap();
        let text = output.first_text().unwrap();
        assert!(text.contains("abcd****"));
        assert!(!text.contains("abcd1234"));
    }

    #[tokio::test]
    async fn external_call_key_is_scoped_to_its_service() {
        let err = dispatcher()
            .dispatch(
                "external_api_call",
                Some(json!({ "service": "slack" })),
                &headers(&[("x-personal-jira-key", "abcd1234")]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.data()["service"], "slack");
    }

    #[test]
    fn short_keys_are_masked_without_panicking() {
        assert_eq!(mask_key("ab"), "ab****");
        assert_eq!(mask_key("키값비밀번호"), "키값비밀****");
    }

    #[tokio::test]
    async fn my_info_reports_identity_headers_and_raw_map() {
        let output = dispatcher()
            .dispatch(
                "get_my_info",
                None,
                &headers(&[
                    ("X-User-Id", "u-42"),
                    ("x-user-role", "EMPLOYEE"),
                    ("Authorization", "Bearer user=u-42;role=EMPLOYEE;scopes=read"),
                    ("accept", "application/json"),
                    ("accept", "text/event-stream"),
                ]),
            )
            .await
            .unwrap();
        let body = text_json(&output);
        assert_eq!(body["receivedHeaders"]["userId"], "u-42");
        assert_eq!(body["receivedHeaders"]["userRole"], "EMPLOYEE");
        assert_eq!(body["receivedHeaders"]["hasAuthorization"], true);
        assert_eq!(body["raw"]["accept"], json!(["application/json", "text/event-stream"]));
        assert_eq!(body["identity"]["scopes"], json!(["read"]));
    }

    #[tokio::test]
    async fn my_info_never_fails_without_headers() {
        let output = dispatcher()
            .dispatch("get_my_info", None, &RawRequest::default())
            .await
            .unwrap();
        let body = text_json(&output);
        assert_eq!(body["receivedHeaders"], json!({ "hasAuthorization": false }));
        assert_eq!(body["raw"], json!({}));
        assert!(body.get("identity").is_none());
    }

    #[tokio::test]
    async fn customer_record_is_not_masked() {
        let output = dispatcher()
            .dispatch("get_customer_info", Some(json!({ "customerId": "C-1" })), &RawRequest::default())
            .await
            .unwrap();
        let body = text_json(&output);
        assert_eq!(body["id"], "C-1");
        assert_eq!(body["ssn"], "900101-1234567");
        assert_eq!(body["phone"], "010-1234-5678");
    }
}
