//! Per-invocation request context built from transport metadata.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// A header value as received: one value, or every value of a repeated header
/// in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::Single(value) => Some(value),
            HeaderValue::Multi(values) => values.first().map(String::as_str),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValue::Multi(vec![first, value]);
            }
            HeaderValue::Multi(values) => values.push(value),
        }
    }
}

/// Claims derived from identity headers or a `Bearer user=..;role=..;scopes=..`
/// authorization value. Nothing here is verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Identity {
    fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.role.is_none() && self.scopes.is_empty()
    }
}

/// Transport-level request metadata, as handed over by stdio or HTTP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRequest {
    pub headers: Vec<(String, String)>,
}

impl RawRequest {
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Ambient data for one tool invocation. Built once per call and never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    headers: BTreeMap<String, HeaderValue>,
    identity: Option<Identity>,
}

impl RequestContext {
    /// Context with no headers, as seen by stdio invocations.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extracts the context of one invocation. Never fails; a request without
    /// headers yields an empty map.
    pub fn extract(request: &RawRequest) -> Self {
        Self::from_pairs(
            request
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.clone())),
        )
    }

    /// Builds a context from raw `(name, value)` pairs. Names are lower-cased
    /// and repeated names keep every value in order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut headers: BTreeMap<String, HeaderValue> = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.as_ref().to_ascii_lowercase();
            let value = value.into();
            match headers.get_mut(&name) {
                Some(existing) => existing.push(value),
                None => {
                    headers.insert(name, HeaderValue::Single(value));
                }
            }
        }
        let identity = derive_identity(&headers);
        Self { headers, identity }
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    /// First value of a header; choosing the first is left to callers.
    pub fn header_first(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::first)
    }

    pub fn headers(&self) -> &BTreeMap<String, HeaderValue> {
        &self.headers
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn headers_value(&self) -> Value {
        serde_json::to_value(&self.headers).unwrap_or(Value::Null)
    }
}

fn derive_identity(headers: &BTreeMap<String, HeaderValue>) -> Option<Identity> {
    let bearer = headers
        .get(AUTHORIZATION_HEADER)
        .and_then(HeaderValue::first)
        .map(parse_bearer_claims)
        .unwrap_or_default();

    let identity = Identity {
        user_id: headers
            .get(USER_ID_HEADER)
            .and_then(HeaderValue::first)
            .map(str::to_string)
            .or(bearer.user_id),
        role: headers
            .get(USER_ROLE_HEADER)
            .and_then(HeaderValue::first)
            .map(str::to_string)
            .or(bearer.role),
        scopes: bearer.scopes,
    };
    (!identity.is_empty()).then_some(identity)
}

/// Parses `Bearer user=<id>;role=<role>;scopes=<a,b>`. Opaque tokens yield no claims.
fn parse_bearer_claims(raw: &str) -> Identity {
    let Some(token) = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
    else {
        return Identity::default();
    };

    let mut identity = Identity::default();
    for part in token.split(';') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "user" => identity.user_id = Some(value.to_string()),
            "role" => identity.role = Some(value.to_string()),
            "scopes" => {
                identity.scopes = value
                    .split([',', ' '])
                    .map(str::trim)
                    .filter(|scope| !scope.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }
    identity
}
