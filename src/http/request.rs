//! # Request Credentials
//!
//! Credentials come from `X-Aero-*` headers, from HTTP basic auth, or, for
//! clients that cannot set headers, from reserved keys in the JSON body.
//! Reserved keys are stripped before the body reaches the object API.

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::auth::Credentials;
use crate::errors::{ApiError, ApiResult};
use crate::rest::ClientSdk;

pub const APPLICATION_ID_HEADER: &str = "x-aero-application-id";
pub const MASTER_KEY_HEADER: &str = "x-aero-master-key";
pub const CLIENT_KEY_HEADER: &str = "x-aero-client-key";
pub const SESSION_TOKEN_HEADER: &str = "x-aero-session-token";
pub const INSTALLATION_ID_HEADER: &str = "x-aero-installation-id";
pub const CLIENT_VERSION_HEADER: &str = "x-aero-client-version";

/// Prefix of a client key in the basic-auth password
const JAVASCRIPT_KEY_PREFIX: &str = "javascript-key=";

/// Everything the adapter extracts from a request
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub credentials: Credentials,
    pub client_sdk: Option<ClientSdk>,
    pub body: Map<String, Value>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Decode `Authorization: Basic base64(appId:key)`
fn basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let value = header(headers, AUTHORIZATION.as_str())?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (app_id, key) = decoded.split_once(':')?;
    Some((app_id.to_string(), key.to_string()))
}

fn parse_body(headers: &HeaderMap, raw: &[u8]) -> ApiResult<Map<String, Value>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    let is_json = header(headers, CONTENT_TYPE.as_str())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ if is_json => Err(ApiError::InvalidJson("invalid JSON".to_string())),
        // Other content types are only parsed opportunistically
        _ => Ok(Map::new()),
    }
}

fn take_string(body: &mut Map<String, Value>, key: &str) -> Option<String> {
    match body.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

impl RequestInfo {
    /// Extract credentials and the JSON body. Fails with `Unauthorized` when
    /// no application id is present anywhere.
    pub fn from_parts(headers: &HeaderMap, raw_body: &[u8]) -> ApiResult<Self> {
        let mut credentials = Credentials {
            app_id: header(headers, APPLICATION_ID_HEADER),
            master_key: header(headers, MASTER_KEY_HEADER),
            client_key: header(headers, CLIENT_KEY_HEADER),
            session_token: header(headers, SESSION_TOKEN_HEADER),
            installation_id: header(headers, INSTALLATION_ID_HEADER),
        };

        if let Some((app_id, key)) = basic_auth(headers) {
            credentials.app_id = Some(app_id);
            match key.strip_prefix(JAVASCRIPT_KEY_PREFIX) {
                Some(client_key) => credentials.client_key = Some(client_key.to_string()),
                None if !key.is_empty() => credentials.master_key = Some(key),
                None => {}
            }
        }

        let mut body = parse_body(headers, raw_body)?;
        // Sent by some SDKs and meaningless here
        body.remove("_noBody");
        body.remove("_RevocableSession");

        if credentials.app_id.is_none() {
            let Some(app_id) = take_string(&mut body, "_ApplicationId") else {
                return Err(ApiError::Unauthorized);
            };
            credentials.app_id = Some(app_id);
            if let Some(client_key) = take_string(&mut body, "_ClientKey") {
                credentials.client_key = Some(client_key);
            }
            if let Some(installation_id) = take_string(&mut body, "_InstallationId") {
                credentials.installation_id = Some(installation_id);
            }
            if let Some(session_token) = take_string(&mut body, "_SessionToken") {
                credentials.session_token = Some(session_token);
            }
            if let Some(master_key) = take_string(&mut body, "_MasterKey") {
                credentials.master_key = Some(master_key);
            }
            body.remove("_ContentType");
        }

        let client_sdk = header(headers, CLIENT_VERSION_HEADER).and_then(|v| ClientSdk::parse(&v));

        Ok(Self {
            credentials,
            client_sdk,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_headers() {
        let h = headers(&[
            (APPLICATION_ID_HEADER, "app"),
            (CLIENT_KEY_HEADER, "client"),
            (SESSION_TOKEN_HEADER, "r:abc"),
            (CLIENT_VERSION_HEADER, "js1.9.2"),
        ]);
        let info = RequestInfo::from_parts(&h, b"").unwrap();
        assert_eq!(info.credentials.app_id.as_deref(), Some("app"));
        assert_eq!(info.credentials.client_key.as_deref(), Some("client"));
        assert_eq!(info.credentials.session_token.as_deref(), Some("r:abc"));
        assert_eq!(info.client_sdk.unwrap().sdk, "js");
    }

    #[test]
    fn test_basic_auth() {
        let encoded = STANDARD.encode("app:javascript-key=client");
        let h = headers(&[("authorization", &format!("Basic {}", encoded))]);
        let info = RequestInfo::from_parts(&h, b"").unwrap();
        assert_eq!(info.credentials.app_id.as_deref(), Some("app"));
        assert_eq!(info.credentials.client_key.as_deref(), Some("client"));
        assert!(info.credentials.master_key.is_none());

        let encoded = STANDARD.encode("app:master");
        let h = headers(&[("authorization", &format!("basic {}", encoded))]);
        let info = RequestInfo::from_parts(&h, b"").unwrap();
        assert_eq!(info.credentials.master_key.as_deref(), Some("master"));
    }

    #[test]
    fn test_body_overrides_are_consumed() {
        let h = headers(&[("content-type", "application/json")]);
        let body = json!({
            "_ApplicationId": "app",
            "_ClientKey": "client",
            "_SessionToken": "r:abc",
            "_ContentType": "text/plain",
            "_noBody": true,
            "score": 1
        });
        let info = RequestInfo::from_parts(&h, body.to_string().as_bytes()).unwrap();
        assert_eq!(info.credentials.app_id.as_deref(), Some("app"));
        assert_eq!(info.credentials.session_token.as_deref(), Some("r:abc"));
        assert_eq!(info.body.len(), 1);
        assert_eq!(info.body["score"], 1);
    }

    #[test]
    fn test_missing_app_id_unauthorized() {
        let h = headers(&[("content-type", "application/json")]);
        let err = RequestInfo::from_parts(&h, b"{\"score\": 1}").unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[test]
    fn test_invalid_json_body() {
        let h = headers(&[
            (APPLICATION_ID_HEADER, "app"),
            ("content-type", "application/json"),
        ]);
        let err = RequestInfo::from_parts(&h, b"{not json").unwrap_err();
        assert_eq!(err, ApiError::InvalidJson("invalid JSON".into()));

        let h = headers(&[(APPLICATION_ID_HEADER, "app"), ("content-type", "text/plain")]);
        let info = RequestInfo::from_parts(&h, b"{not json").unwrap();
        assert!(info.body.is_empty());
    }
}
