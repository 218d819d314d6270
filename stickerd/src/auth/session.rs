//! Session cookie encoding and decoding.
//!
//! Sessions are stored the way the Supabase SSR helpers store them: one cookie named
//! `sb-{project-ref}-auth-token` whose value is `base64-` followed by the base64url encoded JSON
//! session. Values longer than [`CHUNK_SIZE`] are split over `{name}.0`, `{name}.1`, ... cookies.
//! Reads also accept the older raw JSON form and a bare access token.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderValue, header};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};

use super::provider::AuthenticatedUser;
use crate::config::AuthConfig;

/// Longest cookie value written before splitting into chunks.
pub const CHUNK_SIZE: usize = 3180;

const BASE64_PREFIX: &str = "base64-";

/// Token set issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Provider user record, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl SessionTokens {
    pub fn authenticated_user(&self) -> Option<AuthenticatedUser> {
        let user = self.user.as_ref()?;
        Some(AuthenticatedUser {
            id: user.get("id")?.as_str()?.to_string(),
            email: user.get("email").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// All cookies in the request, last one wins on duplicate names.
fn request_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Names of the cookies in the request that belong to the session called `name`.
pub fn session_cookie_names(headers: &HeaderMap, name: &str) -> Vec<String> {
    let chunk_prefix = format!("{name}.");
    request_cookies(headers)
        .into_keys()
        .filter(|cookie| {
            cookie == name
                || cookie
                    .strip_prefix(&chunk_prefix)
                    .is_some_and(|index| index.parse::<usize>().is_ok())
        })
        .collect()
}

/// Raw session value from either the single cookie or its chunks.
fn session_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let mut cookies = request_cookies(headers);
    if let Some(value) = cookies.remove(name) {
        return Some(value);
    }

    let mut combined = String::new();
    for index in 0.. {
        match cookies.remove(&format!("{name}.{index}")) {
            Some(chunk) => combined.push_str(&chunk),
            None => break,
        }
    }
    (!combined.is_empty()).then_some(combined)
}

/// The tokens a request's session cookie carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Tokens carried by a decoded session value.
pub fn decode_session(value: &str) -> Option<StoredSession> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(encoded) = value.strip_prefix(BASE64_PREFIX) {
        let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
        return stored_session_from_json(&serde_json::from_slice(&bytes).ok()?);
    }

    if value.starts_with('{') || value.starts_with('[') {
        return stored_session_from_json(&serde_json::from_str(value).ok()?);
    }

    Some(StoredSession {
        access_token: value.to_string(),
        refresh_token: None,
    })
}

pub fn decode_access_token(value: &str) -> Option<String> {
    decode_session(value).map(|session| session.access_token)
}

/// Accepts a session object or the legacy `[access_token, refresh_token, ...]` array.
fn stored_session_from_json(json: &Value) -> Option<StoredSession> {
    let non_empty = |token: Option<&Value>| {
        token
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    };
    let (access_token, refresh_token) = match json {
        Value::Object(map) => (non_empty(map.get("access_token"))?, non_empty(map.get("refresh_token"))),
        Value::Array(items) => (non_empty(items.first())?, non_empty(items.get(1))),
        _ => return None,
    };
    Some(StoredSession {
        access_token,
        refresh_token,
    })
}

/// Tokens from the request's session cookie, if there is a usable one.
pub fn stored_session_from_headers(headers: &HeaderMap, name: &str) -> Option<StoredSession> {
    let value = session_value(headers, name)?;
    let session = decode_session(&value);
    if session.is_none() {
        trace!(cookie = name, "Session cookie present but not decodable");
    }
    session
}

/// Access token from the request's session cookie, if there is a usable one.
pub fn access_token_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    stored_session_from_headers(headers, name).map(|session| session.access_token)
}

pub fn encode_session(tokens: &SessionTokens) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(tokens)?;
    Ok(format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

fn cookie_header(name: &str, value: &str, max_age: u64, config: &AuthConfig) -> String {
    let secure = if config.cookie_secure { "; Secure" } else { "" };
    format!(
        "{name}={value}; Path=/; HttpOnly{secure}; SameSite={}; Max-Age={max_age}",
        config.cookie_same_site
    )
}

/// Build a header value, logging and skipping anything the header encoding rejects.
fn push_cookie(cookies: &mut Vec<HeaderValue>, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => cookies.push(value),
        Err(e) => warn!(error = %e, "Skipping unencodable session cookie"),
    }
}

/// `Set-Cookie` values storing `tokens` under `name`, chunked when needed. Cookies listed in
/// `existing` that the new layout does not overwrite are expired.
pub fn session_cookies(name: &str, tokens: &SessionTokens, config: &AuthConfig, existing: &[String]) -> Vec<HeaderValue> {
    let value = match encode_session(tokens) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Failed to encode session, not setting cookie");
            return Vec::new();
        }
    };

    let max_age = config.session_max_age.as_secs();
    let mut written = Vec::new();
    let mut cookies = Vec::new();

    if value.len() <= CHUNK_SIZE {
        push_cookie(&mut cookies, cookie_header(name, &value, max_age, config));
        written.push(name.to_string());
    } else {
        // base64url output is ASCII, so byte offsets are char boundaries
        for (index, chunk) in value.as_bytes().chunks(CHUNK_SIZE).enumerate() {
            let chunk_name = format!("{name}.{index}");
            let chunk = String::from_utf8_lossy(chunk);
            push_cookie(&mut cookies, cookie_header(&chunk_name, &chunk, max_age, config));
            written.push(chunk_name);
        }
    }

    for stale in existing.iter().filter(|cookie| !written.contains(cookie)) {
        push_cookie(&mut cookies, cookie_header(stale, "", 0, config));
    }

    cookies
}

/// `Set-Cookie` values expiring the session cookie and every chunk in `existing`.
pub fn clear_session_cookies(name: &str, config: &AuthConfig, existing: &[String]) -> Vec<HeaderValue> {
    let mut cookies = Vec::new();
    push_cookie(&mut cookies, cookie_header(name, "", 0, config));
    for cookie in existing.iter().filter(|cookie| cookie.as_str() != name) {
        push_cookie(&mut cookies, cookie_header(cookie, "", 0, config));
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NAME: &str = "sb-abcd-auth-token";

    fn tokens(user_padding: usize) -> SessionTokens {
        SessionTokens {
            access_token: "header.payload.signature".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: Some("bearer".to_string()),
            expires_in: Some(3600),
            expires_at: Some(1_900_000_000),
            user: Some(json!({
                "id": "8d0fd2b3-9ca7-4a45-b2a7-1d3f7f1e3c11",
                "email": "user@example.com",
                "user_metadata": {"padding": "x".repeat(user_padding)}
            })),
        }
    }

    fn request_with(set_cookies: &[HeaderValue]) -> HeaderMap {
        let pairs: Vec<String> = set_cookies
            .iter()
            .map(|value| value.to_str().unwrap().split(';').next().unwrap().to_string())
            .collect();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&pairs.join("; ")).unwrap());
        headers
    }

    #[test]
    fn test_small_session_uses_single_cookie() {
        let cookies = session_cookies(NAME, &tokens(0), &AuthConfig::default(), &[]);
        assert_eq!(cookies.len(), 1);

        let cookie = cookies[0].to_str().unwrap();
        assert!(cookie.starts_with(&format!("{NAME}=base64-")));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));

        let headers = request_with(&cookies);
        assert_eq!(
            access_token_from_headers(&headers, NAME).as_deref(),
            Some("header.payload.signature")
        );
    }

    #[test]
    fn test_large_session_is_chunked_and_reassembled() {
        let cookies = session_cookies(NAME, &tokens(6000), &AuthConfig::default(), &[]);
        assert!(cookies.len() >= 3);
        assert!(cookies[0].to_str().unwrap().starts_with(&format!("{NAME}.0=base64-")));
        assert!(cookies[1].to_str().unwrap().starts_with(&format!("{NAME}.1=")));

        let headers = request_with(&cookies);
        assert_eq!(
            access_token_from_headers(&headers, NAME).as_deref(),
            Some("header.payload.signature")
        );
        assert_eq!(session_cookie_names(&headers, NAME).len(), cookies.len());
    }

    #[test]
    fn test_rewriting_expires_stale_chunks() {
        let existing = vec![format!("{NAME}.0"), format!("{NAME}.1")];
        let cookies = session_cookies(NAME, &tokens(0), &AuthConfig::default(), &existing);

        assert_eq!(cookies.len(), 3);
        assert!(cookies[1].to_str().unwrap().starts_with(&format!("{NAME}.0=;")));
        assert!(cookies[1].to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_raw_json_and_bare_token_are_accepted() {
        let raw = r#"{"access_token":"raw-token","refresh_token":"r"}"#;
        assert_eq!(decode_access_token(raw).as_deref(), Some("raw-token"));

        let legacy = r#"["legacy-token","refresh",null,null,null]"#;
        assert_eq!(decode_access_token(legacy).as_deref(), Some("legacy-token"));

        assert_eq!(decode_access_token("bare.jwt.token").as_deref(), Some("bare.jwt.token"));
    }

    #[test]
    fn test_refresh_token_is_read_back() {
        let cookies = session_cookies(NAME, &tokens(6000), &AuthConfig::default(), &[]);
        let session = stored_session_from_headers(&request_with(&cookies), NAME).unwrap();
        assert_eq!(session.access_token, "header.payload.signature");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh"));

        let legacy = decode_session(r#"["legacy-token","legacy-refresh"]"#).unwrap();
        assert_eq!(legacy.refresh_token.as_deref(), Some("legacy-refresh"));

        assert!(decode_session("bare.jwt.token").unwrap().refresh_token.is_none());
        assert!(decode_session(r#"{"access_token":"a","refresh_token":""}"#).unwrap().refresh_token.is_none());
    }

    #[test]
    fn test_undecodable_values_yield_no_token() {
        assert!(decode_access_token("").is_none());
        assert!(decode_access_token("base64-!!!not base64!!!").is_none());
        assert!(decode_access_token("{not json").is_none());
        assert!(decode_access_token(r#"{"access_token":""}"#).is_none());
    }

    #[test]
    fn test_missing_cookie_yields_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; other=1"));
        assert!(access_token_from_headers(&headers, NAME).is_none());
        assert!(access_token_from_headers(&HeaderMap::new(), NAME).is_none());
    }

    #[test]
    fn test_secure_flag_follows_config() {
        let config = AuthConfig {
            cookie_secure: true,
            cookie_same_site: "Strict".to_string(),
            ..Default::default()
        };
        let cookies = session_cookies(NAME, &tokens(0), &config, &[]);
        let cookie = cookies[0].to_str().unwrap();
        assert!(cookie.contains("; Secure"));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[test]
    fn test_clear_expires_every_chunk() {
        let existing = vec![format!("{NAME}.0"), format!("{NAME}.1")];
        let cookies = clear_session_cookies(NAME, &AuthConfig::default(), &existing);
        assert_eq!(cookies.len(), 3);
        assert!(cookies.iter().all(|c| c.to_str().unwrap().contains("Max-Age=0")));
    }

    #[test]
    fn test_authenticated_user_from_session() {
        let user = tokens(0).authenticated_user().unwrap();
        assert_eq!(user.id, "8d0fd2b3-9ca7-4a45-b2a7-1d3f7f1e3c11");
        assert_eq!(user.email.as_deref(), Some("user@example.com"));
    }
}
