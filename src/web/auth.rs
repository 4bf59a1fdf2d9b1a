//! Credential cookies and the `/api/auth` routes.
//!
//! The browser keeps the Kraken key pair in two HttpOnly cookies. Requests
//! without them fall back to the server-side pair from the configuration.

use super::error::ApiError;
use super::AppState;
use crate::exchange::Credentials;
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const API_KEY_COOKIE: &str = "kraken_api_key";
pub const API_SECRET_COOKIE: &str = "kraken_api_secret";
const COOKIE_MAX_AGE_DAYS: i64 = 30;

/// Cookie pair first, then the configured fallback.
pub fn resolve_credentials(jar: &CookieJar, fallback: Option<&Credentials>) -> Option<Credentials> {
    let from_cookies = Credentials::new(
        jar.get(API_KEY_COOKIE).map(|c| c.value().to_string()).unwrap_or_default(),
        jar.get(API_SECRET_COOKIE).map(|c| c.value().to_string()).unwrap_or_default(),
    );
    if from_cookies.is_complete() {
        return Some(from_cookies);
    }
    fallback.filter(|c| c.is_complete()).cloned()
}

/// Extractor for handlers that need a Kraken key pair.
pub struct ApiCredentials(pub Credentials);

impl FromRequestParts<Arc<AppState>> for ApiCredentials {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        resolve_credentials(&jar, state.fallback_credentials.as_ref())
            .map(ApiCredentials)
            .ok_or_else(|| ApiError::Unauthorized("API credentials not configured".to_string()))
    }
}

/// Process-wide minimum spacing between credential submissions.
#[derive(Debug)]
pub struct CredentialCooldown {
    period: Duration,
    last_attempt: Mutex<Option<Instant>>,
}

impl CredentialCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_attempt: Mutex::new(None),
        }
    }

    /// Start an attempt now, or report the seconds (rounded up) left to wait.
    /// Check and mark happen under one lock.
    pub fn try_begin(&self) -> Result<(), u64> {
        let mut last = self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.period {
                let left = self.period - elapsed;
                return Err(left.as_secs() + u64::from(left.subsec_nanos() > 0));
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// Trim and drop embedded line breaks (pasted keys often carry them).
pub fn clean_field(value: &str) -> String {
    value.trim().replace(['\r', '\n'], "")
}

/// User-facing message for a failed validation call.
pub fn validation_message(error: &str) -> String {
    if error.contains("EAPI:Invalid key") {
        "Invalid API key".to_string()
    } else if error.contains("EAPI:Invalid signature") {
        "Invalid API secret".to_string()
    } else if error.contains("EGeneral:Permission denied") {
        "Permission denied. Check API permissions".to_string()
    } else {
        format!("Validation failed: {}", error)
    }
}

fn credential_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::days(COOKIE_MAX_AGE_DAYS))
        .build()
}

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

pub async fn auth_status(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let creds = resolve_credentials(&jar, state.fallback_credentials.as_ref());
    let key_len = creds.as_ref().map(|c| c.api_key.len()).unwrap_or(0);

    Json(json!({
        "authenticated": creds.is_some(),
        "hasApiKey": key_len > 0,
        "apiKeyLength": key_len,
    }))
}

pub async fn save_credentials(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(form): Json<CredentialsForm>,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    let creds = Credentials::new(clean_field(&form.api_key), clean_field(&form.api_secret));
    if !creds.is_complete() {
        return Err(ApiError::bad_request("Both API key and secret are required"));
    }

    if let Err(wait) = state.cooldown.try_begin() {
        return Err(ApiError::TooManyRequests(format!(
            "Too many attempts. Please wait {} seconds.",
            wait
        )));
    }

    if let Err(e) = state.service.validate_credentials(&creds).await {
        warn!("Credential validation failed: {}", e);
        return Err(ApiError::Unauthorized(validation_message(&e.to_string())));
    }

    info!("Credentials saved (key length {})", creds.api_key.len());
    let secure = !state.debug;
    let jar = jar
        .add(credential_cookie(API_KEY_COOKIE, creds.api_key, secure))
        .add(credential_cookie(API_SECRET_COOKIE, creds.api_secret, secure));

    Ok((jar, Json(json!({ "success": true }))))
}

pub async fn clear_credentials(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    let jar = jar
        .remove(Cookie::build(API_KEY_COOKIE).path("/"))
        .remove(Cookie::build(API_SECRET_COOKIE).path("/"));
    info!("Credentials cleared");
    (jar, Json(json!({ "success": true })))
}

/// Check a key pair without storing it.
pub async fn validate_credentials(
    State(state): State<Arc<AppState>>,
    Json(form): Json<CredentialsForm>,
) -> Response {
    let creds = Credentials::new(clean_field(&form.api_key), clean_field(&form.api_secret));
    if !creds.is_complete() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "error": "Missing credentials" })),
        )
            .into_response();
    }

    match state.service.validate_credentials(&creds).await {
        Ok(_) => Json(json!({ "valid": true })).into_response(),
        Err(e) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "valid": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    fn jar_with(cookies: &str) -> CookieJar {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookies).unwrap());
        CookieJar::from_headers(&headers)
    }

    #[test]
    fn test_cookies_take_precedence_over_fallback() {
        let fallback = Credentials::new("server-key", "server-secret");
        let jar = jar_with("kraken_api_key=browser-key; kraken_api_secret=browser-secret");

        let creds = resolve_credentials(&jar, Some(&fallback)).unwrap();
        assert_eq!(creds.api_key, "browser-key");

        // one cookie alone is not enough
        let jar = jar_with("kraken_api_key=browser-key");
        let creds = resolve_credentials(&jar, Some(&fallback)).unwrap();
        assert_eq!(creds.api_key, "server-key");

        assert!(resolve_credentials(&jar, None).is_none());
        assert!(resolve_credentials(&jar, Some(&Credentials::new("", ""))).is_none());
    }

    #[test]
    fn test_clean_field() {
        assert_eq!(clean_field("  abc\r\ndef \n"), "abcdef");
        assert_eq!(clean_field("\n"), "");
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(validation_message("API Error: EAPI:Invalid key"), "Invalid API key");
        assert_eq!(validation_message("API Error: EAPI:Invalid signature"), "Invalid API secret");
        assert_eq!(
            validation_message("API Error: EGeneral:Permission denied"),
            "Permission denied. Check API permissions"
        );
        assert_eq!(validation_message("timeout"), "Validation failed: timeout");
    }

    #[test]
    fn test_cooldown_rounds_wait_up() {
        let cooldown = CredentialCooldown::new(Duration::from_secs(30));
        assert_eq!(cooldown.try_begin(), Ok(()));
        assert_eq!(cooldown.try_begin(), Err(30));

        let short = CredentialCooldown::new(Duration::from_millis(200));
        short.try_begin().unwrap();
        assert_eq!(short.try_begin(), Err(1));

        let disabled = CredentialCooldown::new(Duration::ZERO);
        assert_eq!(disabled.try_begin(), Ok(()));
        assert_eq!(disabled.try_begin(), Ok(()));
    }

    #[test]
    fn test_cooldown_admits_one_concurrent_attempt() {
        let cooldown = CredentialCooldown::new(Duration::from_secs(30));
        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| cooldown.try_begin().is_ok())).collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_credential_cookie_flags() {
        let cookie = credential_cookie(API_KEY_COOKIE, "k".to_string(), true);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(30)));
    }
}
