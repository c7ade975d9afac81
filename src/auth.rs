use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::{PgPool, Row};

use crate::error::EngineError;
use crate::types::{AppState, StaffUser, ROLE_ADMIN};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

pub const ACCESS_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TTL_SECS: i64 = 7 * 24 * 3600;

/// Signed credential: `{user_id}.{expiry_unix}.{hmac_hex}`. User ids are
/// UUIDs, so `.` never appears inside a segment.
pub fn sign_token(secret: &str, user_id: &str, expires_at: i64) -> String {
    let payload = format!("{user_id}.{expires_at}");
    // HMAC accepts keys of any length, so construction cannot fail
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(payload.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("{payload}.{sig}")
}

#[derive(Debug, PartialEq)]
pub enum TokenCheck {
    Valid(String),
    Expired(String),
    Invalid,
}

pub fn verify_token(secret: &str, token: &str, now: DateTime<Utc>) -> TokenCheck {
    let mut parts = token.splitn(3, '.');
    let (Some(user_id), Some(exp), Some(sig)) = (parts.next(), parts.next(), parts.next())
    else {
        return TokenCheck::Invalid;
    };
    let Ok(expires_at) = exp.parse::<i64>() else {
        return TokenCheck::Invalid;
    };
    let Ok(signature_bytes) = hex::decode(sig.trim()) else {
        return TokenCheck::Invalid;
    };
    let payload = format!("{user_id}.{expires_at}");
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return TokenCheck::Invalid;
    };
    mac.update(payload.as_bytes());
    if mac.verify_slice(&signature_bytes).is_err() {
        return TokenCheck::Invalid;
    }
    if expires_at < now.timestamp() {
        return TokenCheck::Expired(user_id.to_string());
    }
    TokenCheck::Valid(user_id.to_string())
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub fn auth_cookie(name: &str, token: &str, max_age_secs: i64) -> String {
    format!("{name}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}")
}

pub fn expired_cookie(name: &str) -> String {
    format!("{name}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

pub fn staff_from_row(row: sqlx::postgres::PgRow) -> StaffUser {
    StaffUser {
        id: row.get("id"),
        user_name: row.get("user_name"),
        email: row.get("email"),
        user_role: row.get("user_role"),
        parent: row.get("parent"),
        created_at: row.get("created_at"),
    }
}

pub async fn staff_by_id(db: &PgPool, user_id: &str) -> Result<Option<StaffUser>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, user_name, email, user_role, parent, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row.map(staff_from_row))
}

/// The single admin at the root of the account tree, if one has registered.
pub async fn find_admin(db: &PgPool) -> Result<Option<StaffUser>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, user_name, email, user_role, parent, created_at FROM users \
         WHERE user_role = $1 LIMIT 1",
    )
    .bind(ROLE_ADMIN)
    .fetch_optional(db)
    .await?;
    Ok(row.map(staff_from_row))
}

/// An authenticated staff request. When the access token was renewed from
/// the refresh token mid-request, `renewed_access_cookie` carries the
/// replacement `Set-Cookie` value to attach to the response.
pub struct AuthedStaff {
    pub user: StaffUser,
    pub renewed_access_cookie: Option<String>,
}

impl AuthedStaff {
    pub fn respond(self, inner: impl IntoResponse) -> Response {
        let mut response = inner.into_response();
        if let Some(cookie) = self.renewed_access_cookie {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

/// Resolve the staff identity behind a request, failing closed.
///
/// A valid access cookie wins outright. An expired or missing one falls
/// through to the refresh cookie, which must verify and exactly match the
/// session token stored on the user row; a fresh access cookie is then
/// minted. Anything else is `SessionExpired`, a forced client logout.
pub async fn authed_staff(
    state: &Arc<AppState>,
    headers: &HeaderMap,
) -> Result<AuthedStaff, EngineError> {
    let now = Utc::now();

    if let Some(token) = cookie_value(headers, ACCESS_COOKIE) {
        if let TokenCheck::Valid(user_id) = verify_token(&state.token_secret, &token, now) {
            let user = staff_by_id(&state.db, &user_id)
                .await?
                .ok_or(EngineError::SessionExpired)?;
            return Ok(AuthedStaff {
                user,
                renewed_access_cookie: None,
            });
        }
    }

    let refresh = cookie_value(headers, REFRESH_COOKIE).ok_or(EngineError::SessionExpired)?;
    let TokenCheck::Valid(user_id) = verify_token(&state.token_secret, &refresh, now) else {
        return Err(EngineError::SessionExpired);
    };
    let stored: Option<Option<String>> =
        sqlx::query_scalar("SELECT refresh_token FROM users WHERE id = $1")
            .bind(&user_id)
            .fetch_optional(&state.db)
            .await?;
    match stored.flatten() {
        Some(active) if active == refresh => {}
        _ => return Err(EngineError::SessionExpired),
    }
    let user = staff_by_id(&state.db, &user_id)
        .await?
        .ok_or(EngineError::SessionExpired)?;

    let access = sign_token(&state.token_secret, &user.id, now.timestamp() + ACCESS_TTL_SECS);
    tracing::debug!(user = %user.email, "access token renewed from refresh token");
    Ok(AuthedStaff {
        user,
        renewed_access_cookie: Some(auth_cookie(ACCESS_COOKIE, &access, ACCESS_TTL_SECS)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "test-secret";

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn signed_token_round_trips() {
        let token = sign_token(SECRET, "user-1", 1_000);
        assert_eq!(
            verify_token(SECRET, &token, at(500)),
            TokenCheck::Valid("user-1".to_string())
        );
    }

    #[test]
    fn expired_token_still_names_its_user() {
        let token = sign_token(SECRET, "user-1", 1_000);
        assert_eq!(
            verify_token(SECRET, &token, at(2_000)),
            TokenCheck::Expired("user-1".to_string())
        );
    }

    #[test]
    fn tampered_token_is_invalid() {
        let token = sign_token(SECRET, "user-1", 1_000);
        let forged = token.replace("user-1", "user-2");
        assert_eq!(verify_token(SECRET, &forged, at(500)), TokenCheck::Invalid);
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let token = sign_token("other-secret", "user-1", 1_000);
        assert_eq!(verify_token(SECRET, &token, at(500)), TokenCheck::Invalid);
    }

    #[test]
    fn garbage_tokens_are_invalid() {
        assert_eq!(verify_token(SECRET, "", at(0)), TokenCheck::Invalid);
        assert_eq!(verify_token(SECRET, "a.b", at(0)), TokenCheck::Invalid);
        assert_eq!(
            verify_token(SECRET, "a.notanumber.cafe", at(0)),
            TokenCheck::Invalid
        );
    }

    #[test]
    fn cookie_header_parsing_finds_named_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("access_token=abc.123.def; refresh_token=xyz"),
        );
        assert_eq!(
            cookie_value(&headers, ACCESS_COOKIE).as_deref(),
            Some("abc.123.def")
        );
        assert_eq!(cookie_value(&headers, REFRESH_COOKIE).as_deref(), Some("xyz"));
        assert_eq!(cookie_value(&headers, "other"), None);
    }
}
