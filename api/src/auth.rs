//! Caller authentication for the two webhook endpoints.
//!
//! The health-export endpoint takes a per-user webhook token (`bsync_wh_...`)
//! stored only as a SHA-256 hash. The aggregator endpoint carries no user
//! credential; every call is signed with a shared HMAC secret instead.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use biosync_core::auth::{WEBHOOK_TOKEN_PREFIX, hash_token, looks_like_webhook_token};

use crate::error::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";
const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

const ID_HEADERS: [&str; 2] = ["webhook-id", "svix-id"];
const TIMESTAMP_HEADERS: [&str; 2] = ["webhook-timestamp", "svix-timestamp"];
const SIGNATURE_HEADERS: [&str; 2] = ["webhook-signature", "svix-signature"];

/// User resolved from a webhook token.
#[derive(Debug, Clone)]
pub struct WebhookUser {
    pub user_id: Uuid,
    pub token_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct WebhookTokenRow {
    id: Uuid,
    user_id: Uuid,
}

/// Token from `Authorization: Bearer` or `X-Webhook-Token`.
fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer
        .or_else(|| {
            headers
                .get(WEBHOOK_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn unauthorized(message: &str) -> AppError {
    AppError::Unauthorized {
        message: message.to_string(),
        docs_hint: Some(format!(
            "Send 'Authorization: Bearer {WEBHOOK_TOKEN_PREFIX}...' or 'X-Webhook-Token'. \
             Create a token with 'biosync admin create-webhook-token'."
        )),
    }
}

impl FromRequestParts<AppState> for WebhookUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            presented_token(&parts.headers).ok_or_else(|| unauthorized("Missing webhook token"))?;
        if !looks_like_webhook_token(token) {
            return Err(unauthorized("Invalid token format"));
        }
        authenticate_webhook_token(token, &state.db).await
    }
}

async fn authenticate_webhook_token(
    token: &str,
    pool: &sqlx::PgPool,
) -> Result<WebhookUser, AppError> {
    let token_hash = hash_token(token);

    let row = sqlx::query_as::<_, WebhookTokenRow>(
        "SELECT id, user_id FROM webhook_tokens \
         WHERE token_hash = $1 AND is_revoked = FALSE",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)?
    .ok_or_else(|| unauthorized("Unknown or revoked webhook token"))?;

    // Fire-and-forget last_used_at update
    let pool_clone = pool.clone();
    let token_id = row.id;
    tokio::spawn(async move {
        let _ = sqlx::query("UPDATE webhook_tokens SET last_used_at = NOW() WHERE id = $1")
            .bind(token_id)
            .execute(&pool_clone)
            .await;
    });

    Ok(WebhookUser {
        user_id: row.user_id,
        token_id: row.id,
    })
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("webhook signing secret is not configured")]
    NotConfigured,
    #[error("signing secret is not valid base64")]
    BadSecret,
    #[error("missing header '{0}'")]
    MissingHeader(&'static str),
    #[error("webhook timestamp is not a unix timestamp")]
    BadTimestamp,
    #[error("webhook timestamp is outside the tolerance window")]
    Expired,
    #[error("no signature matched")]
    Mismatch,
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::NotConfigured | SignatureError::BadSecret => {
                AppError::Internal(err.to_string())
            }
            other => AppError::InvalidSignature {
                message: other.to_string(),
            },
        }
    }
}

fn signed_header<'a>(
    headers: &'a HeaderMap,
    names: [&'static str; 2],
) -> Result<&'a str, SignatureError> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .ok_or(SignatureError::MissingHeader(names[0]))
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, SignatureError> {
    let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
    BASE64
        .decode(encoded.trim())
        .map_err(|_| SignatureError::BadSecret)
}

/// Verify a signed aggregator request.
///
/// Signed content is `{id}.{timestamp}.{body}`. The signature header holds
/// space-separated `v1,<base64>` entries; one match is enough.
pub fn verify_signed_request(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let secret = secret.ok_or(SignatureError::NotConfigured)?;
    let key = decode_secret(secret)?;

    let id = signed_header(headers, ID_HEADERS)?;
    let timestamp = signed_header(headers, TIMESTAMP_HEADERS)?;
    let signatures = signed_header(headers, SIGNATURE_HEADERS)?;

    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    if (now.timestamp() - sent_at).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mut signed = format!("{id}.{timestamp}.").into_bytes();
    signed.extend_from_slice(body);

    for entry in signatures.split_whitespace() {
        let Some((version, encoded)) = entry.split_once(',') else {
            continue;
        };
        if version != SIGNATURE_VERSION {
            continue;
        }
        let Ok(expected) = BASE64.decode(encoded) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SignatureError::BadSecret)?;
        mac.update(&signed);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_300_000, 0).unwrap()
    }

    fn sign(id: &str, timestamp: &str, body: &[u8]) -> String {
        let key = decode_secret(SECRET).unwrap();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(format!("{id}.{timestamp}.").as_bytes());
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn headers(id: &str, timestamp: &str, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("webhook-id", HeaderValue::from_str(id).unwrap());
        headers.insert("webhook-timestamp", HeaderValue::from_str(timestamp).unwrap());
        headers.insert("webhook-signature", HeaderValue::from_str(signature).unwrap());
        headers
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"event_type":"daily.data.glucose.created"}"#;
        let sig = sign("msg_1", "1705300000", body);
        let headers = headers("msg_1", "1705300000", &format!("v1,{sig}"));
        assert_eq!(
            verify_signed_request(&headers, body, Some(SECRET), 300, now()),
            Ok(())
        );
    }

    #[test]
    fn any_listed_signature_may_match() {
        let body = b"{}";
        let sig = sign("msg_2", "1705300000", body);
        let headers = headers(
            "msg_2",
            "1705300000",
            &format!("v1,AAAA v2,ignored v1,{sig}"),
        );
        assert!(verify_signed_request(&headers, body, Some(SECRET), 300, now()).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let sig = sign("msg_3", "1705300000", b"{\"a\":1}");
        let headers = headers("msg_3", "1705300000", &format!("v1,{sig}"));
        assert_eq!(
            verify_signed_request(&headers, b"{\"a\":2}", Some(SECRET), 300, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let sig = sign("msg_4", "1705290000", b"{}");
        let headers = headers("msg_4", "1705290000", &format!("v1,{sig}"));
        assert_eq!(
            verify_signed_request(&headers, b"{}", Some(SECRET), 300, now()),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn svix_header_aliases_are_accepted() {
        let sig = sign("msg_5", "1705300000", b"{}");
        let mut headers = HeaderMap::new();
        headers.insert("svix-id", HeaderValue::from_static("msg_5"));
        headers.insert("svix-timestamp", HeaderValue::from_static("1705300000"));
        headers.insert("svix-signature", HeaderValue::from_str(&format!("v1,{sig}")).unwrap());
        assert!(verify_signed_request(&headers, b"{}", Some(SECRET), 300, now()).is_ok());
    }

    #[test]
    fn missing_headers_and_secret_are_reported() {
        assert_eq!(
            verify_signed_request(&HeaderMap::new(), b"{}", Some(SECRET), 300, now()),
            Err(SignatureError::MissingHeader("webhook-id"))
        );
        assert_eq!(
            verify_signed_request(&HeaderMap::new(), b"{}", None, 300, now()),
            Err(SignatureError::NotConfigured)
        );
    }

    #[test]
    fn token_is_read_from_bearer_or_custom_header() {
        let mut bearer = HeaderMap::new();
        bearer.insert("authorization", HeaderValue::from_static("Bearer bsync_wh_abc"));
        assert_eq!(presented_token(&bearer), Some("bsync_wh_abc"));

        let mut custom = HeaderMap::new();
        custom.insert("x-webhook-token", HeaderValue::from_static(" bsync_wh_def "));
        assert_eq!(presented_token(&custom), Some("bsync_wh_def"));

        assert_eq!(presented_token(&HeaderMap::new()), None);
    }
}
