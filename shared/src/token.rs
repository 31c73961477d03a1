//! Signed session tokens.
//!
//! A token is `header.payload.signature`, each segment base64url without
//! padding. The signature is HMAC-SHA256 over `header.payload` keyed with the
//! shared secret. Only HMAC-SHA256 is supported and the header is never
//! interpreted, so there is nothing to negotiate.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (account) id.
    pub sub: String,
    /// Session id; one Joined connection per session.
    pub sid: String,
    /// Expiry, unix seconds.
    pub exp: u64,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,
    /// Character ids the subject owns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned: Option<Vec<String>>,
}

impl SessionClaims {
    /// True when the claims either carry no scopes at all or include `scope`.
    pub fn permits(&self, scope: &str) -> bool {
        match &self.scope {
            Some(scopes) if !scopes.is_empty() => scopes.iter().any(|s| s == scope),
            _ => true,
        }
    }

    pub fn owned_ids(&self) -> &[String] {
        self.owned.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token must have exactly three segments")]
    Malformed,
    #[error("token segment is not valid base64url")]
    Encoding,
    #[error("token signature mismatch")]
    Signature,
    #[error("token payload is not valid claims")]
    Payload,
    #[error("token expired")]
    Expired,
}

fn mac_for(secret: &[u8], signing_input: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(signing_input.as_bytes());
    mac
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Signs `claims` with `secret`, producing a token `verify` accepts.
pub fn issue(claims: &SessionClaims, secret: &[u8]) -> Result<String, serde_json::Error> {
    let header = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);
    let signature = URL_SAFE_NO_PAD.encode(mac_for(secret, &signing_input).finalize().into_bytes());
    Ok(format!("{}.{}", signing_input, signature))
}

/// Verifies `token` against `secret` using the wall clock.
pub fn verify(token: &str, secret: &[u8]) -> Result<SessionClaims, TokenError> {
    verify_at(token, secret, now_secs())
}

/// Verifies `token` against `secret` as of `now` (unix seconds).
pub fn verify_at(token: &str, secret: &[u8], now: u64) -> Result<SessionClaims, TokenError> {
    let mut segments = token.split('.');
    let (header, payload, signature) =
        match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(TokenError::Malformed),
        };

    URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Encoding)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Encoding)?;

    // verify_slice compares in constant time
    mac_for(secret, &format!("{}.{}", header, payload))
        .verify_slice(&signature)
        .map_err(|_| TokenError::Signature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Encoding)?;
    let claims: SessionClaims =
        serde_json::from_slice(&payload).map_err(|_| TokenError::Payload)?;

    if claims.exp < now {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";
    const NOW: u64 = 1_700_000_000;

    fn claims() -> SessionClaims {
        SessionClaims {
            sub: "user-1".to_string(),
            sid: "sess-1".to_string(),
            exp: NOW + 60,
            nonce: "n1".to_string(),
            scope: Some(vec!["plaza:join".to_string()]),
            owned: Some(vec!["char-a".to_string(), "char-b".to_string()]),
        }
    }

    #[test]
    fn test_issue_then_verify_returns_claims() {
        let token = issue(&claims(), SECRET).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(verify_at(&token, SECRET, NOW), Ok(claims()));
    }

    #[test]
    fn test_expiry_boundary() {
        let token = issue(&claims(), SECRET).unwrap();
        assert!(verify_at(&token, SECRET, NOW + 60).is_ok());
        assert_eq!(
            verify_at(&token, SECRET, NOW + 61),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue(&claims(), SECRET).unwrap();
        assert_eq!(
            verify_at(&token, b"other-secret", NOW),
            Err(TokenError::Signature)
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = issue(&claims(), SECRET).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let mut forged = claims();
        forged.sid = "someone-else".to_string();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            verify_at(&tampered, SECRET, NOW),
            Err(TokenError::Signature)
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let token = issue(&claims(), SECRET).unwrap();
        let (body, signature) = token.rsplit_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
        bytes[0] ^= 0x01;
        let tampered = format!("{}.{}", body, URL_SAFE_NO_PAD.encode(bytes));

        assert_eq!(
            verify_at(&tampered, SECRET, NOW),
            Err(TokenError::Signature)
        );
    }

    #[test]
    fn test_segment_count_enforced() {
        assert_eq!(verify_at("a.b", SECRET, NOW), Err(TokenError::Malformed));
        assert_eq!(verify_at("a.b.c.d", SECRET, NOW), Err(TokenError::Malformed));
        assert_eq!(verify_at("", SECRET, NOW), Err(TokenError::Malformed));
    }

    #[test]
    fn test_signed_garbage_payload_rejected() {
        let header = URL_SAFE_NO_PAD.encode(HEADER);
        let payload = URL_SAFE_NO_PAD.encode(b"{\"sub\":42}");
        let signing_input = format!("{}.{}", header, payload);
        let signature =
            URL_SAFE_NO_PAD.encode(mac_for(SECRET, &signing_input).finalize().into_bytes());
        let token = format!("{}.{}", signing_input, signature);

        assert_eq!(verify_at(&token, SECRET, NOW), Err(TokenError::Payload));
    }

    #[test]
    fn test_scope_permits() {
        let mut c = claims();
        assert!(c.permits("plaza:join"));

        c.scope = Some(vec!["other:scope".to_string()]);
        assert!(!c.permits("plaza:join"));

        c.scope = Some(vec![]);
        assert!(c.permits("plaza:join"));

        c.scope = None;
        assert!(c.permits("plaza:join"));
    }
}
