//! Signed, time-limited, purpose-scoped tokens.
//!
//! A token is `body.tag`, both halves base64url without padding:
//! - `body` is the JSON envelope `{"iat": <unix seconds>, "data": <payload>}`
//! - `tag` is HMAC-SHA256 over `body`, keyed by a per-purpose key derived from
//!   the process secret
//!
//! Tokens are readable by anyone holding them; they are tamper-evident, not
//! encrypted.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Prefix mixed into the secret before the purpose when deriving a tag key.
const KEY_CONTEXT: &[u8] = b"postboard.signer.";

const SEPARATOR: char = '.';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Malformed, tampered with, or issued for another purpose.
    #[error("token is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    iat: i64,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    iat: i64,
    data: T,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Arc<[u8]>,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn issue<T: Serialize>(&self, payload: &T, purpose: &str) -> anyhow::Result<String> {
        self.issue_at(payload, purpose, OffsetDateTime::now_utc())
    }

    pub fn issue_at<T: Serialize>(
        &self,
        payload: &T,
        purpose: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let envelope = EnvelopeRef {
            iat: now.unix_timestamp(),
            data: payload,
        };
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope)?);

        let mut mac = self.mac_for(purpose)?;
        mac.update(body.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        debug!(%purpose, "token issued");
        Ok(format!("{body}{SEPARATOR}{tag}"))
    }

    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        purpose: &str,
        max_age: Duration,
    ) -> Result<T, TokenError> {
        self.verify_at(token, purpose, max_age, OffsetDateTime::now_utc())
    }

    /// Checks integrity first, then age. A token is still valid at exactly
    /// `max_age` seconds old; one stamped in the future counts as expired.
    pub fn verify_at<T: DeserializeOwned>(
        &self,
        token: &str,
        purpose: &str,
        max_age: Duration,
        now: OffsetDateTime,
    ) -> Result<T, TokenError> {
        let (body, tag) = token.split_once(SEPARATOR).ok_or(TokenError::Invalid)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| TokenError::Invalid)?;

        let mut mac = self.mac_for(purpose).map_err(|_| TokenError::Invalid)?;
        mac.update(body.as_bytes());
        mac.verify_slice(&tag).map_err(|_| TokenError::Invalid)?;

        let raw = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::Invalid)?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&raw).map_err(|_| TokenError::Invalid)?;

        let age = now.unix_timestamp() - envelope.iat;
        if age < 0 || age > max_age.whole_seconds() {
            debug!(%purpose, age, "token outside its validity window");
            return Err(TokenError::Expired);
        }
        Ok(envelope.data)
    }

    fn mac_for(&self, purpose: &str) -> anyhow::Result<HmacSha256> {
        let mut derive = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("signing key: {e}"))?;
        derive.update(KEY_CONTEXT);
        derive.update(purpose.as_bytes());
        let key = derive.finalize().into_bytes();
        <HmacSha256 as Mac>::new_from_slice(&key).map_err(|e| anyhow::anyhow!("derived key: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::PendingRegistration;

    const PURPOSE: &str = "email-confirm";

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret")
    }

    fn pending() -> PendingRegistration {
        PendingRegistration {
            email: "a@x.com".into(),
            nickname: "Ann".into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            contact_info: "555-0100".into(),
        }
    }

    #[test]
    fn issued_token_verifies_to_same_payload() {
        let s = signer();
        let token = s.issue(&pending(), PURPOSE).unwrap();
        let back: PendingRegistration = s.verify(&token, PURPOSE, Duration::hours(1)).unwrap();
        assert_eq!(back, pending());
    }

    #[test]
    fn token_is_url_safe() {
        let token = signer().issue(&pending(), PURPOSE).unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn token_older_than_max_age_is_expired() {
        let s = signer();
        let now = OffsetDateTime::now_utc();
        let token = s
            .issue_at(&pending(), PURPOSE, now - Duration::seconds(3601))
            .unwrap();
        let err = s
            .verify_at::<PendingRegistration>(&token, PURPOSE, Duration::hours(1), now)
            .unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[test]
    fn token_at_exactly_max_age_is_accepted() {
        let s = signer();
        let now = OffsetDateTime::now_utc();
        let token = s
            .issue_at(&pending(), PURPOSE, now - Duration::hours(1))
            .unwrap();
        assert!(s
            .verify_at::<PendingRegistration>(&token, PURPOSE, Duration::hours(1), now)
            .is_ok());
    }

    #[test]
    fn token_from_the_future_is_expired() {
        let s = signer();
        let now = OffsetDateTime::now_utc();
        let token = s
            .issue_at(&pending(), PURPOSE, now + Duration::seconds(5))
            .unwrap();
        let err = s
            .verify_at::<PendingRegistration>(&token, PURPOSE, Duration::hours(1), now)
            .unwrap_err();
        assert_eq!(err, TokenError::Expired);

        let same_second = s.issue_at(&pending(), PURPOSE, now).unwrap();
        assert!(s
            .verify_at::<PendingRegistration>(&same_second, PURPOSE, Duration::hours(1), now)
            .is_ok());
    }

    #[test]
    fn purpose_is_part_of_the_signature() {
        let s = signer();
        let token = s.issue(&pending(), PURPOSE).unwrap();
        let err = s
            .verify::<PendingRegistration>(&token, "password-reset", Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::Invalid);
    }

    #[test]
    fn other_secret_cannot_verify() {
        let token = signer().issue(&pending(), PURPOSE).unwrap();
        let err = TokenSigner::new("another-secret")
            .verify::<PendingRegistration>(&token, PURPOSE, Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::Invalid);
    }

    #[test]
    fn any_single_bit_flip_is_rejected() {
        let s = signer();
        let token = s.issue(&pending(), PURPOSE).unwrap();
        let bytes = token.as_bytes();

        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut mutated = bytes.to_vec();
                mutated[i] ^= 1 << bit;
                let Ok(mutated) = String::from_utf8(mutated) else {
                    continue;
                };
                let res = s.verify::<PendingRegistration>(&mutated, PURPOSE, Duration::hours(1));
                assert!(res.is_err(), "flip at byte {i} bit {bit} was accepted");
            }
        }
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        let s = signer();
        for bad in ["", "abc", "a.b", "...", "eyJpYXQiOjB9.", ".AAAA"] {
            let err = s
                .verify::<PendingRegistration>(bad, PURPOSE, Duration::hours(1))
                .unwrap_err();
            assert_eq!(err, TokenError::Invalid, "{bad:?}");
        }
    }

    #[test]
    fn payload_of_wrong_shape_is_invalid() {
        let s = signer();
        let token = s.issue(&"just a string", PURPOSE).unwrap();
        let err = s
            .verify::<PendingRegistration>(&token, PURPOSE, Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::Invalid);
    }
}
