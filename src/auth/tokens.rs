use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// What a signed token may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Confirm,
    Reset,
    ChangeEmail,
    Auth,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    exp: u64,
}

/// The contents of a token that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
    pub payload: Option<String>,
}

/// HS256 signer for the time-limited account tokens.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        payload: Option<&str>,
        ttl_secs: u64,
    ) -> AppResult<String> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: subject.to_string(),
            kind,
            payload: payload.map(str::to_string),
            exp: now + ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("Token signing failed: {}", e)))
    }

    /// Returns `None` for a bad signature, an expired token or a token of
    /// another kind. The cause is deliberately not reported.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Option<VerifiedToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::warn!("Rejected {:?} token: {}", kind, e);
                return None;
            }
        };

        if claims.kind != kind {
            tracing::warn!("Rejected token: expected {:?}, got {:?}", kind, claims.kind);
            return None;
        }

        Some(VerifiedToken {
            subject: claims.sub,
            payload: claims.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warnings_during(f: impl FnOnce()) -> String {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret")
    }

    #[test]
    fn issued_token_verifies() {
        let s = signer();
        let token = s.issue(TokenKind::Confirm, "user-1", None, 3600).unwrap();
        let verified = s.verify(&token, TokenKind::Confirm).unwrap();
        assert_eq!(verified.subject, "user-1");
        assert_eq!(verified.payload, None);
    }

    #[test]
    fn payload_round_trips() {
        let s = signer();
        let token = s
            .issue(TokenKind::ChangeEmail, "user-1", Some("new@example.com"), 60)
            .unwrap();
        let verified = s.verify(&token, TokenKind::ChangeEmail).unwrap();
        assert_eq!(verified.payload.as_deref(), Some("new@example.com"));
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let s = signer();
        let token = s.issue(TokenKind::Reset, "user-1", None, 60).unwrap();
        assert!(s.verify(&token, TokenKind::Confirm).is_none());
        assert!(s.verify(&token, TokenKind::Auth).is_none());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let s = signer();
        let token = s.issue(TokenKind::Reset, "user-1", None, 60).unwrap();
        assert!(s.verify(&format!("{}a", token), TokenKind::Reset).is_none());
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = signer().issue(TokenKind::Auth, "user-1", None, 60).unwrap();
        let other = TokenSigner::new(b"another-secret");
        assert!(other.verify(&token, TokenKind::Auth).is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(signer().verify("not-a-token", TokenKind::Auth).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let s = signer();
        let token = s.issue(TokenKind::Confirm, "user-1", None, 1).unwrap();
        assert!(s.verify(&token, TokenKind::Confirm).is_some());
        std::thread::sleep(Duration::from_secs(2));
        assert!(s.verify(&token, TokenKind::Confirm).is_none());
    }

    #[test]
    fn rejected_tokens_are_logged_as_warnings() {
        let s = signer();
        let reset = s.issue(TokenKind::Reset, "user-1", None, 60).unwrap();
        let logs = warnings_during(|| {
            assert!(s.verify("not-a-token", TokenKind::Auth).is_none());
            assert!(s.verify(&reset, TokenKind::Confirm).is_none());
        });
        assert_eq!(logs.matches("WARN").count(), 2);
        assert!(logs.contains("Rejected Auth token"));
        assert!(logs.contains("expected Confirm, got Reset"));
    }

    #[test]
    fn accepted_tokens_log_nothing() {
        let s = signer();
        let token = s.issue(TokenKind::Auth, "user-1", None, 60).unwrap();
        let logs = warnings_during(|| {
            assert!(s.verify(&token, TokenKind::Auth).is_some());
        });
        assert!(logs.is_empty());
    }
}
