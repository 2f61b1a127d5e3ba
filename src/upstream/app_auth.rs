//! Application-level authentication.
//!
//! The upstream API authenticates an application with a short-lived RS256
//! JWT signed by the application's private key. That JWT can list
//! installations and mint installation tokens, nothing else.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::upstream::types::{BootstrapError, BootstrapResult};

/// Backdate `iat` to absorb clock drift between us and the API.
const CLOCK_SKEW: Duration = Duration::from_secs(60);
/// The API rejects application JWTs that live longer than ten minutes.
const JWT_LIFETIME: Duration = Duration::from_secs(9 * 60);

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AppClaims {
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
}

/// Credential material identifying the application.
#[derive(Clone)]
pub struct AppCredentials {
    app_id: String,
    client_id: Option<String>,
    private_key: String,
}

impl AppCredentials {
    /// `private_key` is the PEM-encoded RSA key issued for the application.
    pub fn new(app_id: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            client_id: None,
            private_key: private_key.into(),
        }
    }

    /// Identify as the application's client id instead of its numeric id.
    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id.filter(|id| !id.is_empty());
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Issuer claim: the client id when known, the app id otherwise.
    fn issuer(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.app_id)
    }

    /// Sign a fresh application JWT.
    pub fn app_jwt(&self) -> BootstrapResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.app_jwt_at(now)
    }

    fn app_jwt_at(&self, now: u64) -> BootstrapResult<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| BootstrapError::Credential(format!("invalid private key: {}", e)))?;

        let claims = AppClaims {
            iat: now.saturating_sub(CLOCK_SKEW.as_secs()),
            exp: now + JWT_LIFETIME.as_secs(),
            iss: self.issuer().to_string(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| BootstrapError::Credential(format!("JWT signing failed: {}", e)))
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("client_id", &self.client_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/app-key.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/app-key.pub.pem");

    fn verify(token: &str) -> AppClaims {
        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).unwrap();
        decode::<AppClaims>(token, &key, &Validation::new(Algorithm::RS256))
            .unwrap()
            .claims
    }

    #[test]
    fn test_jwt_claims() {
        let creds = AppCredentials::new("12345", PRIVATE_KEY);
        let token = creds.app_jwt().unwrap();
        let claims = verify(&token);

        assert_eq!(claims.iss, "12345");
        assert_eq!(claims.exp - claims.iat, CLOCK_SKEW.as_secs() + JWT_LIFETIME.as_secs());
    }

    #[test]
    fn test_client_id_is_issuer() {
        let creds = AppCredentials::new("12345", PRIVATE_KEY)
            .with_client_id(Some("Iv1.0123abcd".into()));
        assert_eq!(verify(&creds.app_jwt().unwrap()).iss, "Iv1.0123abcd");

        let creds = AppCredentials::new("12345", PRIVATE_KEY).with_client_id(Some(String::new()));
        assert_eq!(verify(&creds.app_jwt().unwrap()).iss, "12345");
    }

    #[test]
    fn test_fixed_clock() {
        let creds = AppCredentials::new("1", PRIVATE_KEY);
        let token = creds.app_jwt_at(1_000).unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn test_bad_key_is_credential_error() {
        let creds = AppCredentials::new("1", "not a pem");
        assert!(matches!(creds.app_jwt(), Err(BootstrapError::Credential(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let creds = AppCredentials::new("1", PRIVATE_KEY);
        assert!(!format!("{creds:?}").contains("BEGIN"));
    }
}
