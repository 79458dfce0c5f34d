//! Client configuration.
//!
//! Everything the auth flow needs is carried explicitly in a
//! [`ClientConfig`] passed into the exchanger and cache constructors; there is
//! no process-global state, and bad key material is a constructor error rather
//! than a panic.

use anyhow::{anyhow, Result};
use chrono::Duration;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

/// Production token endpoint for exchanging a signed assertion.
pub const ACCESS_TOKEN_ENDPOINT: &str =
    "https://oauth.intuit.com/oauth/v1/get_access_token_by_saml";

const DEFAULT_ASSERTION_LIFETIME_MINUTES: i64 = 10;

/// Configuration shared by the exchanger and the credential cache.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// OAuth consumer key identifying the calling application.
    pub consumer_key: String,
    /// OAuth consumer secret, used by callers when signing authorized API
    /// requests with an exchanged credential.
    pub consumer_secret: String,
    /// SAML provider id: the issuer (and audience) of built assertions.
    pub saml_provider_id: String,
    /// RSA private key registered with the remote verifier.
    pub private_key: RsaPrivateKey,
    /// Token endpoint URL the signed assertion is posted to.
    pub token_endpoint: String,
    /// Validity window length of built assertions. Must exceed the expected
    /// exchange round-trip latency or the remote verifier will reject the
    /// assertion as expired.
    pub assertion_lifetime: Duration,
    /// Explicit credential TTL. When unset, exchanged credentials expire with
    /// the assertion's own validity window.
    pub credential_ttl: Option<Duration>,
}

impl ClientConfig {
    /// Creates a configuration with the production token endpoint, a
    /// 10-minute assertion lifetime, and no explicit credential TTL.
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        saml_provider_id: impl Into<String>,
        private_key: RsaPrivateKey,
    ) -> Self {
        ClientConfig {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            saml_provider_id: saml_provider_id.into(),
            private_key,
            token_endpoint: ACCESS_TOKEN_ENDPOINT.to_owned(),
            assertion_lifetime: Duration::minutes(DEFAULT_ASSERTION_LIFETIME_MINUTES),
            credential_ttl: None,
        }
    }

    /// Overrides the token endpoint URL.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Overrides the assertion validity window length.
    pub fn with_assertion_lifetime(mut self, lifetime: Duration) -> Self {
        self.assertion_lifetime = lifetime;
        self
    }

    /// Sets an explicit credential TTL, decoupling credential expiry from the
    /// assertion validity window.
    pub fn with_credential_ttl(mut self, ttl: Duration) -> Self {
        self.credential_ttl = Some(ttl);
        self
    }
}

/// Parses a PEM-encoded RSA private key, accepting both PKCS#8
/// (`PRIVATE KEY`) and PKCS#1 (`RSA PRIVATE KEY`) encodings.
///
/// # Arguments
///
/// * `pem` - PEM text of the private key.
///
/// # Returns
///
/// The parsed key, or a descriptive error for unusable key material.
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| anyhow!("bad private key: {e}"))
}
