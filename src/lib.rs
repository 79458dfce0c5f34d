//! SAML bearer-assertion authentication for the Intuit Customer Account Data API.
//!
//! This crate builds short-lived SAML 2.0 bearer assertions, signs them with
//! an enveloped XML-DSig signature, exchanges them at the OAuth token endpoint
//! for an access token/secret pair, and caches those credentials per customer
//! with TTL eviction. REST callers obtain a credential via
//! [`cache::CredentialCache::get_or_create`] before issuing any authenticated
//! request.

/// SAML 2.0 assertion construction and canonical serialization
pub mod assertion;

/// Per-customer credential caching with TTL eviction
pub mod cache;

/// Canonical XML serialization used as digest and signature input
pub mod canonical;

/// Client configuration and private key loading
pub mod config;

/// Assertion-for-credential exchange at the token endpoint
pub mod exchange;

/// Enveloped XML-DSig signing and verification
pub mod signature;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use rsa::RsaPrivateKey;

    /// Shared 2048-bit RSA test key; generated once because key generation
    /// dominates test runtime.
    pub(crate) fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("generate RSA test key")
        })
    }
}
