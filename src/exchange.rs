//! Exchanging a signed assertion for an access credential.
//!
//! The token endpoint takes an HTML form POST carrying the base64
//! (URL-safe alphabet) encoded signed assertion XML and the consumer key, and
//! answers with a URL-encoded `oauth_token`/`oauth_token_secret` pair. This
//! module performs a single exchange per call: transport errors propagate
//! unmodified and retry policy is left to the caller.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::engine::{general_purpose::URL_SAFE as BASE64_URL, Engine};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};

use crate::assertion::Assertion;
use crate::config::ClientConfig;

/// An exchanged access credential for one customer.
///
/// Created only by a successful exchange; reused until `expires_at`, then
/// evicted and recreated from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// OAuth access token.
    pub token: String,
    /// OAuth token secret.
    pub secret: String,
    /// When the credential stops being usable.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential has reached its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Exchanges a signed assertion for a credential.
///
/// The trait seam lets the cache be exercised against a stub exchange in
/// tests; production code uses [`HttpTokenExchanger`].
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Submits the signed assertion and returns the resulting credential.
    async fn exchange(&self, assertion: &Assertion) -> Result<Credential>;
}

/// Token exchange over HTTP against the configured endpoint.
///
/// TLS, timeouts, and proxying come entirely from the supplied
/// `reqwest::Client`; no timeout logic is layered on top.
pub struct HttpTokenExchanger {
    http: reqwest::Client,
    endpoint: String,
    consumer_key: String,
    credential_ttl: Option<chrono::Duration>,
}

impl HttpTokenExchanger {
    /// Creates an exchanger for the configured token endpoint.
    ///
    /// # Arguments
    ///
    /// * `http` - Caller-configured HTTP client.
    /// * `config` - Client configuration (endpoint, consumer key, TTL policy).
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        HttpTokenExchanger {
            http,
            endpoint: config.token_endpoint.clone(),
            consumer_key: config.consumer_key.clone(),
            credential_ttl: config.credential_ttl,
        }
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchanger {
    async fn exchange(&self, assertion: &Assertion) -> Result<Credential> {
        if assertion.signature.is_none() {
            bail!(
                "assertion {} is unsigned; only signed assertions can be exchanged",
                assertion.ref_id
            );
        }

        let encoded = BASE64_URL.encode(assertion.canonical_xml());
        log::debug!(
            "Exchanging assertion {} at {}",
            assertion.ref_id,
            self.endpoint
        );

        let response = self
            .http
            .post(&self.endpoint)
            .form(&[
                ("saml_assertion", encoded.as_str()),
                ("oauth_consumer_key", self.consumer_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let diagnostic = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .map(decode_diagnostic)
                .unwrap_or_default();

            bail!("authentication error: {status} {diagnostic}");
        }

        let body = response.text().await?;
        log::trace!("Token response body: {body}");

        let mut token = None;
        let mut secret = None;
        for (name, value) in form_urlencoded::parse(body.as_bytes()) {
            match name.as_ref() {
                "oauth_token" => token = Some(value.into_owned()),
                "oauth_token_secret" => secret = Some(value.into_owned()),
                _ => {}
            }
        }

        let token = token.ok_or_else(|| anyhow!("token response is missing 'oauth_token'"))?;
        let secret =
            secret.ok_or_else(|| anyhow!("token response is missing 'oauth_token_secret'"))?;

        // credentials live no longer than the assertion window unless a
        // longer TTL was configured explicitly
        let expires_at = match self.credential_ttl {
            Some(ttl) => Utc::now() + ttl,
            None => assertion.conditions.not_on_or_after,
        };

        Ok(Credential {
            token,
            secret,
            expires_at,
        })
    }
}

/// Decodes the percent-encoded diagnostic text carried by a
/// `WWW-Authenticate` header on rejection responses.
fn decode_diagnostic(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    use super::*;
    use crate::signature::sign_assertion;
    use crate::test_support::test_key;

    /// One-shot HTTP stub: answers a single request with the canned response
    /// and records the raw request it saw.
    async fn stub_endpoint(response: &'static str) -> (String, Arc<Mutex<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(String::new()));

        let request_log = Arc::clone(&seen);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request_is_complete(&request) {
                    break;
                }
            }
            *request_log.lock().await = String::from_utf8_lossy(&request).into_owned();
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        (endpoint, seen)
    }

    /// True once `raw` holds the full header block and declared body length.
    fn request_is_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= header_end + 4 + content_length
    }

    fn signed_assertion() -> Assertion {
        let mut assertion =
            Assertion::new("idp.example.com", "customer-1", Duration::minutes(10)).unwrap();
        sign_assertion(&mut assertion, test_key()).unwrap();
        assertion
    }

    fn exchanger(endpoint: String) -> HttpTokenExchanger {
        let config = ClientConfig::new("consumer-key-1", "cs", "idp.example.com", test_key().clone())
            .with_token_endpoint(endpoint);
        HttpTokenExchanger::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn successful_exchange_extracts_token_and_secret() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (endpoint, seen) = stub_endpoint(
            "HTTP/1.1 200 OK\r\ncontent-length: 40\r\n\r\noauth_token=T1&oauth_token_secret=S1&x=y",
        )
        .await;

        let assertion = signed_assertion();
        let credential = exchanger(endpoint).exchange(&assertion).await.unwrap();

        assert_eq!(credential.token, "T1");
        assert_eq!(credential.secret, "S1");
        // no explicit TTL configured: expiry is the assertion window
        assert_eq!(credential.expires_at, assertion.conditions.not_on_or_after);

        let request = seen.lock().await.clone();
        assert!(request.starts_with("POST / HTTP/1.1\r\n"));
        assert!(request.contains("oauth_consumer_key=consumer-key-1"));
        assert!(request.contains("saml_assertion="));
    }

    #[tokio::test]
    async fn rejection_carries_status_and_decoded_diagnostic() {
        let (endpoint, _) = stub_endpoint(
            "HTTP/1.1 401 Unauthorized\r\n\
             WWW-Authenticate: OAuth+oauth_problem%3Dsignature_invalid\r\n\
             content-length: 0\r\n\r\n",
        )
        .await;

        let err = exchanger(endpoint)
            .exchange(&signed_assertion())
            .await
            .unwrap_err();
        let message = err.to_string();

        assert!(message.contains("401"), "{message}");
        assert!(message.contains("OAuth oauth_problem=signature_invalid"), "{message}");
    }

    #[tokio::test]
    async fn missing_token_field_is_an_error() {
        let (endpoint, _) = stub_endpoint(
            "HTTP/1.1 200 OK\r\ncontent-length: 22\r\n\r\noauth_token_secret=S1\n",
        )
        .await;

        let err = exchanger(endpoint)
            .exchange(&signed_assertion())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("oauth_token"), "{err}");
    }

    #[tokio::test]
    async fn unsigned_assertion_is_rejected_before_any_request() {
        let assertion =
            Assertion::new("idp.example.com", "customer-1", Duration::minutes(10)).unwrap();
        // endpoint that is never contacted
        let err = exchanger("http://127.0.0.1:1".to_owned())
            .exchange(&assertion)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsigned"), "{err}");
    }

    #[tokio::test]
    async fn explicit_ttl_overrides_assertion_window() {
        let (endpoint, _) = stub_endpoint(
            "HTTP/1.1 200 OK\r\ncontent-length: 37\r\n\r\noauth_token=T1&oauth_token_secret=S1\n",
        )
        .await;

        let config = ClientConfig::new("ck", "cs", "idp.example.com", test_key().clone())
            .with_token_endpoint(endpoint)
            .with_credential_ttl(Duration::minutes(30));
        let exchanger = HttpTokenExchanger::new(reqwest::Client::new(), &config);

        let assertion = signed_assertion();
        let credential = exchanger.exchange(&assertion).await.unwrap();

        assert!(credential.expires_at > assertion.conditions.not_on_or_after);
    }
}
