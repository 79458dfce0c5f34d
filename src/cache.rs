//! Per-customer credential caching with TTL eviction.
//!
//! Building, signing, and exchanging an assertion on every API call would be
//! wasteful; the cache memoizes exchanged credentials per customer and evicts
//! them once their TTL elapses. One async mutex guards the whole map, and the
//! lock is held across the exchange itself, so concurrent misses for the same
//! customer collapse into a single exchange.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::assertion::Assertion;
use crate::config::ClientConfig;
use crate::exchange::{Credential, HttpTokenExchanger, TokenExchange};
use crate::signature::sign_assertion;

/// Caches exchanged credentials keyed by customer id.
///
/// Construct one cache per configuration and share it; REST callers obtain a
/// credential through [`CredentialCache::get_or_create`] before issuing any
/// authenticated request. [`CredentialCache::close`] cancels pending eviction
/// tasks at shutdown.
#[derive(Clone)]
pub struct CredentialCache {
    config: ClientConfig,
    exchanger: Arc<dyn TokenExchange>,
    state: Arc<Mutex<CacheState>>,
}

#[derive(Default)]
struct CacheState {
    credentials: HashMap<String, Credential>,
    evictions: HashMap<String, JoinHandle<()>>,
    closed: bool,
}

impl CredentialCache {
    /// Creates a cache backed by the given exchanger.
    pub fn new(config: ClientConfig, exchanger: Arc<dyn TokenExchange>) -> Self {
        CredentialCache {
            config,
            exchanger,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Creates a cache that exchanges over HTTP with the supplied client.
    pub fn with_http(http: reqwest::Client, config: ClientConfig) -> Self {
        let exchanger = Arc::new(HttpTokenExchanger::new(http, &config));
        Self::new(config, exchanger)
    }

    /// Returns the cached credential for `customer_id`, or builds, signs, and
    /// exchanges a fresh assertion to create one.
    ///
    /// The credential is stored only after the whole build/sign/exchange
    /// sequence succeeds, and an eviction task is scheduled for its TTL. The
    /// map is never read or written outside the lock.
    pub async fn get_or_create(&self, customer_id: &str) -> Result<Credential> {
        if customer_id.is_empty() {
            bail!("customer id must not be empty");
        }

        let mut state = self.state.lock().await;
        if state.closed {
            bail!("credential cache is closed");
        }

        if let Some(credential) = state.credentials.get(customer_id) {
            if !credential.is_expired() {
                log::trace!("Credential cache hit for customer '{customer_id}'");
                return Ok(credential.clone());
            }
            log::debug!("Cached credential for customer '{customer_id}' has expired");
        }

        let mut assertion = Assertion::new(
            &self.config.saml_provider_id,
            customer_id,
            self.config.assertion_lifetime,
        )?;
        sign_assertion(&mut assertion, &self.config.private_key)?;

        let credential = self.exchanger.exchange(&assertion).await?;
        log::debug!(
            "Caching credential for customer '{customer_id}' until {}",
            credential.expires_at
        );

        state
            .credentials
            .insert(customer_id.to_owned(), credential.clone());

        let handle = self.spawn_eviction(customer_id.to_owned(), &credential);
        if let Some(stale) = state.evictions.insert(customer_id.to_owned(), handle) {
            stale.abort();
        }

        Ok(credential)
    }

    /// Drops the cached credential for `customer_id`, if any, so the next
    /// [`CredentialCache::get_or_create`] call recreates it from scratch.
    pub async fn invalidate(&self, customer_id: &str) {
        let mut state = self.state.lock().await;
        state.credentials.remove(customer_id);
        if let Some(handle) = state.evictions.remove(customer_id) {
            handle.abort();
        }
    }

    /// Closes the cache: cancels every pending eviction task and drops all
    /// cached credentials. Subsequent `get_or_create` calls fail.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.credentials.clear();
        for (_, handle) in state.evictions.drain() {
            handle.abort();
        }
    }

    fn spawn_eviction(&self, customer_id: String, credential: &Credential) -> JoinHandle<()> {
        let ttl = (credential.expires_at - chrono::Utc::now())
            .to_std()
            .unwrap_or_default();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;

            let mut state = state.lock().await;
            log::debug!("Evicting credential for customer '{customer_id}'");
            state.credentials.remove(&customer_id);
            state.evictions.remove(&customer_id);
        })
    }
}
