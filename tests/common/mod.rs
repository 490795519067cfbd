//! Shared test doubles for the integration suite.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use partyline::bus::InMemoryBus;
use partyline::clients::{BackendRequests, ThirdpartyRequests};
use partyline::store::{DurableStore, StoreError};
use partyline::NotificationBus;

/// Counter-party double scripted with an ordered list of (channel, reply)
/// pairs. Every outbound request pops the next pair and publishes the reply,
/// exercising the subscribe-before-send guarantee (the publish happens while
/// the engine is still inside the send).
pub struct ScriptedClient {
    bus: Arc<InMemoryBus>,
    script: Mutex<VecDeque<(String, Value)>>,
}

impl ScriptedClient {
    pub fn new(bus: Arc<InMemoryBus>) -> Self {
        Self {
            bus,
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_reply(self, channel: impl Into<String>, reply: Value) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back((channel.into(), reply));
        self
    }

    pub fn push_reply(&self, channel: impl Into<String>, reply: Value) {
        self.script
            .lock()
            .unwrap()
            .push_back((channel.into(), reply));
    }

    async fn publish_next(&self) -> anyhow::Result<()> {
        let next = self.script.lock().unwrap().pop_front();
        if let Some((channel, reply)) = next {
            self.bus
                .publish(&channel, reply)
                .await
                .map_err(anyhow::Error::from)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ThirdpartyRequests for ScriptedClient {
    async fn get_accounts(&self, _user_id: &str, _fsp_id: &str) -> anyhow::Result<()> {
        self.publish_next().await
    }
    async fn post_authorizations(&self, _request: Value, _fsp_id: &str) -> anyhow::Result<()> {
        self.publish_next().await
    }
    async fn post_consent_requests(&self, _request: Value, _fsp_id: &str) -> anyhow::Result<()> {
        self.publish_next().await
    }
    async fn patch_consent_requests(
        &self,
        _consent_request_id: &str,
        _request: Value,
        _fsp_id: &str,
    ) -> anyhow::Result<()> {
        self.publish_next().await
    }
    async fn post_consents(&self, _request: Value, _fsp_id: &str) -> anyhow::Result<()> {
        self.publish_next().await
    }
    async fn put_consents(
        &self,
        _consent_id: &str,
        _request: Value,
        _fsp_id: &str,
    ) -> anyhow::Result<()> {
        self.publish_next().await
    }
}

/// Accepts every send but never replies, so correlated steps time out.
pub struct SilentClient;

#[async_trait]
impl ThirdpartyRequests for SilentClient {
    async fn get_accounts(&self, _user_id: &str, _fsp_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn post_authorizations(&self, _request: Value, _fsp_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn post_consent_requests(&self, _request: Value, _fsp_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn patch_consent_requests(
        &self,
        _consent_request_id: &str,
        _request: Value,
        _fsp_id: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn post_consents(&self, _request: Value, _fsp_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn put_consents(
        &self,
        _consent_id: &str,
        _request: Value,
        _fsp_id: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Backend double answering OTP validation with a canned consent.
pub struct ScriptedBackend {
    consent: Value,
}

impl ScriptedBackend {
    pub fn new(consent: Value) -> Self {
        Self { consent }
    }
}

#[async_trait]
impl BackendRequests for ScriptedBackend {
    async fn validate_auth_token(
        &self,
        _consent_request_id: &str,
        _auth_token: &str,
    ) -> anyhow::Result<Value> {
        Ok(self.consent.clone())
    }
}

/// Backend double rejecting every OTP token.
pub struct RejectingBackend;

#[async_trait]
impl BackendRequests for RejectingBackend {
    async fn validate_auth_token(
        &self,
        _consent_request_id: &str,
        _auth_token: &str,
    ) -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("auth token rejected"))
    }
}

/// Store whose writes always fail; reads report nothing stored.
pub struct FailingStore;

#[async_trait]
impl DurableStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            reason: "disk full".to_string(),
        })
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

/// Delegates to an in-memory store while counting writes.
pub struct CountingStore {
    inner: partyline::store::InMemoryStore,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: partyline::store::InMemoryStore::new(),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }
}
