//! Outbound request collaborators injected into workflows.
//!
//! The engine treats every call as a single-attempt async operation and
//! fails with whatever the client raises; retry/backoff, signing and wire
//! schemas are the client implementation's business.

use async_trait::async_trait;
use serde_json::Value;

/// Requests towards the counter-party (DFSP) side of a flow. Each call fires
/// a request whose reply arrives asynchronously on a correlation channel.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ThirdpartyRequests: Send + Sync {
    /// Ask a counter-party for the accounts available to a user.
    async fn get_accounts(&self, user_id: &str, fsp_id: &str) -> anyhow::Result<()>;

    /// Fire an authorization request for a transaction.
    async fn post_authorizations(&self, request: Value, fsp_id: &str) -> anyhow::Result<()>;

    /// Open a consent request with the counter-party.
    async fn post_consent_requests(&self, request: Value, fsp_id: &str) -> anyhow::Result<()>;

    /// Answer a pending consent request (e.g. deliver the web auth token).
    async fn patch_consent_requests(
        &self,
        consent_request_id: &str,
        request: Value,
        fsp_id: &str,
    ) -> anyhow::Result<()>;

    /// Ask the counter-party to grant a consent.
    async fn post_consents(&self, request: Value, fsp_id: &str) -> anyhow::Result<()>;

    /// Register the signed credential on a granted consent.
    async fn put_consents(
        &self,
        consent_id: &str,
        request: Value,
        fsp_id: &str,
    ) -> anyhow::Result<()>;
}

/// Requests towards the locally attached backend. These complete
/// synchronously — no correlation channel involved.
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait BackendRequests: Send + Sync {
    /// Validate an OTP auth token for a consent request; returns the consent
    /// payload on success.
    async fn validate_auth_token(
        &self,
        consent_request_id: &str,
        auth_token: &str,
    ) -> anyhow::Result<Value>;
}
