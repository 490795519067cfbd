//! Authorization request: ask the counter-party to authorize a transaction
//! and await the signed authorization result.
//!
//! One correlated step with the generic reply policy: any `errorInformation`
//! in the reply forces the workflow to `errored`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_information;
use crate::bus::NotificationBus;
use crate::clients::ThirdpartyRequests;
use crate::errors::EngineError;
use crate::store::DurableStore;
use crate::workflow::{notification_channel, SingleStepSpec, SingleStepWorkflow, SUCCEEDED_STATE};

pub const CHANNEL_PREFIX: &str = "authorizations";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationArgs {
    pub transaction_request_id: String,
    pub to_fsp_id: String,
    /// Authorization request payload, forwarded opaquely.
    pub request: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResponse {
    pub authentication_info: Option<Value>,
    pub response_type: String,
    pub current_state: String,
}

pub struct AuthorizationRequest {
    thirdparty: Arc<dyn ThirdpartyRequests>,
}

impl AuthorizationRequest {
    pub fn new(thirdparty: Arc<dyn ThirdpartyRequests>) -> Self {
        Self { thirdparty }
    }

    pub fn notification_channel(transaction_request_id: &str) -> Result<String, EngineError> {
        notification_channel(CHANNEL_PREFIX, transaction_request_id)
    }

    pub fn workflow(
        thirdparty: Arc<dyn ThirdpartyRequests>,
        bus: Arc<dyn NotificationBus>,
        store: Arc<dyn DurableStore>,
        transaction_request_id: &str,
        timeout: Duration,
    ) -> Result<AuthorizationWorkflow, EngineError> {
        let key = Self::notification_channel(transaction_request_id)?;
        SingleStepWorkflow::create(Self::new(thirdparty), bus, store, key, timeout)
    }
}

pub type AuthorizationWorkflow = SingleStepWorkflow<AuthorizationRequest>;

#[async_trait]
impl SingleStepSpec for AuthorizationRequest {
    type Args = AuthorizationArgs;
    type Response = AuthorizationResponse;

    fn workflow_tag(&self) -> &'static str {
        CHANNEL_PREFIX
    }

    fn validate(&self, args: &Self::Args) -> Result<(), EngineError> {
        if args.transaction_request_id.trim().is_empty() {
            return Err(EngineError::InvalidIdentifier {
                field: "transaction_request_id",
            });
        }
        if args.to_fsp_id.trim().is_empty() {
            return Err(EngineError::InvalidIdentifier { field: "to_fsp_id" });
        }
        if !args.request.is_object() {
            return Err(EngineError::InvalidArguments {
                reason: "authorization request payload must be an object".to_string(),
            });
        }
        Ok(())
    }

    fn channel_id(&self, args: &Self::Args) -> String {
        args.transaction_request_id.clone()
    }

    async fn send_request(&self, args: &Self::Args, _channel: &str) -> anyhow::Result<()> {
        self.thirdparty
            .post_authorizations(args.request.clone(), &args.to_fsp_id)
            .await
    }

    fn reformat(&self, channel: &str, message: Value) -> Result<Self::Response, EngineError> {
        if let Some(info) = error_information(&message) {
            return Err(EngineError::reply_processing(
                channel,
                format!(
                    "counter-party returned error {}: {}",
                    info.error_code, info.error_description
                ),
            ));
        }

        let response_type = message
            .get("responseType")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::reply_processing(channel, "reply has no responseType"))?
            .to_string();

        Ok(AuthorizationResponse {
            authentication_info: message.get("authenticationInfo").cloned(),
            response_type,
            current_state: SUCCEEDED_STATE.to_string(),
        })
    }
}
