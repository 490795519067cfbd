//! Account linking: the longest flow in the crate. Open a consent request,
//! authenticate the user over the channel the counter-party offered (web
//! redirect or OTP), then register the signed credential on the granted
//! consent.
//!
//! The flow is deliberately resumable: after `request_consent` it parks in
//! `channel_response_received` until the caller seeds the auth token, and
//! again in `consent_received` until the credential arrives. Each `run` call
//! advances only as far as the available input allows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error_information;
use crate::bus::NotificationBus;
use crate::clients::{BackendRequests, ThirdpartyRequests};
use crate::errors::{EngineError, ErrorSnapshot};
use crate::machine::{MachineSpec, Transition};
use crate::store::DurableStore;
use crate::workflow::{notification_channel, CorrelationJob, PersistentWorkflow, WorkflowData, WorkflowDefinition};

pub const STORE_KEY_PREFIX: &str = "linking";
pub const REQUEST_CONSENT_CHANNEL_PREFIX: &str = "linking_request_consent";
pub const CONSENT_AUTH_CHANNEL_PREFIX: &str = "linking_consent_auth";
pub const REGISTER_CREDENTIAL_CHANNEL_PREFIX: &str = "linking_register_credential";

pub const START_STATE: &str = "start";
pub const CHANNEL_RESPONSE_RECEIVED_STATE: &str = "channel_response_received";
pub const CONSENT_RECEIVED_STATE: &str = "consent_received";
pub const ACCOUNTS_LINKED_STATE: &str = "accounts_linked";

pub const REQUEST_CONSENT: &str = "request_consent";
pub const AUTHENTICATE_WITH_WEB: &str = "authenticate_with_web";
pub const AUTHENTICATE_WITH_OTP: &str = "authenticate_with_otp";
pub const REGISTER_CREDENTIAL: &str = "register_credential";

/// How the counter-party wants the user authenticated, taken from the first
/// entry of the consent-request reply's `authChannels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthChannel {
    #[serde(rename = "WEB")]
    Web,
    #[serde(rename = "OTP")]
    Otp,
}

impl AuthChannel {
    fn from_channel_response(message: &Value) -> Option<Self> {
        let first = message.get("authChannels")?.as_array()?.first()?;
        serde_json::from_value(first.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLinkingData {
    pub current_state: Option<String>,
    pub consent_request_id: String,
    pub to_fsp_id: String,
    /// Consent request payload (userId, scopes, callback URI), forwarded
    /// opaquely on the first step.
    pub request: Value,
    pub channel_response: Option<Value>,
    pub auth_channel: Option<AuthChannel>,
    /// Seeded by the caller once the user has authenticated.
    pub auth_token: Option<String>,
    pub consent: Option<Value>,
    /// Seeded by the caller once the credential has been signed.
    pub credential: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorSnapshot>,
}

impl AccountLinkingData {
    pub fn new(
        consent_request_id: impl Into<String>,
        to_fsp_id: impl Into<String>,
        request: Value,
    ) -> Result<Self, EngineError> {
        let consent_request_id = consent_request_id.into();
        let to_fsp_id = to_fsp_id.into();
        if consent_request_id.trim().is_empty() {
            return Err(EngineError::InvalidIdentifier {
                field: "consent_request_id",
            });
        }
        if to_fsp_id.trim().is_empty() {
            return Err(EngineError::InvalidIdentifier { field: "to_fsp_id" });
        }

        Ok(Self {
            current_state: None,
            consent_request_id,
            to_fsp_id,
            request,
            channel_response: None,
            auth_channel: None,
            auth_token: None,
            consent: None,
            credential: None,
            error: None,
        })
    }

    fn consent_id(&self) -> Option<&str> {
        self.consent.as_ref()?.get("consentId")?.as_str()
    }
}

impl WorkflowData for AccountLinkingData {
    fn current_state(&self) -> Option<&str> {
        self.current_state.as_deref()
    }

    fn set_current_state(&mut self, state: &str) {
        self.current_state = Some(state.to_string());
    }

    fn record_error(&mut self, error: &EngineError) {
        self.error = Some(ErrorSnapshot::from_error(error));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLinkingResponse {
    pub channel_response: Option<Value>,
    pub consent: Option<Value>,
    pub current_state: String,
}

pub struct AccountLinking {
    thirdparty: Arc<dyn ThirdpartyRequests>,
    backend: Arc<dyn BackendRequests>,
    bus: Arc<dyn NotificationBus>,
    machine_spec: Arc<MachineSpec>,
    timeout: Duration,
}

impl AccountLinking {
    pub fn new(
        thirdparty: Arc<dyn ThirdpartyRequests>,
        backend: Arc<dyn BackendRequests>,
        bus: Arc<dyn NotificationBus>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let machine_spec = MachineSpec::new(
            START_STATE,
            vec![
                Transition {
                    name: REQUEST_CONSENT,
                    from: &[START_STATE],
                    to: CHANNEL_RESPONSE_RECEIVED_STATE,
                },
                Transition {
                    name: AUTHENTICATE_WITH_WEB,
                    from: &[CHANNEL_RESPONSE_RECEIVED_STATE],
                    to: CONSENT_RECEIVED_STATE,
                },
                Transition {
                    name: AUTHENTICATE_WITH_OTP,
                    from: &[CHANNEL_RESPONSE_RECEIVED_STATE],
                    to: CONSENT_RECEIVED_STATE,
                },
                Transition {
                    name: REGISTER_CREDENTIAL,
                    from: &[CONSENT_RECEIVED_STATE],
                    to: ACCOUNTS_LINKED_STATE,
                },
            ],
            vec![ACCOUNTS_LINKED_STATE],
        )?;

        Ok(Self {
            thirdparty,
            backend,
            bus,
            machine_spec,
            timeout,
        })
    }

    pub fn store_key(consent_request_id: &str) -> Result<String, EngineError> {
        notification_channel(STORE_KEY_PREFIX, consent_request_id)
    }

    pub fn workflow(
        self,
        data: AccountLinkingData,
        store: Arc<dyn DurableStore>,
    ) -> Result<AccountLinkingWorkflow, EngineError> {
        let key = Self::store_key(&data.consent_request_id)?;
        PersistentWorkflow::create(self, data, store, key)
    }

    async fn request_consent(&self, data: &mut AccountLinkingData) -> Result<(), EngineError> {
        let channel =
            notification_channel(REQUEST_CONSENT_CHANNEL_PREFIX, &data.consent_request_id)?;
        let job = CorrelationJob::new(self.bus.as_ref(), channel.clone(), self.timeout);

        let request = data.request.clone();
        let to_fsp_id = data.to_fsp_id.clone();
        let channel_response = job
            .execute(
                |_channel| async move {
                    self.thirdparty.post_consent_requests(request, &to_fsp_id).await
                },
                |message| {
                    let result = match error_information(&message) {
                        Some(info) => Err(EngineError::reply_processing(
                            &channel,
                            format!(
                                "consent request rejected with {}: {}",
                                info.error_code, info.error_description
                            ),
                        )),
                        None => Ok(message),
                    };
                    std::future::ready(result)
                },
            )
            .await?;

        data.auth_channel = AuthChannel::from_channel_response(&channel_response);
        if data.auth_channel.is_none() {
            return Err(EngineError::reply_processing(
                channel,
                "reply names no usable authChannels entry",
            ));
        }
        data.channel_response = Some(channel_response);
        Ok(())
    }

    /// Web channel: the auth token travels back to the counter-party as a
    /// consent-request PATCH, and the granted consent arrives correlated.
    async fn authenticate_with_web(&self, data: &mut AccountLinkingData) -> Result<(), EngineError> {
        let auth_token = data.auth_token.clone().ok_or(EngineError::InvalidIdentifier {
            field: "auth_token",
        })?;
        let channel =
            notification_channel(CONSENT_AUTH_CHANNEL_PREFIX, &data.consent_request_id)?;
        let job = CorrelationJob::new(self.bus.as_ref(), channel.clone(), self.timeout);

        let consent_request_id = data.consent_request_id.clone();
        let to_fsp_id = data.to_fsp_id.clone();
        let consent = job
            .execute(
                |_channel| async move {
                    self.thirdparty
                        .patch_consent_requests(
                            &consent_request_id,
                            json!({ "authToken": auth_token }),
                            &to_fsp_id,
                        )
                        .await
                },
                |message| {
                    let result = match error_information(&message) {
                        Some(info) => Err(EngineError::reply_processing(
                            &channel,
                            format!(
                                "authentication rejected with {}: {}",
                                info.error_code, info.error_description
                            ),
                        )),
                        None => Ok(message),
                    };
                    std::future::ready(result)
                },
            )
            .await?;

        data.consent = Some(consent);
        Ok(())
    }

    /// OTP channel: the token is validated against the local backend, which
    /// answers synchronously with the granted consent. No correlation.
    async fn authenticate_with_otp(&self, data: &mut AccountLinkingData) -> Result<(), EngineError> {
        let auth_token = data.auth_token.clone().ok_or(EngineError::InvalidIdentifier {
            field: "auth_token",
        })?;
        let channel =
            notification_channel(CONSENT_AUTH_CHANNEL_PREFIX, &data.consent_request_id)?;

        let consent = self
            .backend
            .validate_auth_token(&data.consent_request_id, &auth_token)
            .await
            .map_err(|source| EngineError::Send { channel, source })?;

        data.consent = Some(consent);
        Ok(())
    }

    async fn register_credential(&self, data: &mut AccountLinkingData) -> Result<(), EngineError> {
        let credential = data.credential.clone().ok_or(EngineError::InvalidIdentifier {
            field: "credential",
        })?;
        let channel =
            notification_channel(REGISTER_CREDENTIAL_CHANNEL_PREFIX, &data.consent_request_id)?;
        let consent_id = data
            .consent_id()
            .ok_or_else(|| {
                EngineError::reply_processing(&channel, "granted consent carries no consentId")
            })?
            .to_string();
        let job = CorrelationJob::new(self.bus.as_ref(), channel.clone(), self.timeout);

        let to_fsp_id = data.to_fsp_id.clone();
        let consent = job
            .execute(
                |_channel| async move {
                    self.thirdparty
                        .put_consents(&consent_id, json!({ "credential": credential }), &to_fsp_id)
                        .await
                },
                |message| {
                    let result = match error_information(&message) {
                        Some(info) => Err(EngineError::reply_processing(
                            &channel,
                            format!(
                                "credential registration rejected with {}: {}",
                                info.error_code, info.error_description
                            ),
                        )),
                        None => Ok(message),
                    };
                    std::future::ready(result)
                },
            )
            .await?;

        // The verified consent replaces the granted one.
        data.consent = Some(consent);
        Ok(())
    }
}

pub type AccountLinkingWorkflow = PersistentWorkflow<AccountLinking>;

#[async_trait]
impl WorkflowDefinition for AccountLinking {
    type Data = AccountLinkingData;
    type Response = AccountLinkingResponse;

    fn machine_spec(&self) -> Arc<MachineSpec> {
        self.machine_spec.clone()
    }

    fn next_transition(&self, state: &str, data: &Self::Data) -> Option<&'static str> {
        match state {
            START_STATE => Some(REQUEST_CONSENT),
            CHANNEL_RESPONSE_RECEIVED_STATE => {
                // Parked until the caller seeds the user's auth token.
                data.auth_token.as_ref()?;
                match data.auth_channel? {
                    AuthChannel::Web => Some(AUTHENTICATE_WITH_WEB),
                    AuthChannel::Otp => Some(AUTHENTICATE_WITH_OTP),
                }
            }
            CONSENT_RECEIVED_STATE => {
                data.credential.as_ref()?;
                Some(REGISTER_CREDENTIAL)
            }
            _ => None,
        }
    }

    async fn on_transition(
        &self,
        transition: &str,
        data: &mut Self::Data,
    ) -> Result<(), EngineError> {
        match transition {
            REQUEST_CONSENT => self.request_consent(data).await,
            AUTHENTICATE_WITH_WEB => self.authenticate_with_web(data).await,
            AUTHENTICATE_WITH_OTP => self.authenticate_with_otp(data).await,
            REGISTER_CREDENTIAL => self.register_credential(data).await,
            other => Err(EngineError::InvalidTransition {
                transition: other.to_string(),
                state: data.current_state().unwrap_or(START_STATE).to_string(),
            }),
        }
    }

    fn response(&self, data: &Self::Data) -> Option<Self::Response> {
        Some(AccountLinkingResponse {
            channel_response: data.channel_response.clone(),
            consent: data.consent.clone(),
            current_state: data
                .current_state
                .clone()
                .unwrap_or_else(|| START_STATE.to_string()),
        })
    }
}
