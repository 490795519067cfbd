//! Consent issuance: open a consent request with a counter-party, then ask
//! for the consent to be granted. Two sequential correlated steps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error_information;
use crate::bus::NotificationBus;
use crate::clients::ThirdpartyRequests;
use crate::errors::{EngineError, ErrorSnapshot};
use crate::machine::{MachineSpec, Transition};
use crate::store::DurableStore;
use crate::workflow::{notification_channel, CorrelationJob, PersistentWorkflow, WorkflowData, WorkflowDefinition};

pub const STORE_KEY_PREFIX: &str = "consents";
pub const CONSENT_REQUESTS_CHANNEL_PREFIX: &str = "consent_requests";
pub const CONSENTS_CHANNEL_PREFIX: &str = "consents_grant";

pub const START_STATE: &str = "start";
pub const CONSENT_REQUESTED_STATE: &str = "consent_requested";
pub const SUCCEEDED_STATE: &str = "succeeded";

pub const REQUEST_CONSENT: &str = "request_consent";
pub const GRANT_CONSENT: &str = "grant_consent";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentIssuanceData {
    pub current_state: Option<String>,
    pub consent_request_id: String,
    pub to_fsp_id: String,
    /// Consent request payload (scopes, callback URI), forwarded opaquely.
    pub request: Value,
    pub channel_response: Option<Value>,
    pub consent: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorSnapshot>,
}

impl ConsentIssuanceData {
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
            consent: None,
            error: None,
        })
    }
}

impl WorkflowData for ConsentIssuanceData {
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
pub struct ConsentIssuanceResponse {
    pub channel_response: Option<Value>,
    pub consent: Option<Value>,
    pub current_state: String,
}

/// Workflow definition for consent issuance.
pub struct ConsentIssuance {
    thirdparty: Arc<dyn ThirdpartyRequests>,
    bus: Arc<dyn NotificationBus>,
    machine_spec: Arc<MachineSpec>,
    timeout: Duration,
}

impl ConsentIssuance {
    pub fn new(
        thirdparty: Arc<dyn ThirdpartyRequests>,
        bus: Arc<dyn NotificationBus>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let machine_spec = MachineSpec::new(
            START_STATE,
            vec![
                Transition {
                    name: REQUEST_CONSENT,
                    from: &[START_STATE],
                    to: CONSENT_REQUESTED_STATE,
                },
                Transition {
                    name: GRANT_CONSENT,
                    from: &[CONSENT_REQUESTED_STATE],
                    to: SUCCEEDED_STATE,
                },
            ],
            vec![SUCCEEDED_STATE],
        )?;

        Ok(Self {
            thirdparty,
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
        data: ConsentIssuanceData,
        store: Arc<dyn DurableStore>,
    ) -> Result<ConsentIssuanceWorkflow, EngineError> {
        let key = Self::store_key(&data.consent_request_id)?;
        PersistentWorkflow::create(self, data, store, key)
    }

    async fn request_consent(&self, data: &mut ConsentIssuanceData) -> Result<(), EngineError> {
        let channel =
            notification_channel(CONSENT_REQUESTS_CHANNEL_PREFIX, &data.consent_request_id)?;
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

        data.channel_response = Some(channel_response);
        Ok(())
    }

    async fn grant_consent(&self, data: &mut ConsentIssuanceData) -> Result<(), EngineError> {
        let channel = notification_channel(CONSENTS_CHANNEL_PREFIX, &data.consent_request_id)?;
        let job = CorrelationJob::new(self.bus.as_ref(), channel.clone(), self.timeout);

        let request = json!({
            "consentRequestId": data.consent_request_id,
            "scopes": data.request.get("scopes").cloned().unwrap_or(Value::Null),
        });
        let to_fsp_id = data.to_fsp_id.clone();
        let consent = job
            .execute(
                |_channel| async move { self.thirdparty.post_consents(request, &to_fsp_id).await },
                |message| {
                    let result = match error_information(&message) {
                        Some(info) => Err(EngineError::reply_processing(
                            &channel,
                            format!(
                                "consent grant rejected with {}: {}",
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
}

pub type ConsentIssuanceWorkflow = PersistentWorkflow<ConsentIssuance>;

#[async_trait]
impl WorkflowDefinition for ConsentIssuance {
    type Data = ConsentIssuanceData;
    type Response = ConsentIssuanceResponse;

    fn machine_spec(&self) -> Arc<MachineSpec> {
        self.machine_spec.clone()
    }

    fn next_transition(&self, state: &str, _data: &Self::Data) -> Option<&'static str> {
        match state {
            START_STATE => Some(REQUEST_CONSENT),
            CONSENT_REQUESTED_STATE => Some(GRANT_CONSENT),
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
            GRANT_CONSENT => self.grant_consent(data).await,
            other => Err(EngineError::InvalidTransition {
                transition: other.to_string(),
                state: data.current_state().unwrap_or(START_STATE).to_string(),
            }),
        }
    }

    fn response(&self, data: &Self::Data) -> Option<Self::Response> {
        Some(ConsentIssuanceResponse {
            channel_response: data.channel_response.clone(),
            consent: data.consent.clone(),
            current_state: data
                .current_state
                .clone()
                .unwrap_or_else(|| START_STATE.to_string()),
        })
    }
}
