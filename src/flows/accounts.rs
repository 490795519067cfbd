//! Account discovery: ask a counter-party which accounts a user holds.
//!
//! One correlated step. This workflow has a deliberate reply-policy quirk:
//! an "ID not found" error from the counter-party is a *successful* lookup
//! with an empty result set, not a failure — a user with no linkable
//! accounts is an ordinary answer. Every other error payload still forces
//! the workflow to `errored`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_information;
use crate::bus::NotificationBus;
use crate::clients::ThirdpartyRequests;
use crate::errors::{EngineError, ErrorInformation};
use crate::store::DurableStore;
use crate::workflow::{notification_channel, SingleStepSpec, SingleStepWorkflow, SUCCEEDED_STATE};

pub const CHANNEL_PREFIX: &str = "accounts";

/// Counter-party error codes that mean "no such ID" rather than a fault.
const ID_NOT_FOUND_CODES: [&str; 2] = ["3200", "3201"];

/// Response state reported when the lookup completed via the ID-not-found
/// policy instead of a normal accounts reply.
pub const ID_NOT_FOUND_COMPLETED_STATE: &str = "COMPLETED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_nickname: String,
    pub id: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsDiscoveryArgs {
    pub user_id: String,
    pub fsp_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsDiscoveryResponse {
    pub accounts: Vec<Account>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_information: Option<ErrorInformation>,
    pub current_state: String,
}

/// Single-step strategy for account discovery.
pub struct AccountsDiscovery {
    thirdparty: Arc<dyn ThirdpartyRequests>,
}

impl AccountsDiscovery {
    pub fn new(thirdparty: Arc<dyn ThirdpartyRequests>) -> Self {
        Self { thirdparty }
    }

    /// Channel (and store key) for one user's discovery workflow.
    pub fn notification_channel(user_id: &str) -> Result<String, EngineError> {
        notification_channel(CHANNEL_PREFIX, user_id)
    }

    /// Convenience constructor: key and channel both derive from the user id.
    pub fn workflow(
        thirdparty: Arc<dyn ThirdpartyRequests>,
        bus: Arc<dyn NotificationBus>,
        store: Arc<dyn DurableStore>,
        user_id: &str,
        timeout: Duration,
    ) -> Result<AccountsDiscoveryWorkflow, EngineError> {
        let key = Self::notification_channel(user_id)?;
        SingleStepWorkflow::create(Self::new(thirdparty), bus, store, key, timeout)
    }
}

pub type AccountsDiscoveryWorkflow = SingleStepWorkflow<AccountsDiscovery>;

#[async_trait]
impl SingleStepSpec for AccountsDiscovery {
    type Args = AccountsDiscoveryArgs;
    type Response = AccountsDiscoveryResponse;

    fn workflow_tag(&self) -> &'static str {
        CHANNEL_PREFIX
    }

    fn validate(&self, args: &Self::Args) -> Result<(), EngineError> {
        if args.user_id.trim().is_empty() {
            return Err(EngineError::InvalidIdentifier { field: "user_id" });
        }
        if args.fsp_id.trim().is_empty() {
            return Err(EngineError::InvalidIdentifier { field: "fsp_id" });
        }
        Ok(())
    }

    fn channel_id(&self, args: &Self::Args) -> String {
        args.user_id.clone()
    }

    async fn send_request(&self, args: &Self::Args, _channel: &str) -> anyhow::Result<()> {
        self.thirdparty.get_accounts(&args.user_id, &args.fsp_id).await
    }

    fn reformat(&self, channel: &str, message: Value) -> Result<Self::Response, EngineError> {
        if let Some(info) = error_information(&message) {
            if ID_NOT_FOUND_CODES.contains(&info.error_code.as_str()) {
                return Ok(AccountsDiscoveryResponse {
                    accounts: vec![],
                    error_information: Some(info),
                    current_state: ID_NOT_FOUND_COMPLETED_STATE.to_string(),
                });
            }
            return Err(EngineError::reply_processing(
                channel,
                format!(
                    "counter-party returned error {}: {}",
                    info.error_code, info.error_description
                ),
            ));
        }

        let accounts = message.get("accounts").cloned().ok_or_else(|| {
            EngineError::reply_processing(channel, "reply carries neither accounts nor errorInformation")
        })?;
        let accounts: Vec<Account> = serde_json::from_value(accounts)
            .map_err(|err| EngineError::reply_processing(channel, format!("malformed accounts list: {err}")))?;

        Ok(AccountsDiscoveryResponse {
            accounts,
            error_information: None,
            current_state: SUCCEEDED_STATE.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopClient;

    #[async_trait]
    impl ThirdpartyRequests for NoopClient {
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

    fn discovery() -> AccountsDiscovery {
        AccountsDiscovery::new(Arc::new(NoopClient))
    }

    #[test]
    fn accounts_reply_reformats_to_succeeded() {
        let response = discovery()
            .reformat(
                "accounts_user1234",
                json!({
                    "accounts": [
                        {"accountNickname": "spending", "id": "dfspa.user.nickname", "currency": "ZAR"}
                    ]
                }),
            )
            .unwrap();

        assert_eq!(response.accounts.len(), 1);
        assert_eq!(response.accounts[0].currency, "ZAR");
        assert_eq!(response.current_state, SUCCEEDED_STATE);
        assert!(response.error_information.is_none());
    }

    #[test]
    fn id_not_found_is_a_completed_empty_result() {
        let response = discovery()
            .reformat(
                "accounts_user1234",
                json!({
                    "errorInformation": {
                        "errorCode": "3200",
                        "errorDescription": "Generic ID not found"
                    }
                }),
            )
            .unwrap();

        assert!(response.accounts.is_empty());
        assert_eq!(response.current_state, ID_NOT_FOUND_COMPLETED_STATE);
        assert_eq!(
            response.error_information.unwrap().error_code,
            "3200".to_string()
        );
    }

    #[test]
    fn any_other_error_payload_is_a_reply_processing_failure() {
        let err = discovery()
            .reformat(
                "accounts_user1234",
                json!({
                    "errorInformation": {
                        "errorCode": "2000",
                        "errorDescription": "Generic server error"
                    }
                }),
            )
            .unwrap_err();

        assert!(matches!(err, EngineError::ReplyProcessing { .. }));
    }

    #[test]
    fn reply_without_accounts_or_error_is_rejected() {
        let err = discovery()
            .reformat("accounts_user1234", json!({"parties": []}))
            .unwrap_err();
        assert!(matches!(err, EngineError::ReplyProcessing { .. }));
    }

    #[test]
    fn validate_requires_both_identifiers() {
        let spec = discovery();
        assert!(spec
            .validate(&AccountsDiscoveryArgs {
                user_id: "".to_string(),
                fsp_id: "dfspA".to_string(),
            })
            .is_err());
        assert!(spec
            .validate(&AccountsDiscoveryArgs {
                user_id: "user1234".to_string(),
                fsp_id: " ".to_string(),
            })
            .is_err());
        assert!(spec
            .validate(&AccountsDiscoveryArgs {
                user_id: "user1234".to_string(),
                fsp_id: "dfspA".to_string(),
            })
            .is_ok());
    }
}
