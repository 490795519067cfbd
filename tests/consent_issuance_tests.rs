//! Consent issuance driven end to end: two sequential correlated steps with
//! a checkpoint around each.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::ScriptedClient;
use partyline::bus::InMemoryBus;
use partyline::flows::consents::{ConsentIssuance, ConsentIssuanceData, SUCCEEDED_STATE};
use partyline::store::InMemoryStore;
use partyline::{DurableStore, EngineError};

const TIMEOUT: Duration = Duration::from_millis(100);

fn data() -> ConsentIssuanceData {
    ConsentIssuanceData::new(
        "cr-42",
        "dfspA",
        json!({"scopes": [{"accountId": "dfspa.user.spending"}]}),
    )
    .unwrap()
}

#[tokio::test]
async fn issues_a_consent_in_one_run() {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let client = Arc::new(
        ScriptedClient::new(bus.clone())
            .with_reply(
                "consent_requests_cr-42",
                json!({"consentRequestId": "cr-42", "authChannels": ["WEB"]}),
            )
            .with_reply(
                "consents_grant_cr-42",
                json!({"consentId": "consent-1", "scopes": []}),
            ),
    );

    let definition = ConsentIssuance::new(client, bus, TIMEOUT).unwrap();
    let mut workflow = definition.workflow(data(), store.clone()).unwrap();
    assert_eq!(workflow.key(), "consents_cr-42");

    // Both steps resolve without caller input, so one run reaches terminal.
    let response = workflow.run().await.unwrap().unwrap();
    assert_eq!(response.current_state, SUCCEEDED_STATE);
    assert_eq!(response.channel_response.unwrap()["consentRequestId"], "cr-42");
    assert_eq!(response.consent.unwrap()["consentId"], "consent-1");

    let persisted = store.get("consents_cr-42").await.unwrap().unwrap();
    assert_eq!(persisted["currentState"], SUCCEEDED_STATE);
}

#[tokio::test]
async fn a_rejected_grant_keeps_the_first_step_in_the_checkpoint() {
    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let client = Arc::new(
        ScriptedClient::new(bus.clone())
            .with_reply(
                "consent_requests_cr-42",
                json!({"consentRequestId": "cr-42", "authChannels": ["WEB"]}),
            )
            .with_reply(
                "consents_grant_cr-42",
                json!({"errorInformation": {
                    "errorCode": "2001",
                    "errorDescription": "Internal server error"
                }}),
            ),
    );

    let definition = ConsentIssuance::new(client, bus, TIMEOUT).unwrap();
    let mut workflow = definition.workflow(data(), store.clone()).unwrap();

    let err = workflow.run().await.unwrap_err();
    assert!(matches!(err.origin(), EngineError::ReplyProcessing { .. }));
    assert_eq!(workflow.current_state(), "errored");

    // The errored checkpoint still carries the first step's progress.
    let persisted = store.get("consents_cr-42").await.unwrap().unwrap();
    assert_eq!(persisted["currentState"], "errored");
    assert_eq!(persisted["channelResponse"]["consentRequestId"], "cr-42");
    assert_eq!(persisted["error"]["kind"], "ReplyProcessingError");
}

#[tokio::test]
async fn blank_identifiers_are_rejected_before_any_work() {
    let err = ConsentIssuanceData::new("", "dfspA", json!({})).unwrap_err();
    assert!(matches!(err, EngineError::InvalidIdentifier { .. }));
    let err = ConsentIssuanceData::new("cr-42", "   ", json!({})).unwrap_err();
    assert!(matches!(err, EngineError::InvalidIdentifier { .. }));
}
