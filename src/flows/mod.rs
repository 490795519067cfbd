//! Concrete workflow instances built on the engine.
//!
//! Single-step flows (account discovery, authorization) are
//! [`SingleStepSpec`](crate::workflow::SingleStepSpec) strategies; the
//! multi-step flows (consent issuance, account linking) implement
//! [`WorkflowDefinition`](crate::workflow::WorkflowDefinition) directly.

use serde_json::Value;

use crate::errors::ErrorInformation;

pub mod accounts;
pub mod authorizations;
pub mod consents;
pub mod linking;

/// Extract a domain error payload from a correlated reply, if present.
pub(crate) fn error_information(message: &Value) -> Option<ErrorInformation> {
    message
        .get("errorInformation")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}
