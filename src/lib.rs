// Partyline - persistent, resumable workflow correlation engine
// Finite-state workflows over a pub/sub notification bus, checkpointed
// into a durable store so a process restart resumes mid-flow.

pub mod bus;
pub mod clients;
pub mod config;
pub mod errors;
pub mod flows;
pub mod machine;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use bus::{BusError, InMemoryBus, NotificationBus, Subscription, SubscriptionId};
pub use clients::{BackendRequests, ThirdpartyRequests};
pub use config::{config, init_config, PartylineConfig};
pub use errors::{EngineError, ErrorInformation, ErrorSnapshot};
pub use machine::{MachineSpec, StateMachine, Transition, ERRORED, ERROR_TRANSITION};
pub use store::{DurableStore, FileStore, InMemoryStore, StoreError};
pub use telemetry::{
    create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry,
};
pub use workflow::{
    notification_channel, CorrelationJob, PersistentWorkflow, SingleStepSpec, SingleStepWorkflow,
    WorkflowData, WorkflowDefinition,
};

pub use flows::accounts::{AccountsDiscovery, AccountsDiscoveryWorkflow};
pub use flows::authorizations::{AuthorizationRequest, AuthorizationWorkflow};
pub use flows::consents::{ConsentIssuance, ConsentIssuanceWorkflow};
pub use flows::linking::{AccountLinking, AccountLinkingWorkflow, AuthChannel};
