//! Generic one-shot correlated workflow: `start → succeeded | errored`.
//!
//! Most one-shot flows (account discovery, authorization requests) are
//! instances of this shape, differing only in how they validate input, name
//! their channel, send the outbound request, and reshape the reply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::NotificationBus;
use crate::errors::{EngineError, ErrorSnapshot};
use crate::machine::{MachineSpec, Transition};
use crate::store::DurableStore;
use crate::workflow::correlation::CorrelationJob;
use crate::workflow::{PersistentWorkflow, WorkflowData, WorkflowDefinition};

pub const START_STATE: &str = "start";
pub const SUCCEEDED_STATE: &str = "succeeded";
pub const REQUEST_TRANSITION: &str = "request";

/// Derive the correlation channel (and store key) for a workflow type from
/// its prefix and a domain identifier. Distinct prefixes are what keep
/// channel names of different workflow types from colliding.
pub fn notification_channel(prefix: &'static str, id: &str) -> Result<String, EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::InvalidIdentifier { field: "id" });
    }
    Ok(format!("{prefix}_{id}"))
}

/// The four strategies that specialize the generic single-step shape.
#[async_trait]
pub trait SingleStepSpec: Send + Sync {
    type Args: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug;
    type Response: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug;

    /// Channel-name prefix, unique per workflow type.
    fn workflow_tag(&self) -> &'static str;

    /// Fail fast on bad input, before any machine or store interaction.
    fn validate(&self, args: &Self::Args) -> Result<(), EngineError>;

    /// The domain identifier the correlation channel is derived from.
    fn channel_id(&self, args: &Self::Args) -> String;

    /// Send the outbound request whose reply will arrive on `channel`.
    async fn send_request(&self, args: &Self::Args, channel: &str) -> anyhow::Result<()>;

    /// Reshape the correlated reply into the workflow's response. Domain
    /// error payloads are judged here — this is where per-workflow reply
    /// policy lives.
    fn reformat(&self, channel: &str, message: Value) -> Result<Self::Response, EngineError>;
}

/// Checkpointed data for a single-step workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(
    serialize = "A: Serialize, R: Serialize",
    deserialize = "A: DeserializeOwned, R: DeserializeOwned"
))]
pub struct SingleStepData<A, R> {
    pub current_state: Option<String>,
    pub args: Option<A>,
    pub response: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorSnapshot>,
}

impl<A, R> Default for SingleStepData<A, R> {
    fn default() -> Self {
        Self {
            current_state: None,
            args: None,
            response: None,
            error: None,
        }
    }
}

impl<A, R> WorkflowData for SingleStepData<A, R>
where
    A: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug,
{
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

/// Adapter that plugs a [`SingleStepSpec`] into the persistent-workflow
/// machinery.
pub struct SingleStepDefinition<S: SingleStepSpec> {
    spec: S,
    bus: Arc<dyn NotificationBus>,
    machine_spec: Arc<MachineSpec>,
    timeout: Duration,
}

impl<S: SingleStepSpec> SingleStepDefinition<S> {
    fn new(spec: S, bus: Arc<dyn NotificationBus>, timeout: Duration) -> Result<Self, EngineError> {
        let machine_spec = MachineSpec::new(
            START_STATE,
            vec![Transition {
                name: REQUEST_TRANSITION,
                from: &[START_STATE],
                to: SUCCEEDED_STATE,
            }],
            vec![SUCCEEDED_STATE],
        )?;

        Ok(Self {
            spec,
            bus,
            machine_spec,
            timeout,
        })
    }
}

#[async_trait]
impl<S: SingleStepSpec> WorkflowDefinition for SingleStepDefinition<S> {
    type Data = SingleStepData<S::Args, S::Response>;
    type Response = S::Response;

    fn machine_spec(&self) -> Arc<MachineSpec> {
        self.machine_spec.clone()
    }

    fn next_transition(&self, state: &str, data: &Self::Data) -> Option<&'static str> {
        (state == START_STATE && data.args.is_some()).then_some(REQUEST_TRANSITION)
    }

    async fn on_transition(
        &self,
        _transition: &str,
        data: &mut Self::Data,
    ) -> Result<(), EngineError> {
        let args = data.args.clone().ok_or_else(|| EngineError::InvalidArguments {
            reason: "no arguments recorded for the request step".to_string(),
        })?;

        let channel = notification_channel(self.spec.workflow_tag(), &self.spec.channel_id(&args))?;
        let job = CorrelationJob::new(self.bus.as_ref(), channel.clone(), self.timeout);

        let spec = &self.spec;
        let response = job
            .execute(
                |channel| async move { spec.send_request(&args, &channel).await },
                |message| std::future::ready(spec.reformat(&channel, message)),
            )
            .await?;

        data.response = Some(response);
        Ok(())
    }

    fn response(&self, data: &Self::Data) -> Option<Self::Response> {
        data.response.clone()
    }
}

/// A persistent workflow with exactly one correlated step.
pub struct SingleStepWorkflow<S: SingleStepSpec> {
    inner: PersistentWorkflow<SingleStepDefinition<S>>,
}

impl<S: SingleStepSpec> fmt::Debug for SingleStepWorkflow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleStepWorkflow")
            .field("key", &self.inner.key())
            .field("current_state", &self.inner.current_state())
            .finish()
    }
}

impl<S: SingleStepSpec> SingleStepWorkflow<S> {
    pub fn create(
        spec: S,
        bus: Arc<dyn NotificationBus>,
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let definition = SingleStepDefinition::new(spec, bus, timeout)?;
        let inner = PersistentWorkflow::create(definition, SingleStepData::default(), store, key)?;
        Ok(Self { inner })
    }

    pub async fn load_from_store(
        spec: S,
        bus: Arc<dyn NotificationBus>,
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let definition = SingleStepDefinition::new(spec, bus, timeout)?;
        let inner = PersistentWorkflow::load_from_store(definition, store, key).await?;
        Ok(Self { inner })
    }

    /// Drive the single step.
    ///
    /// Validation failures never touch the machine or the store. Correlation
    /// failures move the workflow to `errored`, are checkpointed, and
    /// re-raised on this first call; a later `run` against the errored
    /// workflow returns `None` without retrying, so callers can poll safely.
    pub async fn run(&mut self, args: S::Args) -> Result<Option<S::Response>, EngineError> {
        if self.inner.current_state() == START_STATE {
            self.inner.definition().spec.validate(&args)?;
            self.inner.data_mut().args = Some(args);
        }
        self.inner.run().await
    }

    pub fn get_response(&self) -> Option<S::Response> {
        self.inner.get_response()
    }

    pub fn current_state(&self) -> String {
        self.inner.current_state()
    }

    pub fn key(&self) -> &str {
        self.inner.key()
    }

    pub fn data(&self) -> &SingleStepData<S::Args, S::Response> {
        self.inner.data()
    }

    pub async fn save_checkpoint(&self) -> Result<(), EngineError> {
        self.inner.checkpoint().await
    }
}
