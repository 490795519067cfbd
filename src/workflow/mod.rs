//! Persistent, resumable workflow runtime.
//!
//! A [`PersistentWorkflow`] binds a [`StateMachine`] to a [`DurableStore`]
//! key and checkpoints the workflow data after every transition, so a
//! restart reconstructs the workflow exactly where it left off.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::machine::{MachineSpec, StateMachine, ERRORED, ERROR_TRANSITION};
use crate::store::DurableStore;

pub mod correlation;
pub mod single_step;

pub use correlation::CorrelationJob;
pub use single_step::{
    notification_channel, SingleStepData, SingleStepSpec, SingleStepWorkflow, START_STATE,
    SUCCEEDED_STATE,
};

/// Workflow data: the `currentState` marker plus whatever domain fields the
/// workflow accumulates as it progresses.
///
/// `current_state` is the single source of truth for resumption; the engine
/// writes it in lockstep with the machine's own state so the two can never
/// diverge.
pub trait WorkflowData:
    Serialize + DeserializeOwned + Clone + Send + Sync + fmt::Debug
{
    fn current_state(&self) -> Option<&str>;

    fn set_current_state(&mut self, state: &str);

    /// Fold a failure into the data before it is checkpointed. Default: keep
    /// nothing beyond the state name.
    fn record_error(&mut self, _error: &EngineError) {}
}

/// The behaviour of one workflow type: its transition table, the handler
/// behind each transition, the drive order, and the externally visible
/// response view.
#[async_trait]
pub trait WorkflowDefinition: Send + Sync {
    type Data: WorkflowData;
    type Response: Clone + Send + Sync + fmt::Debug;

    fn machine_spec(&self) -> Arc<MachineSpec>;

    /// Which transition advances the workflow out of `state`, given the data
    /// gathered so far. `None` means the state is unresolved — `run` hands
    /// control back to the caller until more input arrives.
    fn next_transition(&self, state: &str, data: &Self::Data) -> Option<&'static str>;

    /// The handler for one named transition. On success the machine advances
    /// to the transition's target state; on failure it moves to `errored`.
    async fn on_transition(
        &self,
        transition: &str,
        data: &mut Self::Data,
    ) -> Result<(), EngineError>;

    /// The externally visible response view derived from data.
    fn response(&self, data: &Self::Data) -> Option<Self::Response>;
}

/// A state machine made resumable by checkpointing into a durable store.
pub struct PersistentWorkflow<W: WorkflowDefinition> {
    definition: W,
    machine: StateMachine,
    data: W::Data,
    store: Arc<dyn DurableStore>,
    key: String,
}

impl<W: WorkflowDefinition> fmt::Debug for PersistentWorkflow<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentWorkflow")
            .field("key", &self.key)
            .field("current_state", &self.machine.current_state())
            .field("data", &self.data)
            .finish()
    }
}

impl<W: WorkflowDefinition> PersistentWorkflow<W> {
    /// Bind a workflow to a store key. When `data.current_state` is already
    /// set the machine resumes there; otherwise it starts at the spec's
    /// initial state, which is stamped into the data immediately.
    pub fn create(
        definition: W,
        mut data: W::Data,
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let spec = definition.machine_spec();
        let machine = StateMachine::new(spec, data.current_state())?;
        if data.current_state().is_none() {
            data.set_current_state(&machine.current_state());
        }

        Ok(Self {
            definition,
            machine,
            data,
            store,
            key: key.into(),
        })
    }

    /// Reconstruct a workflow from its last checkpoint. Fails with
    /// `NotFound` when no checkpoint exists for the key.
    pub async fn load_from_store(
        definition: W,
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let key = key.into();
        let value = store
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound { key: key.clone() })?;

        let data: W::Data = serde_json::from_value(value)
            .map_err(crate::store::StoreError::Serialization)?;

        info!(key = %key, state = ?data.current_state(), "workflow reconstructed from checkpoint");
        Self::create(definition, data, store, key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn definition(&self) -> &W {
        &self.definition
    }

    pub fn current_state(&self) -> String {
        self.machine.current_state()
    }

    pub fn data(&self) -> &W::Data {
        &self.data
    }

    /// Mutable access for seeding caller-supplied input (arguments, auth
    /// tokens, credentials) between `run` calls.
    pub fn data_mut(&mut self) -> &mut W::Data {
        &mut self.data
    }

    /// The externally visible response view.
    pub fn get_response(&self) -> Option<W::Response> {
        self.definition.response(&self.data)
    }

    /// Write the current data to the durable store.
    ///
    /// Failures are logged and re-raised, never swallowed — continuing after
    /// a silent checkpoint failure would desynchronize persisted and
    /// in-memory progress.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        let value = serde_json::to_value(&self.data)
            .map_err(crate::store::StoreError::Serialization)?;

        if let Err(err) = self.store.set(&self.key, value).await {
            error!(key = %self.key, error = %err, "checkpoint write failed");
            return Err(err.into());
        }

        debug!(key = %self.key, state = %self.machine.current_state(), "checkpointed");
        Ok(())
    }

    /// Fire one named transition: guard, run the handler, move the machine,
    /// and keep `data.current_state` in lockstep.
    async fn fire(&mut self, transition: &'static str) -> Result<(), EngineError> {
        let from_state = self.machine.current_state();
        self.machine.begin(transition)?;

        match self.definition.on_transition(transition, &mut self.data).await {
            Ok(()) => {
                let state = self.machine.complete()?;
                self.data.set_current_state(&state);
                info!(
                    key = %self.key,
                    transition = %transition,
                    from = %from_state,
                    to = %state,
                    "transition complete"
                );
                Ok(())
            }
            Err(err) => {
                // Snapshot before the state flips to errored, by value, so
                // the error owns a plain copy rather than a handle into the
                // live workflow.
                let snapshot = serde_json::to_value(&self.data).unwrap_or(Value::Null);
                let state = self.machine.fail();
                self.data.set_current_state(&state);
                self.data.record_error(&err);
                warn!(
                    key = %self.key,
                    transition = %transition,
                    from = %from_state,
                    error = %err,
                    "transition failed, workflow errored"
                );
                Err(EngineError::TransitionFailed {
                    transition: transition.to_string(),
                    state: from_state,
                    state_snapshot: snapshot,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Resumable driver: advance transition-by-transition until a terminal
    /// or unresolved state, checkpointing before and after each attempt.
    ///
    /// The loop is bounded by the number of declared states so a
    /// misconfigured drive table cannot spin forever.
    pub async fn run(&mut self) -> Result<Option<W::Response>, EngineError> {
        let limit = self.definition.machine_spec().state_count();

        for _ in 0..limit {
            let state = self.machine.current_state();

            if state == ERRORED {
                warn!(key = %self.key, "workflow already errored, not re-running");
                return Ok(None);
            }
            if self.definition.machine_spec().is_terminal(&state) {
                return Ok(self.get_response());
            }

            let Some(transition) = self.definition.next_transition(&state, &self.data) else {
                // Unresolved intermediate state: waiting on caller input.
                debug!(key = %self.key, state = %state, "no transition resolvable, handing back");
                return Ok(self.get_response());
            };

            // Checkpoint the pre-attempt state so a crash mid-handler resumes
            // from here, not from a half-applied step.
            self.checkpoint().await?;

            match self.fire(transition).await {
                Ok(()) => self.checkpoint().await?,
                Err(err) => {
                    if self.machine.current_state() != ERRORED {
                        self.machine.begin(ERROR_TRANSITION)?;
                        let state = self.machine.complete()?;
                        self.data.set_current_state(&state);
                    }
                    if let Err(checkpoint_err) = self.checkpoint().await {
                        error!(
                            key = %self.key,
                            original_error = %err,
                            "failed to checkpoint errored state"
                        );
                        return Err(checkpoint_err);
                    }
                    return Err(err);
                }
            }
        }

        Err(EngineError::TransitionLimitExceeded { limit })
    }
}
