//! Finite-state-machine runtime with a declarative transition table.
//!
//! The table is validated at construction, so a malformed spec fails before
//! any workflow runs instead of surfacing as an unknown-transition error at
//! runtime. An `error` transition into [`ERRORED`] is implicit and always
//! available from every state, including while another transition is in
//! flight — that is the only way to force-abort a stuck step.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::errors::EngineError;

/// Terminal escape state reachable from anywhere.
pub const ERRORED: &str = "errored";

/// Name of the implicit always-permitted transition into [`ERRORED`].
pub const ERROR_TRANSITION: &str = "error";

/// One named edge of the transition table.
#[derive(Debug, Clone)]
pub struct Transition {
    pub name: &'static str,
    pub from: &'static [&'static str],
    pub to: &'static str,
}

/// Declarative machine description shared by all instances of one workflow
/// type.
#[derive(Debug, Clone)]
pub struct MachineSpec {
    initial_state: &'static str,
    transitions: Vec<Transition>,
    terminal_states: Vec<&'static str>,
}

impl MachineSpec {
    pub fn new(
        initial_state: &'static str,
        transitions: Vec<Transition>,
        terminal_states: Vec<&'static str>,
    ) -> Result<Arc<Self>, EngineError> {
        let spec = Self {
            initial_state,
            transitions,
            terminal_states,
        };
        spec.validate()?;
        Ok(Arc::new(spec))
    }

    /// Completeness checks on the table. Every failure here is a programmer
    /// error in the workflow definition, caught before any instance exists.
    fn validate(&self) -> Result<(), EngineError> {
        if self.transitions.is_empty() {
            return Err(EngineError::InvalidSpec {
                reason: "a machine needs at least one transition".to_string(),
            });
        }

        let mut names = BTreeSet::new();
        for transition in &self.transitions {
            if transition.name == ERROR_TRANSITION {
                return Err(EngineError::InvalidSpec {
                    reason: format!("'{ERROR_TRANSITION}' is reserved for the implicit error transition"),
                });
            }
            if !names.insert(transition.name) {
                return Err(EngineError::InvalidSpec {
                    reason: format!("duplicate transition name '{}'", transition.name),
                });
            }
            if transition.from.is_empty() {
                return Err(EngineError::InvalidSpec {
                    reason: format!("transition '{}' has no source states", transition.name),
                });
            }
        }

        let states = self.states();
        if !states.contains(self.initial_state) {
            return Err(EngineError::InvalidSpec {
                reason: format!(
                    "initial state '{}' does not appear in any transition",
                    self.initial_state
                ),
            });
        }
        for terminal in &self.terminal_states {
            if !states.contains(terminal) {
                return Err(EngineError::InvalidSpec {
                    reason: format!("terminal state '{terminal}' does not appear in any transition"),
                });
            }
        }
        for transition in &self.transitions {
            for from in transition.from {
                if self.terminal_states.contains(from) {
                    return Err(EngineError::InvalidSpec {
                        reason: format!(
                            "transition '{}' leaves terminal state '{from}'",
                            transition.name
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// All states referenced by the table, plus the implicit [`ERRORED`].
    pub fn states(&self) -> BTreeSet<&'static str> {
        let mut states: BTreeSet<&'static str> = BTreeSet::new();
        for transition in &self.transitions {
            states.extend(transition.from.iter().copied());
            states.insert(transition.to);
        }
        states.insert(ERRORED);
        states
    }

    pub fn state_count(&self) -> usize {
        self.states().len()
    }

    pub fn initial_state(&self) -> &'static str {
        self.initial_state
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        state == ERRORED || self.terminal_states.iter().any(|s| *s == state)
    }

    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.name == name)
    }
}

#[derive(Debug)]
struct Pending {
    name: String,
    to: &'static str,
}

#[derive(Debug)]
struct Core {
    current: String,
    pending: Option<Pending>,
}

/// One workflow instance's live machine.
///
/// The current state name is written in exactly one place, [`complete`] /
/// [`fail`], which is what keeps the machine and the persisted workflow data
/// consistent by construction.
///
/// [`complete`]: StateMachine::complete
/// [`fail`]: StateMachine::fail
#[derive(Debug)]
pub struct StateMachine {
    spec: Arc<MachineSpec>,
    core: Mutex<Core>,
}

impl StateMachine {
    /// Build a machine, either at the spec's initial state or resumed at a
    /// previously checkpointed state.
    pub fn new(spec: Arc<MachineSpec>, resume_at: Option<&str>) -> Result<Self, EngineError> {
        let current = match resume_at {
            Some(state) => {
                if !spec.states().contains(state) {
                    return Err(EngineError::InvalidSpec {
                        reason: format!("cannot resume at unknown state '{state}'"),
                    });
                }
                state.to_string()
            }
            None => spec.initial_state.to_string(),
        };

        Ok(Self {
            spec,
            core: Mutex::new(Core {
                current,
                pending: None,
            }),
        })
    }

    pub fn spec(&self) -> &Arc<MachineSpec> {
        &self.spec
    }

    pub fn current_state(&self) -> String {
        self.core.lock().expect("machine core poisoned").current.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.core.lock().expect("machine core poisoned").pending.is_some()
    }

    /// Mark a transition as in flight.
    ///
    /// Fails with `InvalidTransition` when the named transition is not
    /// defined from the current state, and with `TransitionInProgress` when
    /// another transition is pending — unless the requested transition is
    /// [`ERROR_TRANSITION`], which is always permitted.
    pub fn begin(&self, name: &str) -> Result<(), EngineError> {
        let mut core = self.core.lock().expect("machine core poisoned");

        if name == ERROR_TRANSITION {
            core.pending = Some(Pending {
                name: name.to_string(),
                to: ERRORED,
            });
            return Ok(());
        }

        if let Some(pending) = &core.pending {
            return Err(EngineError::TransitionInProgress {
                transition: name.to_string(),
                pending: pending.name.clone(),
            });
        }

        let transition = self
            .spec
            .transition(name)
            .filter(|t| t.from.contains(&core.current.as_str()))
            .ok_or_else(|| EngineError::InvalidTransition {
                transition: name.to_string(),
                state: core.current.clone(),
            })?;

        debug!(transition = %name, from = %core.current, to = %transition.to, "transition pending");
        core.pending = Some(Pending {
            name: name.to_string(),
            to: transition.to,
        });
        Ok(())
    }

    /// Finish the pending transition successfully, moving to its target
    /// state. Returns the new state name.
    pub fn complete(&self) -> Result<String, EngineError> {
        let mut core = self.core.lock().expect("machine core poisoned");
        let pending = core.pending.take().ok_or_else(|| EngineError::InvalidTransition {
            transition: "<none pending>".to_string(),
            state: core.current.clone(),
        })?;

        core.current = pending.to.to_string();
        Ok(core.current.clone())
    }

    /// Abort the pending transition (or force the machine directly) into
    /// [`ERRORED`]. Returns the new state name.
    pub fn fail(&self) -> String {
        let mut core = self.core.lock().expect("machine core poisoned");
        core.pending = None;
        core.current = ERRORED.to_string();
        core.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_spec() -> Arc<MachineSpec> {
        MachineSpec::new(
            "start",
            vec![
                Transition {
                    name: "request",
                    from: &["start"],
                    to: "requested",
                },
                Transition {
                    name: "confirm",
                    from: &["requested"],
                    to: "succeeded",
                },
            ],
            vec!["succeeded"],
        )
        .unwrap()
    }

    #[test]
    fn walks_declared_transitions() {
        let machine = StateMachine::new(two_step_spec(), None).unwrap();
        assert_eq!(machine.current_state(), "start");

        machine.begin("request").unwrap();
        assert_eq!(machine.complete().unwrap(), "requested");
        machine.begin("confirm").unwrap();
        assert_eq!(machine.complete().unwrap(), "succeeded");
    }

    #[test]
    fn rejects_transition_not_defined_from_current_state() {
        let machine = StateMachine::new(two_step_spec(), None).unwrap();
        let err = machine.begin("confirm").unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn rejects_second_transition_while_one_is_pending() {
        let machine = StateMachine::new(two_step_spec(), None).unwrap();
        machine.begin("request").unwrap();

        let err = machine.begin("request").unwrap_err();
        assert!(matches!(err, EngineError::TransitionInProgress { .. }));
    }

    #[test]
    fn error_transition_is_permitted_while_pending() {
        let machine = StateMachine::new(two_step_spec(), None).unwrap();
        machine.begin("request").unwrap();

        machine.begin(ERROR_TRANSITION).unwrap();
        assert_eq!(machine.complete().unwrap(), ERRORED);
    }

    #[test]
    fn fail_clears_pending_and_moves_to_errored() {
        let machine = StateMachine::new(two_step_spec(), None).unwrap();
        machine.begin("request").unwrap();
        assert_eq!(machine.fail(), ERRORED);
        assert!(!machine.is_pending());
    }

    #[test]
    fn resumes_at_checkpointed_state() {
        let machine = StateMachine::new(two_step_spec(), Some("requested")).unwrap();
        machine.begin("confirm").unwrap();
        assert_eq!(machine.complete().unwrap(), "succeeded");
    }

    #[test]
    fn resume_at_unknown_state_is_rejected() {
        let err = StateMachine::new(two_step_spec(), Some("limbo")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSpec { .. }));
    }

    #[test]
    fn spec_rejects_reserved_and_duplicate_names() {
        let reserved = MachineSpec::new(
            "start",
            vec![Transition {
                name: "error",
                from: &["start"],
                to: "succeeded",
            }],
            vec!["succeeded"],
        );
        assert!(reserved.is_err());

        let duplicated = MachineSpec::new(
            "start",
            vec![
                Transition {
                    name: "go",
                    from: &["start"],
                    to: "mid",
                },
                Transition {
                    name: "go",
                    from: &["mid"],
                    to: "succeeded",
                },
            ],
            vec!["succeeded"],
        );
        assert!(duplicated.is_err());
    }

    #[test]
    fn spec_rejects_transition_out_of_terminal_state() {
        let spec = MachineSpec::new(
            "start",
            vec![
                Transition {
                    name: "finish",
                    from: &["start"],
                    to: "succeeded",
                },
                Transition {
                    name: "reopen",
                    from: &["succeeded"],
                    to: "start",
                },
            ],
            vec!["succeeded"],
        );
        assert!(spec.is_err());
    }

    #[test]
    fn errored_is_always_a_known_terminal() {
        let spec = two_step_spec();
        assert!(spec.is_terminal(ERRORED));
        assert!(spec.is_terminal("succeeded"));
        assert!(!spec.is_terminal("requested"));
        assert!(spec.states().contains(ERRORED));
    }
}
