use crate::errors::{BotError, BotResult};
use crate::registry::state::StateDefinition;

/// Builds one state definition during the startup registration phase.
pub type StateConstructor = Box<dyn FnOnce() -> BotResult<StateDefinition> + Send>;

/// Catalog of known screens, in evaluation order.
///
/// Populated once at startup; the run loop only ever sees it behind an `Arc`,
/// so it is read-only from the first cycle on.
#[derive(Debug, Default)]
pub struct StateRegistry {
    states: Vec<StateDefinition>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state. Fails without modifying the registry when the name is
    /// already taken or the state has no patterns.
    pub fn register(&mut self, state: StateDefinition) -> BotResult<()> {
        if state.patterns.is_empty() {
            return Err(BotError::EmptyPatterns(state.name));
        }
        if self.get(&state.name).is_some() {
            return Err(BotError::DuplicateState(state.name));
        }

        // Stable insert: after every state with priority >= the new one.
        let pos = self
            .states
            .iter()
            .position(|s| s.priority < state.priority)
            .unwrap_or(self.states.len());

        tracing::info!(
            state = %state.name,
            priority = state.priority,
            patterns = state.patterns.len(),
            actions = state.actions.len(),
            position = pos,
            "state registered"
        );
        self.states.insert(pos, state);
        Ok(())
    }

    /// Every state in evaluation order.
    pub fn all_states(&self) -> &[StateDefinition] {
        &self.states
    }

    pub fn get(&self, name: &str) -> Option<&StateDefinition> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.states.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Startup registration phase: build and register every state in the order given.
///
/// Stops at the first constructor or registration error; the caller must not
/// start the run loop with a partial registry.
pub fn register_all(constructors: Vec<StateConstructor>) -> BotResult<StateRegistry> {
    let mut registry = StateRegistry::new();
    for build in constructors {
        let state = build()?;
        registry.register(state)?;
    }
    tracing::info!(states = ?registry.names(), "registration phase complete");
    Ok(registry)
}
