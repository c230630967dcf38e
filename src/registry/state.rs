use std::fmt;

use crate::executor::action::Action;
use crate::perception::types::Pattern;

/// A named, recognizable screen: how to detect it and what to do about it.
pub struct StateDefinition {
    pub name: String,
    /// Higher values are evaluated first; ties keep registration order.
    pub priority: i32,
    /// Any one matching pattern qualifies the state. Evaluated in order.
    pub patterns: Vec<Pattern>,
    /// Run in order when the state is detected.
    pub actions: Vec<Box<dyn Action>>,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            patterns: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn boxed_action(mut self, action: Box<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name()).collect()
    }
}

impl fmt::Debug for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDefinition")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("patterns", &self.patterns.iter().map(|p| &p.label).collect::<Vec<_>>())
            .field("actions", &self.action_names())
            .finish()
    }
}
