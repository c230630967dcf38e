pub mod catalog;
pub mod state;

pub use catalog::{register_all, StateConstructor, StateRegistry};
pub use state::StateDefinition;
