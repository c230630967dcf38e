pub mod manifest;

pub use manifest::{build_state, constructors, ActionSpec, ManifestContext, PatternSpec, StateSpec};
