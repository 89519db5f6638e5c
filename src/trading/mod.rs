//! Capital tracking and risk levels per instance.

mod capital;

pub use capital::{validate_levels, CapitalManager, CapitalState, Level, LevelRange};
