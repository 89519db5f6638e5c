mod eval;
mod rule;
mod trend;

pub use rule::RuleConfig;
pub use trend::evaluate_all;
