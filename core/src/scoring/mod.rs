//! Scoring pipeline: C4 (components), C5 (smoothing), C6 (orchestration).

pub mod components;
pub mod model;
pub mod smoother;

pub use model::{score_token, ScoringOutcome};
