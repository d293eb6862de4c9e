//! Pure game rules.
//!
//! Everything here is a function of records already read from the store, so
//! every client replica reaches the same verdict from the same snapshot.

pub mod convergence;
pub mod phase;
pub mod prompts;
pub mod scoring;

pub use convergence::{evaluate, ConvergenceDetector, Transition};
pub use phase::normalize_answer;
pub use prompts::PromptDeck;
pub use scoring::{score_round, total_scores, ScoreDelta, ScoreTotal};
