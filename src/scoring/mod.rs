//! Score engine
//!
//! Converts per-slot item selections into weighted affinity scores over the
//! style categories, then derives confidence and hybrid membership.

mod engine;
mod quiz;

pub use engine::{calculate_match_score, hybrid_detection, ScoreEngine, StyleAssignment, StyleScores};
pub use quiz::QuizProcessor;
