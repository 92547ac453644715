//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `CrawlPhase`: The phase recorded in the progress checkpoint and its legal transitions
//! - `AttemptState`: The per-item retry lifecycle (pending, attempting, succeeded, failed)

mod attempt;
mod phase;

// Re-export main types
pub use attempt::{AttemptEvent, AttemptState};
pub use phase::CrawlPhase;
