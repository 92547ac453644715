/// Crawl phase definitions for the progress checkpoint
///
/// This module defines the phases a harvest moves through and which moves
/// between them are legal.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the phase recorded in the progress checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    /// Nothing has run yet, or a finished harvest is being restarted
    #[default]
    Initializing,

    // ===== Active Phases =====
    /// Walking listing pages to populate the frontier
    CollectingUrls,

    /// Visiting frontier URLs and extracting records
    ExtractingData,

    // ===== Stopped Phases =====
    /// A run was stopped by a signal or a phase-level error
    Interrupted,

    /// Every unprocessed URL was attempted
    Completed,
}

impl CrawlPhase {
    /// Returns true for the phases that do work
    pub fn is_active(&self) -> bool {
        matches!(self, Self::CollectingUrls | Self::ExtractingData)
    }

    /// Returns true if the harvest can move from this phase to `next`
    ///
    /// The forward path is `initializing -> collecting_urls -> extracting_data
    /// -> completed`. Any phase except `completed` may be interrupted, and an
    /// interrupted run may re-enter any phase that does work. A completed
    /// harvest may only start over from `initializing`.
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;

        match (self, next) {
            (Initializing, CollectingUrls) => true,
            (Initializing, ExtractingData) => true,
            (CollectingUrls, ExtractingData) => true,
            (ExtractingData, Completed) => true,
            (Initializing | CollectingUrls | ExtractingData, Interrupted) => true,
            (Interrupted, CollectingUrls | ExtractingData) => true,
            (Interrupted, Initializing) => true,
            (Completed, Initializing) => true,
            _ => false,
        }
    }

    /// Converts the phase to its persisted string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::CollectingUrls => "collecting_urls",
            Self::ExtractingData => "extracting_data",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
        }
    }

    /// Parses a phase from its persisted string representation
    ///
    /// Returns None if the string doesn't match any known phase.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(Self::Initializing),
            "collecting_urls" => Some(Self::CollectingUrls),
            "extracting_data" => Some(Self::ExtractingData),
            "interrupted" => Some(Self::Interrupted),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Returns all phases
    pub fn all_phases() -> Vec<Self> {
        vec![
            Self::Initializing,
            Self::CollectingUrls,
            Self::ExtractingData,
            Self::Interrupted,
            Self::Completed,
        ]
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
