//! # Crossbot Core Library
//!
//! This library provides the analytics behind Crossbot, a tracker for daily
//! puzzle times (mini crossword, full crossword, easy sudoku). Every
//! operation is available through the `crossbot` CLI, which is a thin layer
//! over this crate.
//!
//! ## Architecture
//!
//! - **Records**: an explicit, immutable [`RecordSnapshot`] of active times
//!   is the only input of every analysis
//! - **Streaks and leaderboard**: participation streaks, daily winners and
//!   win streaks
//! - **Scoring**: outlier-trimmed, smoothed daily z-scores
//! - **Rating**: hierarchical skill/difficulty model fitted by an external
//!   [`PosteriorSampler`]
//! - **Storage**: SQLite record store and TOML configuration
//!
//! ## Key Components
//!
//! - [`Leaderboard`]: Winners and win streaks for one puzzle type
//! - [`RatingModel`]: Data preparation, convergence checks and extraction
//! - [`Database`]: Times, balances and stored ratings
//! - [`Config`]: Application configuration management

pub mod error;
pub mod leaderboard;
pub mod rating;
pub mod records;
pub mod report;
pub mod scoring;
pub mod storage;
pub mod streaks;

pub use error::{ConfigError, CoreError, DatabaseError, RatingError, ValidationError};
pub use leaderboard::{DailyOutcome, Leaderboard};
pub use rating::{
    PosteriorSampler, RatingConfig, RatingJob, RatingModel, RatingSnapshot,
};
pub use records::{PuzzleProfile, PuzzleType, RecordSnapshot, SpeedTier, TimeRecord, UserId};
pub use report::{announcement, AnnounceSettings, Announcement};
pub use scoring::{normalized_scores, DayScores, ScoringConfig};
pub use storage::{AddOutcome, Config, Database};
pub use streaks::{streaks, StreakRun};
