//! Time records, puzzle types and the immutable record snapshot.
//!
//! Every analytical component reads a [`RecordSnapshot`]: an explicitly
//! constructed collection of *active* time records. Nothing in the engine
//! writes back to it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// User identifier as supplied by the messaging front end.
pub type UserId = String;

/// Sentinel stored in `seconds` for a failed attempt.
pub const FAIL_SECONDS: i64 = -1;

/// Kind of daily puzzle a time was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PuzzleType {
    MiniCrossword,
    Crossword,
    EasySudoku,
}

impl PuzzleType {
    pub const ALL: [PuzzleType; 3] = [
        PuzzleType::MiniCrossword,
        PuzzleType::Crossword,
        PuzzleType::EasySudoku,
    ];

    /// Short tag used in storage and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            PuzzleType::MiniCrossword => "mini",
            PuzzleType::Crossword => "crossword",
            PuzzleType::EasySudoku => "sudoku",
        }
    }

    /// Built-in profile for this puzzle type.
    pub fn profile(&self) -> PuzzleProfile {
        match self {
            PuzzleType::MiniCrossword => {
                let weekday = SpeedThresholds::new(15, 3 * 60 + 30);
                let mut thresholds = [weekday; 7];
                thresholds[Weekday::Sat.num_days_from_monday() as usize] =
                    SpeedThresholds::new(30, 5 * 60 + 30);
                PuzzleProfile {
                    thresholds,
                    saturday_effect: true,
                }
            }
            PuzzleType::Crossword => PuzzleProfile {
                thresholds: [
                    SpeedThresholds::new(5 * 60, 15 * 60),
                    SpeedThresholds::new(10 * 60, 30 * 60),
                    SpeedThresholds::new(15 * 60, 45 * 60),
                    SpeedThresholds::new(30 * 60, 60 * 60),
                    SpeedThresholds::new(30 * 60, 60 * 60),
                    SpeedThresholds::new(45 * 60, 120 * 60),
                    SpeedThresholds::new(45 * 60, 120 * 60),
                ],
                saturday_effect: false,
            },
            PuzzleType::EasySudoku => PuzzleProfile {
                thresholds: [SpeedThresholds::new(60, 10 * 60); 7],
                saturday_effect: false,
            },
        }
    }
}

impl fmt::Display for PuzzleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PuzzleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mini" | "mini_crossword" | "minicrossword" => Ok(PuzzleType::MiniCrossword),
            "crossword" | "regular" => Ok(PuzzleType::Crossword),
            "sudoku" | "easy_sudoku" | "easysudoku" => Ok(PuzzleType::EasySudoku),
            other => Err(ValidationError::UnknownPuzzle(other.to_string())),
        }
    }
}

/// Fast/slow reference times for one weekday, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedThresholds {
    pub fast: u32,
    pub slow: u32,
}

impl SpeedThresholds {
    pub const fn new(fast: u32, slow: u32) -> Self {
        Self { fast, slow }
    }
}

/// Per-puzzle-type settings shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PuzzleProfile {
    /// Indexed by `Weekday::num_days_from_monday()`.
    pub thresholds: [SpeedThresholds; 7],
    /// Whether the rating model fits a Saturday multiplier for this type.
    pub saturday_effect: bool,
}

/// Coarse speed bucket for a single time, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    Failed,
    Tier(u8),
}

impl PuzzleProfile {
    /// Number of tiers, `Tier(0)` through `Tier(SLOWEST_TIER)`.
    pub const SLOWEST_TIER: u8 = 17;

    /// Bucket `seconds` on `weekday` against this profile's thresholds.
    ///
    /// Times under `fast` land in tier 0 and times over `slow` in the
    /// slowest tier; in between the position is bent by `^0.8` so the
    /// fast end is spread out more.
    pub fn speed_tier(&self, seconds: i64, weekday: Weekday) -> SpeedTier {
        if seconds < 0 {
            return SpeedTier::Failed;
        }
        let SpeedThresholds { fast, slow } =
            self.thresholds[weekday.num_days_from_monday() as usize];
        let t = seconds as f64;
        if t < fast as f64 {
            return SpeedTier::Tier(0);
        }
        if t > slow as f64 {
            return SpeedTier::Tier(Self::SLOWEST_TIER);
        }
        let last = (Self::SLOWEST_TIER - 1) as f64;
        let span = (slow.saturating_sub(fast)).max(1) as f64;
        let ratio = ((t - fast as f64) / span).powf(0.8);
        let index = (ratio * last).ceil().min(last);
        SpeedTier::Tier(index as u8)
    }
}

/// One submitted time for a user, puzzle and date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub user_id: UserId,
    pub puzzle: PuzzleType,
    pub date: NaiveDate,
    /// Non-negative on success, negative for a failed attempt.
    pub seconds: i64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TimeRecord {
    /// Active record submitted at `submitted_at`.
    pub fn new(
        user_id: impl Into<UserId>,
        puzzle: PuzzleType,
        date: NaiveDate,
        seconds: i64,
        submitted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            puzzle,
            date,
            seconds,
            submitted_at,
            deleted_at: None,
        }
    }

    pub fn is_fail(&self) -> bool {
        self.seconds < 0
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Submission ordering key: the timestamp, or midnight of the puzzle
    /// date for legacy rows imported without one.
    pub fn submission_key(&self) -> (DateTime<Utc>, NaiveDate) {
        let ts = self
            .submitted_at
            .unwrap_or_else(|| self.date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
        (ts, self.date)
    }

    /// `m:ss`, or `fail`.
    pub fn time_str(&self) -> String {
        if self.is_fail() {
            return "fail".to_string();
        }
        format!("{}:{:02}", self.seconds / 60, self.seconds % 60)
    }
}

/// Immutable view over the active records handed to the engine.
///
/// Records are kept sorted by `(puzzle, date, user)`, so every derived
/// artifact is independent of the order the store returned rows in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    records: Vec<TimeRecord>,
}

impl RecordSnapshot {
    /// Build a snapshot, dropping soft-deleted records.
    pub fn new(records: impl IntoIterator<Item = TimeRecord>) -> Self {
        let mut records: Vec<TimeRecord> =
            records.into_iter().filter(TimeRecord::is_active).collect();
        records.sort_by(|a, b| {
            (a.puzzle, a.date, &a.user_id, a.submission_key())
                .cmp(&(b.puzzle, b.date, &b.user_id, b.submission_key()))
        });
        Self { records }
    }

    pub fn records(&self) -> &[TimeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRecord> {
        self.records.iter()
    }

    /// Records for one puzzle type.
    pub fn for_puzzle(&self, puzzle: PuzzleType) -> impl Iterator<Item = &TimeRecord> {
        self.records.iter().filter(move |r| r.puzzle == puzzle)
    }

    /// Records for one puzzle type on one date.
    pub fn on_date(
        &self,
        puzzle: PuzzleType,
        date: NaiveDate,
    ) -> impl Iterator<Item = &TimeRecord> {
        self.for_puzzle(puzzle).filter(move |r| r.date == date)
    }

    /// One user's records for a puzzle type, date ascending.
    pub fn for_user<'a>(
        &'a self,
        puzzle: PuzzleType,
        user: &'a str,
    ) -> impl Iterator<Item = &'a TimeRecord> + 'a {
        self.for_puzzle(puzzle).filter(move |r| r.user_id == user)
    }

    /// Records for a puzzle type within `[start, end]`.
    pub fn between(
        &self,
        puzzle: PuzzleType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<&TimeRecord>, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(self
            .for_puzzle(puzzle)
            .filter(|r| r.date >= start && r.date <= end)
            .collect())
    }

    /// Distinct users with at least one record for `puzzle`.
    pub fn users(&self, puzzle: PuzzleType) -> BTreeSet<UserId> {
        self.for_puzzle(puzzle).map(|r| r.user_id.clone()).collect()
    }

    /// Distinct dates with at least one record for `puzzle`.
    pub fn dates(&self, puzzle: PuzzleType) -> BTreeSet<NaiveDate> {
        self.for_puzzle(puzzle).map(|r| r.date).collect()
    }
}

impl FromIterator<TimeRecord> for RecordSnapshot {
    fn from_iter<T: IntoIterator<Item = TimeRecord>>(iter: T) -> Self {
        Self::new(iter)
    }
}
