//! Streak detection.
//!
//! A streak is a maximal run of calendar-consecutive dates. Runs are always
//! re-derived from the current records, so deleting a record from the middle
//! of a run splits it the next time streaks are computed.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::records::{PuzzleType, RecordSnapshot, TimeRecord};

/// Maximal run of records on consecutive days, date ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRun {
    records: Vec<TimeRecord>,
}

impl StreakRun {
    fn start(record: TimeRecord) -> Self {
        Self {
            records: vec![record],
        }
    }

    fn extends_to(&self, date: NaiveDate) -> bool {
        date == self.last_date() + Duration::days(1)
    }

    pub fn records(&self) -> &[TimeRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TimeRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false; runs are never empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.records[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.records[self.records.len() - 1].date
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first_date() && date <= self.last_date()
    }
}

/// Partition records into maximal consecutive-day runs.
///
/// Intended for one user's records, optionally pre-filtered (wins only,
/// up to a cutoff date, ...). Every input record lands in exactly one run
/// and runs come back ordered by first date.
pub fn streaks<'a, I>(records: I) -> Vec<StreakRun>
where
    I: IntoIterator<Item = &'a TimeRecord>,
{
    let mut sorted: Vec<&TimeRecord> = records.into_iter().collect();
    sorted.sort_by_key(|r| r.date);

    let mut runs = Vec::new();
    let mut current: Option<StreakRun> = None;
    for record in sorted {
        if let Some(run) = current.as_mut() {
            if run.extends_to(record.date) {
                run.records.push(record.clone());
                continue;
            }
        }
        if let Some(done) = current.replace(StreakRun::start(record.clone())) {
            runs.push(done);
        }
    }
    runs.extend(current);
    runs
}

/// Participation streaks for one user on one puzzle type.
pub fn participation_streaks(
    snapshot: &RecordSnapshot,
    puzzle: PuzzleType,
    user: &str,
) -> Vec<StreakRun> {
    streaks(snapshot.for_user(puzzle, user))
}

/// Streak length before and after the record on a given date counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakProgress {
    pub previous: usize,
    pub current: usize,
}

/// Locate `date` in `runs` and report how the streak grew.
///
/// `previous` is the number of days in the run before `date`, `current` is
/// the full run length. Returns `None` if no run covers `date`.
pub fn streak_progress(runs: &[StreakRun], date: NaiveDate) -> Option<StreakProgress> {
    runs.iter().find_map(|run| {
        run.records
            .iter()
            .position(|r| r.date == date)
            .map(|previous| StreakProgress {
                previous,
                current: run.len(),
            })
    })
}

/// Milestones in `(previous, current]`, ascending.
pub fn milestones_crossed(progress: StreakProgress, milestones: &[u32]) -> Vec<u32> {
    let mut hit: Vec<u32> = milestones
        .iter()
        .copied()
        .filter(|&m| (m as usize) > progress.previous && (m as usize) <= progress.current)
        .collect();
    hit.sort_unstable();
    hit
}

/// First date in `[start, end]` without a record.
pub fn first_missed_date<'a, I>(records: I, start: NaiveDate, end: NaiveDate) -> Option<NaiveDate>
where
    I: IntoIterator<Item = &'a TimeRecord>,
{
    let done: std::collections::BTreeSet<NaiveDate> = records
        .into_iter()
        .map(|r| r.date)
        .filter(|d| *d >= start && *d <= end)
        .collect();
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .find(|d| !done.contains(d))
}
