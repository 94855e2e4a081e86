//! Daily winners and win streaks.
//!
//! Ties are never broken: every user sharing the fastest successful time on
//! a date is a winner, and each of them earns win-streak credit
//! independently.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{PuzzleType, RecordSnapshot, TimeRecord, UserId};
use crate::streaks::{streaks, StreakRun};

/// Result of one puzzle date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DailyOutcome {
    /// Everyone tied for the fastest successful time.
    Winners {
        seconds: i64,
        users: BTreeSet<UserId>,
    },
    /// Nobody played, or nobody finished.
    NoWinner,
}

impl DailyOutcome {
    /// Compute the outcome from the records of a single date.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a TimeRecord>,
    {
        let finished: Vec<&TimeRecord> = records.into_iter().filter(|r| r.seconds > 0).collect();
        match finished.iter().map(|r| r.seconds).min() {
            Some(best) => DailyOutcome::Winners {
                seconds: best,
                users: finished
                    .iter()
                    .filter(|r| r.seconds == best)
                    .map(|r| r.user_id.clone())
                    .collect(),
            },
            None => DailyOutcome::NoWinner,
        }
    }

    pub fn winners(&self) -> BTreeSet<UserId> {
        match self {
            DailyOutcome::Winners { users, .. } => users.clone(),
            DailyOutcome::NoWinner => BTreeSet::new(),
        }
    }

    pub fn winning_time(&self) -> Option<i64> {
        match self {
            DailyOutcome::Winners { seconds, .. } => Some(*seconds),
            DailyOutcome::NoWinner => None,
        }
    }

    pub fn is_winner(&self, user: &str) -> bool {
        matches!(self, DailyOutcome::Winners { users, .. } if users.contains(user))
    }
}

/// Leaderboard for one puzzle type over a record snapshot.
///
/// Outcomes are computed once per date on construction.
#[derive(Debug, Clone)]
pub struct Leaderboard<'a> {
    puzzle: PuzzleType,
    snapshot: &'a RecordSnapshot,
    outcomes: BTreeMap<NaiveDate, DailyOutcome>,
}

impl<'a> Leaderboard<'a> {
    pub fn new(snapshot: &'a RecordSnapshot, puzzle: PuzzleType) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Vec<&TimeRecord>> = BTreeMap::new();
        for record in snapshot.for_puzzle(puzzle) {
            by_date.entry(record.date).or_default().push(record);
        }
        let outcomes = by_date
            .into_iter()
            .map(|(date, records)| (date, DailyOutcome::from_records(records)))
            .collect();
        Self {
            puzzle,
            snapshot,
            outcomes,
        }
    }

    pub fn puzzle(&self) -> PuzzleType {
        self.puzzle
    }

    pub fn snapshot(&self) -> &'a RecordSnapshot {
        self.snapshot
    }

    /// Outcome for `date`; `NoWinner` for dates nobody played.
    pub fn outcome(&self, date: NaiveDate) -> DailyOutcome {
        self.outcomes
            .get(&date)
            .cloned()
            .unwrap_or(DailyOutcome::NoWinner)
    }

    pub fn winners(&self, date: NaiveDate) -> BTreeSet<UserId> {
        self.outcome(date).winners()
    }

    pub fn winning_time(&self, date: NaiveDate) -> Option<i64> {
        self.outcomes.get(&date).and_then(DailyOutcome::winning_time)
    }

    /// Records on which `user` won, up to and including `up_to`.
    fn wins_up_to<'b>(
        &'b self,
        user: &'b str,
        up_to: NaiveDate,
    ) -> impl Iterator<Item = &'a TimeRecord> + 'b {
        self.snapshot
            .for_puzzle(self.puzzle)
            .filter(move |r| r.user_id == user && r.date <= up_to)
            .filter(move |r| {
                self.outcomes
                    .get(&r.date)
                    .is_some_and(|o| o.is_winner(&r.user_id))
            })
    }

    /// Win streaks for `user` considering dates up to `up_to`.
    pub fn win_streaks(&self, user: &str, up_to: NaiveDate) -> Vec<StreakRun> {
        streaks(self.wins_up_to(user, up_to))
    }

    /// Users whose win streak is live on `date`, with the records forming it.
    ///
    /// Only winners of `date` qualify, and only if their last win streak up
    /// to `date` actually ends on `date`.
    pub fn current_win_streaks(&self, date: NaiveDate) -> BTreeMap<UserId, Vec<TimeRecord>> {
        let mut live = BTreeMap::new();
        for user in self.winners(date) {
            let last = self.win_streaks(&user, date).into_iter().last();
            if let Some(run) = last.filter(|run| run.last_date() == date) {
                live.insert(user, run.into_records());
            }
        }
        live
    }

    /// Number of wins per user within `[start, end]`.
    ///
    /// Every user who played in the range appears, with zero if they never
    /// won.
    pub fn win_tally(&self, start: NaiveDate, end: NaiveDate) -> BTreeMap<UserId, u32> {
        let mut tally: BTreeMap<UserId, u32> = BTreeMap::new();
        for record in self.snapshot.for_puzzle(self.puzzle) {
            if record.date < start || record.date > end {
                continue;
            }
            let count = tally.entry(record.user_id.clone()).or_insert(0);
            if self.outcome(record.date).is_winner(&record.user_id) {
                *count += 1;
            }
        }
        tally
    }
}
