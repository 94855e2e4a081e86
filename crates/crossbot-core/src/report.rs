//! Structured daily announcement.
//!
//! Combines the leaderboard, win streaks and (when available) the stored
//! rating into one payload. Rendering it as a message is up to the caller.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::leaderboard::Leaderboard;
use crate::rating::{Estimate, RatingSnapshot};
use crate::records::{PuzzleType, RecordSnapshot, UserId};

/// Announcement settings, see `[announce]` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceSettings {
    /// Maximum number of overperformers listed.
    #[serde(default = "default_overperformers")]
    pub overperformers: usize,
}

fn default_overperformers() -> usize {
    3
}

impl Default for AnnounceSettings {
    fn default() -> Self {
        Self {
            overperformers: default_overperformers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakingUser {
    pub user: UserId,
    /// Consecutive wins ending on the announced date.
    pub length: usize,
    pub since: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overperformer {
    pub user: UserId,
    /// Standardized residual; more negative is further ahead of prediction.
    pub residual: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Easy,
    Typical,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultySummary {
    pub estimate: Estimate,
    pub level: DifficultyLevel,
    /// Share of fitted dates that were no harder, in `[0, 1]`.
    pub percentile: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub puzzle: PuzzleType,
    pub date: NaiveDate,
    pub winning_time: Option<i64>,
    /// Users who won both the announced date and the day before.
    pub streaks: Vec<StreakingUser>,
    /// Winners of the announced date not already listed in `streaks`.
    pub winners_today: Vec<UserId>,
    pub winners_yesterday: Vec<UserId>,
    pub overperformers: Vec<Overperformer>,
    pub difficulty: Option<DifficultySummary>,
}

impl Announcement {
    /// Nobody finished on the announced date.
    pub fn is_quiet(&self) -> bool {
        self.winning_time.is_none()
    }
}

/// Classify the fitted difficulty of `date` against the spread of dates.
pub fn difficulty_summary(rating: &RatingSnapshot, date: NaiveDate) -> Option<DifficultySummary> {
    let estimate = rating.difficulty(date)?.estimate;
    let band = 0.5 * rating.params.date_dev.mean;
    let level = if estimate.mean > band {
        DifficultyLevel::Hard
    } else if estimate.mean < -band {
        DifficultyLevel::Easy
    } else {
        DifficultyLevel::Typical
    };
    let no_harder = rating
        .difficulties
        .iter()
        .filter(|d| d.estimate.mean <= estimate.mean)
        .count();
    Some(DifficultySummary {
        estimate,
        level,
        percentile: no_harder as f64 / rating.difficulties.len() as f64,
    })
}

/// The `limit` lowest residuals recorded on `date`.
pub fn overperformers(
    rating: &RatingSnapshot,
    date: NaiveDate,
    limit: usize,
) -> Vec<Overperformer> {
    let mut on_date: Vec<Overperformer> = rating
        .predictions_on(date)
        .map(|p| Overperformer {
            user: p.user.clone(),
            residual: p.residual,
        })
        .collect();
    on_date.sort_by(|a, b| a.residual.total_cmp(&b.residual).then_with(|| a.user.cmp(&b.user)));
    on_date.truncate(limit);
    on_date
}

/// Build the announcement for `puzzle` on `date`.
///
/// `rating` should be the stored rating of the same puzzle type; without
/// it the overperformer list is empty and there is no difficulty summary.
pub fn announcement(
    snapshot: &RecordSnapshot,
    puzzle: PuzzleType,
    date: NaiveDate,
    rating: Option<&RatingSnapshot>,
    settings: AnnounceSettings,
) -> Announcement {
    let board = Leaderboard::new(snapshot, puzzle);
    let today = board.winners(date);
    let yesterday = date
        .checked_sub_days(Days::new(1))
        .map(|d| board.winners(d))
        .unwrap_or_default();

    let still_winning: BTreeSet<&UserId> = today.intersection(&yesterday).collect();
    let live = board.current_win_streaks(date);
    let streaks: Vec<StreakingUser> = live
        .into_iter()
        .filter(|(user, _)| still_winning.contains(user))
        .filter_map(|(user, records)| {
            Some(StreakingUser {
                since: records.first()?.date,
                length: records.len(),
                user,
            })
        })
        .collect();

    let streaking: BTreeSet<&str> = streaks.iter().map(|s| s.user.as_str()).collect();
    let winners_today = today
        .iter()
        .filter(|u| !streaking.contains(u.as_str()))
        .cloned()
        .collect();

    let rating = rating.filter(|r| r.puzzle == puzzle);
    Announcement {
        puzzle,
        date,
        winning_time: board.winning_time(date),
        streaks,
        winners_today,
        winners_yesterday: yesterday.into_iter().collect(),
        overperformers: rating
            .map(|r| overperformers(r, date, settings.overperformers))
            .unwrap_or_default(),
        difficulty: rating.and_then(|r| difficulty_summary(r, date)),
    }
}
