//! Normalized, smoothed performance scores.
//!
//! Each day's times are turned into outlier-trimmed z-scores (higher is
//! better), then every user's daily scores are run through an exponential
//! moving average and clamped to a display range. The result is a slowly
//! moving "form" line per user, comparable across users and across easy and
//! hard puzzle days.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::records::{TimeRecord, UserId};

/// Scoring settings, see `[scoring]` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Weight of the previous smoothed value, in `[0, 0.95]`.
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    /// Smoothed scores are clamped to `[-display_clamp, display_clamp]`.
    #[serde(default = "default_display_clamp")]
    pub display_clamp: f64,
    /// Raw daily scores are clamped to `[-outlier_clamp, outlier_clamp]`.
    #[serde(default = "default_outlier_clamp")]
    pub outlier_clamp: f64,
    /// Times outside `[Q1 - w*stdev, Q3 + w*stdev]` are trimmed.
    #[serde(default = "default_trim_width")]
    pub trim_width: f64,
    /// A failure counts as this many seconds slower than the day's slowest finish.
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty_seconds: i64,
}

fn default_smoothing() -> f64 {
    0.6
}
fn default_display_clamp() -> f64 {
    1.0
}
fn default_outlier_clamp() -> f64 {
    1.5
}
fn default_trim_width() -> f64 {
    1.0
}
fn default_failure_penalty() -> i64 {
    60
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
            display_clamp: default_display_clamp(),
            outlier_clamp: default_outlier_clamp(),
            trim_width: default_trim_width(),
            failure_penalty_seconds: default_failure_penalty(),
        }
    }
}

impl ScoringConfig {
    pub const MAX_SMOOTHING: f64 = 0.95;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=Self::MAX_SMOOTHING).contains(&self.smoothing) {
            return Err(ValidationError::InvalidValue {
                field: "smoothing".into(),
                message: format!("must be between 0 and {}", Self::MAX_SMOOTHING),
            });
        }
        for (field, value) in [
            ("display_clamp", self.display_clamp),
            ("outlier_clamp", self.outlier_clamp),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be a positive number".into(),
                });
            }
        }
        if !(self.trim_width.is_finite() && self.trim_width >= 0.0) {
            return Err(ValidationError::InvalidValue {
                field: "trim_width".into(),
                message: "must be non-negative".into(),
            });
        }
        if self.failure_penalty_seconds < 0 {
            return Err(ValidationError::InvalidValue {
                field: "failure_penalty_seconds".into(),
                message: "must be non-negative".into(),
            });
        }
        Ok(())
    }
}

/// Raw scores for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DayScores {
    /// Regular day.
    Scored {
        mean: f64,
        stdev: f64,
        /// Number of times left after trimming.
        kept: usize,
        scores: BTreeMap<UserId, f64>,
    },
    /// Every remaining time was identical; everyone scores 0.
    ZeroVariance { scores: BTreeMap<UserId, f64> },
    /// Nobody finished; the day is left out of smoothing.
    AllFailed,
}

impl DayScores {
    pub fn scores(&self) -> Option<&BTreeMap<UserId, f64>> {
        match self {
            DayScores::Scored { scores, .. } | DayScores::ZeroVariance { scores } => Some(scores),
            DayScores::AllFailed => None,
        }
    }
}

/// Linear-interpolated percentile of sorted data, `p` in `[0, 1]`.
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn pstdev(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Score every user's time on a single date.
///
/// `records` must all share one date; the caller groups them.
pub fn score_day<'a, I>(records: I, config: &ScoringConfig) -> DayScores
where
    I: IntoIterator<Item = &'a TimeRecord>,
{
    let records: Vec<&TimeRecord> = records.into_iter().collect();
    let Some(worst) = records.iter().filter(|r| !r.is_fail()).map(|r| r.seconds).max() else {
        return DayScores::AllFailed;
    };
    let penalized = worst + config.failure_penalty_seconds;

    let times: Vec<(&UserId, f64)> = records
        .iter()
        .map(|r| {
            let t = if r.is_fail() { penalized } else { r.seconds };
            (&r.user_id, t as f64)
        })
        .collect();

    let mut sorted: Vec<f64> = times.iter().map(|(_, t)| *t).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let spread = pstdev(&sorted, mean(&sorted)) * config.trim_width;
    let (lo, hi) = (q1 - spread, q3 + spread);

    let mut kept: Vec<f64> = sorted.iter().copied().filter(|t| *t >= lo && *t <= hi).collect();
    if kept.is_empty() {
        kept = sorted;
    }
    let day_mean = mean(&kept);
    let day_stdev = pstdev(&kept, day_mean);

    if day_stdev == 0.0 {
        return DayScores::ZeroVariance {
            scores: times.iter().map(|(u, _)| ((*u).clone(), 0.0)).collect(),
        };
    }

    let max = config.outlier_clamp;
    let scores = times
        .iter()
        .map(|(u, t)| ((*u).clone(), ((day_mean - t) / day_stdev).clamp(-max, max)))
        .collect();

    DayScores::Scored {
        mean: day_mean,
        stdev: day_stdev,
        kept: kept.len(),
        scores,
    }
}

/// Raw scores for every date in `records`, date ascending.
pub fn daily_scores<'a, I>(records: I, config: &ScoringConfig) -> BTreeMap<NaiveDate, DayScores>
where
    I: IntoIterator<Item = &'a TimeRecord>,
{
    let mut by_date: BTreeMap<NaiveDate, Vec<&TimeRecord>> = BTreeMap::new();
    for record in records {
        by_date.entry(record.date).or_default().push(record);
    }
    by_date
        .into_iter()
        .map(|(date, day)| {
            let scored = score_day(day, config);
            match &scored {
                DayScores::AllFailed => {
                    tracing::debug!(%date, "every attempt failed; day excluded")
                }
                DayScores::ZeroVariance { .. } => tracing::debug!(%date, "zero variance day"),
                DayScores::Scored { .. } => {}
            }
            (date, scored)
        })
        .collect()
}

/// Smoothed score series per user, date ascending.
pub type NormalizedSeries = BTreeMap<UserId, Vec<(NaiveDate, f64)>>;

/// Smooth per-user daily scores with an exponential moving average.
///
/// Each user's series starts at their first raw score. Only dates on which
/// the user has a score contribute, and only those dates appear in the
/// output.
pub fn smooth(days: &BTreeMap<NaiveDate, DayScores>, config: &ScoringConfig) -> NormalizedSeries {
    let mut running: BTreeMap<&UserId, f64> = BTreeMap::new();
    let mut out = NormalizedSeries::new();
    let clamp = config.display_clamp;

    for (date, day) in days {
        let Some(scores) = day.scores() else {
            continue;
        };
        for (user, raw) in scores {
            let next = match running.get(user) {
                Some(prev) => config.smoothing * prev + (1.0 - config.smoothing) * raw,
                None => *raw,
            };
            running.insert(user, next);
            out.entry(user.clone())
                .or_default()
                .push((*date, next.clamp(-clamp, clamp)));
        }
    }
    out
}

/// Full pipeline: per-day trimmed z-scores, then smoothing.
///
/// `records` should be one puzzle type's active records over the plotted
/// date range.
pub fn normalized_scores<'a, I>(
    records: I,
    config: &ScoringConfig,
) -> Result<NormalizedSeries, ValidationError>
where
    I: IntoIterator<Item = &'a TimeRecord>,
{
    config.validate()?;
    let days = daily_scores(records, config);
    Ok(smooth(&days, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{PuzzleType, FAIL_SECONDS};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 3, d).unwrap()
    }

    fn rec(user: &str, d: u32, seconds: i64) -> TimeRecord {
        TimeRecord::new(user, PuzzleType::MiniCrossword, day(d), seconds, None)
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&data, 0.25) - 1.75).abs() < 1e-12);
        assert!((percentile(&data, 0.75) - 3.25).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 0.5), 7.0);
    }

    #[test]
    fn all_fail_day_is_excluded() {
        let records = vec![rec("a", 1, FAIL_SECONDS), rec("b", 1, FAIL_SECONDS)];
        assert_eq!(score_day(&records, &ScoringConfig::default()), DayScores::AllFailed);
        let series = normalized_scores(&records, &ScoringConfig::default()).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn identical_times_score_zero() {
        let records = vec![rec("a", 1, 40), rec("b", 1, 40)];
        match score_day(&records, &ScoringConfig::default()) {
            DayScores::ZeroVariance { scores } => {
                assert_eq!(scores.len(), 2);
                assert!(scores.values().all(|s| *s == 0.0));
            }
            other => panic!("expected zero variance, got {other:?}"),
        }
    }

    #[test]
    fn failure_is_scored_below_the_slowest_finisher() {
        let records = vec![
            rec("a", 1, 30),
            rec("b", 1, 40),
            rec("c", 1, 50),
            rec("d", 1, FAIL_SECONDS),
        ];
        let scored = score_day(&records, &ScoringConfig::default());
        let scores = scored.scores().unwrap();
        assert!(scores["d"] < scores["c"]);
        assert!(scores["a"] > scores["b"]);
    }

    #[test]
    fn outlier_does_not_shift_baseline() {
        let config = ScoringConfig::default();
        let records = vec![
            rec("a", 1, 30),
            rec("b", 1, 32),
            rec("c", 1, 34),
            rec("d", 1, 36),
            rec("e", 1, 600),
        ];
        match score_day(&records, &config) {
            DayScores::Scored { mean, kept, scores, .. } => {
                assert_eq!(kept, 4);
                assert!((mean - 33.0).abs() < 1e-9);
                assert_eq!(scores["e"], -config.outlier_clamp);
            }
            other => panic!("expected scored day, got {other:?}"),
        }
    }

    #[test]
    fn smoothing_seeds_with_first_score_and_clamps() {
        let config = ScoringConfig {
            smoothing: 0.5,
            display_clamp: 1.0,
            ..ScoringConfig::default()
        };
        let mut days = BTreeMap::new();
        let mk = |v: f64| DayScores::Scored {
            mean: 0.0,
            stdev: 1.0,
            kept: 1,
            scores: BTreeMap::from([("a".to_string(), v)]),
        };
        days.insert(day(1), mk(1.5));
        days.insert(day(2), DayScores::AllFailed);
        days.insert(day(3), mk(-0.5));
        let series = smooth(&days, &config);
        let a = &series["a"];
        assert_eq!(a.len(), 2);
        assert_eq!(a[0], (day(1), 1.0));
        assert_eq!(a[1].0, day(3));
        assert!((a[1].1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_out_of_range_smoothing() {
        let config = ScoringConfig {
            smoothing: 0.99,
            ..ScoringConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
