//! Reports over a stored fit: prediction error, fit details, and
//! selective-play detection.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::data::{ModelData, Observation};
use super::extract::RatingSnapshot;
use crate::records::PuzzleType;

/// Skipping runs longer than this many dates are treated as absence, not
/// avoidance.
pub const MAX_SKIP_RUN: usize = 7;

/// Mean squared prediction error against the unconditional baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelValidation {
    pub observations: usize,
    /// Mean squared error of the model's log-time predictions.
    pub model_mse: f64,
    /// Population variance of the log-times around their mean.
    pub baseline_mse: f64,
}

impl ModelValidation {
    /// Whether the model explains more than the mean alone.
    pub fn beats_baseline(&self) -> bool {
        self.model_mse < self.baseline_mse
    }
}

/// Point prediction from the posterior means, for observations the fit
/// never saw. `None` when the user or date is unknown to the fit.
pub fn point_prediction(
    rating: &RatingSnapshot,
    data: &ModelData,
    obs: &Observation,
) -> Option<f64> {
    let p = &rating.params;
    let skill = rating.skill(data.users.get(obs.user)?)?.estimate.mean;
    let difficulty = rating.difficulty(*data.dates.get(obs.date)?)?.estimate.mean;
    let saturday = if obs.saturday {
        p.saturday_multiplier.mean
    } else {
        0.0
    };
    let decay = p.beginner_decay.mean;
    let beginner = if decay > 0.0 {
        p.beginner_gain.mean * (-(obs.nth as f64) / decay).exp()
    } else {
        0.0
    };
    Some(p.mu.mean + skill + difficulty + saturday + beginner)
}

/// Compare the fit's predictions with the observed log-times in `data`.
///
/// Observations the fit predicted directly use the stored prediction; the
/// rest fall back to [`point_prediction`]. Returns `None` when nothing in
/// `data` can be predicted.
pub fn validate(data: &ModelData, rating: &RatingSnapshot) -> Option<ModelValidation> {
    let stored: BTreeMap<(&str, NaiveDate), f64> = rating
        .predictions
        .iter()
        .map(|p| ((p.user.as_str(), p.date), p.predicted_log_seconds))
        .collect();

    let pairs: Vec<(f64, f64)> = data
        .observations
        .iter()
        .filter_map(|obs| {
            let key = (data.users[obs.user].as_str(), data.dates[obs.date]);
            let predicted = match stored.get(&key) {
                Some(&p) => p,
                None => point_prediction(rating, data, obs)?,
            };
            Some((obs.log_seconds, predicted))
        })
        .collect();
    if pairs.is_empty() {
        return None;
    }

    let n = pairs.len() as f64;
    let avg = pairs.iter().map(|(actual, _)| actual).sum::<f64>() / n;
    Some(ModelValidation {
        observations: pairs.len(),
        model_mse: pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / n,
        baseline_mse: pairs.iter().map(|(a, _)| (a - avg).powi(2)).sum::<f64>() / n,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    pub puzzle: PuzzleType,
    pub fitted_at: DateTime<Utc>,
    pub log_posterior: f64,
    pub users: usize,
    pub dates: usize,
    pub observations: usize,
    pub max_rhat: f64,
    pub limitations: usize,
}

pub fn details(rating: &RatingSnapshot) -> ModelDetails {
    ModelDetails {
        puzzle: rating.puzzle,
        fitted_at: rating.params.fitted_at,
        log_posterior: rating.params.log_posterior,
        users: rating.skills.len(),
        dates: rating.difficulties.len(),
        observations: rating.predictions.len(),
        max_rhat: rating.convergence.max_rhat,
        limitations: rating.limitations.len(),
    }
}

/// Dates strictly between the user's first and last play, each tagged
/// with whether the user played it. Dates deeper than [`MAX_SKIP_RUN`] into
/// a run of skips are left out.
fn active_range(data: &ModelData, user: usize) -> Vec<(NaiveDate, bool)> {
    let played: BTreeSet<NaiveDate> = data
        .observations
        .iter()
        .filter(|o| o.user == user)
        .map(|o| data.dates[o.date])
        .collect();
    let (Some(&first), Some(&last)) = (played.first(), played.last()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut since_played = 0;
    for &date in data.dates.iter().filter(|&&d| first < d && d < last) {
        let did_play = played.contains(&date);
        since_played = if did_play { 0 } else { since_played + 1 };
        if since_played <= MAX_SKIP_RUN {
            out.push((date, did_play));
        }
    }
    out
}

fn standard_normal_cdf(z: f64) -> f64 {
    (libm::erf(z / std::f64::consts::SQRT_2) + 1.0) / 2.0
}

/// Probability that `user` skips days that are harder than the days they
/// play.
///
/// Compares the mean fitted difficulty of skipped and played dates as a
/// z-score with `date_dev` as the per-date spread. `None` when the user is
/// unknown, never skipped, never played inside their range, or the fit has
/// no date spread.
pub fn selective_play(data: &ModelData, rating: &RatingSnapshot, user: &str) -> Option<f64> {
    let index = data.user_index(user)?;
    let mut played = Vec::new();
    let mut skipped = Vec::new();
    for (date, did_play) in active_range(data, index) {
        let difficulty = rating.difficulty(date)?.estimate.mean;
        if did_play {
            played.push(difficulty);
        } else {
            skipped.push(difficulty);
        }
    }
    let date_dev = rating.params.date_dev.mean;
    if played.is_empty() || skipped.is_empty() || date_dev <= 0.0 {
        return None;
    }

    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let diff = mean(&skipped) - mean(&played);
    let var = date_dev.powi(2);
    let z = diff / (var / played.len() as f64 + var / skipped.len() as f64).sqrt();
    Some(standard_normal_cdf(z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::diagnostics::ConvergenceReport;
    use crate::rating::extract::{
        DifficultyEstimate, Estimate, Hyperparameters, Prediction, SkillEstimate,
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 3, d).unwrap()
    }

    fn est(mean: f64) -> Estimate {
        Estimate {
            mean,
            p25: 0.1,
            p75: 0.1,
        }
    }

    fn obs(user: usize, date: usize, log_seconds: f64) -> Observation {
        Observation {
            user,
            date,
            saturday: false,
            nth: 1,
            seconds: log_seconds.exp() as i64,
            log_seconds,
        }
    }

    fn rating(difficulties: &[f64], predictions: Vec<Prediction>) -> RatingSnapshot {
        RatingSnapshot {
            id: uuid::Uuid::nil(),
            puzzle: PuzzleType::MiniCrossword,
            data_fingerprint: String::new(),
            params: Hyperparameters {
                mu: est(3.0),
                saturday_multiplier: est(0.0),
                beginner_gain: est(0.0),
                beginner_decay: est(1.0),
                skill_dev: est(0.5),
                date_dev: est(0.5),
                sigma: est(0.3),
                log_posterior: -12.5,
                fitted_at: Utc::now(),
            },
            skills: vec![
                SkillEstimate { user: "amy".into(), observations: 3, estimate: est(0.0) },
                SkillEstimate { user: "bo".into(), observations: 3, estimate: est(0.5) },
            ],
            difficulties: difficulties
                .iter()
                .enumerate()
                .map(|(i, &d)| DifficultyEstimate {
                    date: day(i as u32 + 1),
                    observations: 2,
                    estimate: est(d),
                })
                .collect(),
            predictions,
            convergence: ConvergenceReport {
                max_rhat: 1.01,
                worst_parameter: "mu".into(),
                chains: 4,
                draws_per_chain: 100,
            },
            limitations: Vec::new(),
        }
    }

    fn data(observations: Vec<Observation>, dates: usize) -> ModelData {
        ModelData {
            puzzle: PuzzleType::MiniCrossword,
            cap_seconds: 300,
            saturday_effect: true,
            users: vec!["amy".into(), "bo".into()],
            dates: (1..=dates as u32).map(day).collect(),
            observations,
        }
    }

    #[test]
    fn validate_uses_stored_then_point_predictions() {
        let data = data(vec![obs(0, 0, 3.0), obs(1, 1, 4.0)], 2);
        let fit = rating(
            &[0.0, 0.0],
            vec![Prediction {
                user: "amy".into(),
                date: day(1),
                log_seconds: 3.0,
                predicted_log_seconds: 3.0,
                residual: 0.0,
            }],
        );
        let v = validate(&data, &fit).unwrap();
        // bo on day 2 is predicted from means: 3.0 + 0.5 + 0.0.
        assert_eq!(v.observations, 2);
        assert!((v.model_mse - 0.125).abs() < 1e-12);
        assert!((v.baseline_mse - 0.25).abs() < 1e-12);
        assert!(v.beats_baseline());
    }

    #[test]
    fn validate_with_nothing_predictable_is_none() {
        let data = data(vec![obs(0, 0, 3.0)], 1);
        assert!(validate(&data, &rating(&[], Vec::new())).is_none());
    }

    #[test]
    fn details_summarize_the_fit() {
        let fit = rating(&[0.1, 0.2, 0.3], Vec::new());
        let d = details(&fit);
        assert_eq!(d.dates, 3);
        assert_eq!(d.users, 2);
        assert_eq!(d.log_posterior, -12.5);
    }

    #[test]
    fn skipping_hard_days_scores_high() {
        // amy plays the easy odd days and skips the hard even ones.
        let difficulties = [-0.5, 1.0, -0.5, 1.0, -0.5, 1.0, -0.5];
        let observations = (0..7).filter(|i| i % 2 == 0).map(|i| obs(0, i, 3.0)).collect();
        let data = data(observations, 7);
        let fit = rating(&difficulties, Vec::new());
        let p = selective_play(&data, &fit, "amy").unwrap();
        assert!(p > 0.99, "p = {p}");
    }

    #[test]
    fn selective_play_needs_skips() {
        let observations = (0..3).map(|i| obs(0, i, 3.0)).collect();
        let data = data(observations, 3);
        let fit = rating(&[0.0, 0.0, 0.0], Vec::new());
        assert_eq!(selective_play(&data, &fit, "amy"), None);
        assert_eq!(selective_play(&data, &fit, "nobody"), None);
    }

    #[test]
    fn long_absences_are_ignored() {
        // Played day 1 and day 12; only the first 7 skipped days count.
        let data = data(vec![obs(0, 0, 3.0), obs(0, 11, 3.0)], 12);
        let range = active_range(&data, 0);
        assert_eq!(range.len(), MAX_SKIP_RUN);
        assert!(range.iter().all(|(_, played)| !played));
    }
}
