//! Reduce posterior draws to point estimates and error bars.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::data::ModelData;
use super::diagnostics::ConvergenceReport;
use super::sampler::{Draw, PosteriorSamples};
use crate::records::{PuzzleType, UserId};

/// Posterior mean with asymmetric error bars.
///
/// `p25` and `p75` are distances from the mean, not absolute quantiles:
/// the interval is `[mean - p25, mean + p75]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub mean: f64,
    pub p25: f64,
    pub p75: f64,
}

impl Estimate {
    pub fn lower(&self) -> f64 {
        self.mean - self.p25
    }

    pub fn upper(&self) -> f64 {
        self.mean + self.p75
    }
}

/// Sort the samples and report mean plus the distances to the 25th and
/// 75th percentile values.
pub fn drange(mut samples: Vec<f64>) -> Estimate {
    if samples.is_empty() {
        return Estimate::default();
    }
    samples.sort_by(f64::total_cmp);
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    Estimate {
        mean,
        p25: mean - samples[n / 4],
        p75: samples[(3 * n / 4).min(n - 1)] - mean,
    }
}

/// Global parameters of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub mu: Estimate,
    pub saturday_multiplier: Estimate,
    pub beginner_gain: Estimate,
    pub beginner_decay: Estimate,
    pub skill_dev: Estimate,
    pub date_dev: Estimate,
    pub sigma: Estimate,
    /// Mean log posterior density across draws.
    pub log_posterior: f64,
    pub fitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillEstimate {
    pub user: UserId,
    pub observations: usize,
    pub estimate: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyEstimate {
    pub date: NaiveDate,
    pub observations: usize,
    pub estimate: Estimate,
}

/// Posterior-averaged prediction for one observed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub user: UserId,
    pub date: NaiveDate,
    pub log_seconds: f64,
    pub predicted_log_seconds: f64,
    /// `(actual - predicted) / sigma`, averaged over draws.
    pub residual: f64,
}

/// Effects the data cannot identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Limitation {
    ThinUser { user: UserId, observations: usize },
    ThinDate { date: NaiveDate, observations: usize },
}

/// Complete output of one fit. Replaces any earlier snapshot of the same
/// puzzle type wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub id: Uuid,
    pub puzzle: PuzzleType,
    pub data_fingerprint: String,
    pub params: Hyperparameters,
    pub skills: Vec<SkillEstimate>,
    pub difficulties: Vec<DifficultyEstimate>,
    pub predictions: Vec<Prediction>,
    pub convergence: ConvergenceReport,
    pub limitations: Vec<Limitation>,
}

impl RatingSnapshot {
    pub fn skill(&self, user: &str) -> Option<&SkillEstimate> {
        self.skills.iter().find(|s| s.user == user)
    }

    pub fn difficulty(&self, date: NaiveDate) -> Option<&DifficultyEstimate> {
        self.difficulties.iter().find(|d| d.date == date)
    }

    pub fn predictions_on(&self, date: NaiveDate) -> impl Iterator<Item = &Prediction> {
        self.predictions.iter().filter(move |p| p.date == date)
    }
}

fn collect(samples: &PosteriorSamples, get: impl Fn(&Draw) -> f64) -> Estimate {
    drange(samples.draws().map(get).collect())
}

/// Users and dates backed by at most one observation.
pub fn limitations(data: &ModelData) -> Vec<Limitation> {
    let mut out = Vec::new();
    for (user, &observations) in data.users.iter().zip(&data.observations_per_user()) {
        if observations <= 1 {
            out.push(Limitation::ThinUser {
                user: user.clone(),
                observations,
            });
        }
    }
    for (&date, &observations) in data.dates.iter().zip(&data.observations_per_date()) {
        if observations <= 1 {
            out.push(Limitation::ThinDate { date, observations });
        }
    }
    out
}

/// Name-based id, so refitting the same data at the same instant yields the
/// same snapshot.
fn snapshot_id(fingerprint: &str, fitted_at: DateTime<Utc>) -> Uuid {
    let name = format!("{fingerprint}@{}", fitted_at.to_rfc3339());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// Build the snapshot. `samples` must match `data` in shape.
pub fn extract(
    data: &ModelData,
    samples: &PosteriorSamples,
    convergence: ConvergenceReport,
    fitted_at: DateTime<Utc>,
) -> RatingSnapshot {
    let num_draws = samples.num_draws().max(1) as f64;
    let log_posterior = samples.draws().map(|d| d.log_posterior).sum::<f64>() / num_draws;

    let params = Hyperparameters {
        mu: collect(samples, |d| d.mu),
        saturday_multiplier: if data.saturday_effect {
            collect(samples, |d| d.saturday_multiplier)
        } else {
            Estimate::default()
        },
        beginner_gain: collect(samples, |d| d.beginner_gain),
        beginner_decay: collect(samples, |d| d.beginner_decay),
        skill_dev: collect(samples, |d| d.skill_dev),
        date_dev: collect(samples, |d| d.date_dev),
        sigma: collect(samples, |d| d.sigma),
        log_posterior,
        fitted_at,
    };

    let per_user = data.observations_per_user();
    let skills = data
        .users
        .iter()
        .enumerate()
        .map(|(i, user)| SkillEstimate {
            user: user.clone(),
            observations: per_user[i],
            estimate: collect(samples, |d| d.skill[i]),
        })
        .collect();

    let per_date = data.observations_per_date();
    let difficulties = data
        .dates
        .iter()
        .enumerate()
        .map(|(i, &date)| DifficultyEstimate {
            date,
            observations: per_date[i],
            estimate: collect(samples, |d| d.difficulty[i]),
        })
        .collect();

    let predictions = data
        .observations
        .iter()
        .map(|obs| {
            let (predicted, residual) = samples
                .draws()
                .fold((0.0, 0.0), |(p, r), d| (p + d.predict(obs), r + d.residual(obs)));
            Prediction {
                user: data.users[obs.user].clone(),
                date: data.dates[obs.date],
                log_seconds: obs.log_seconds,
                predicted_log_seconds: predicted / num_draws,
                residual: residual / num_draws,
            }
        })
        .collect();

    let data_fingerprint = data.fingerprint();
    RatingSnapshot {
        id: snapshot_id(&data_fingerprint, fitted_at),
        puzzle: data.puzzle,
        data_fingerprint,
        params,
        skills,
        difficulties,
        predictions,
        convergence,
        limitations: limitations(data),
    }
}
