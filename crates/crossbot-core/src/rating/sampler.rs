//! Posterior sampling capability.
//!
//! The rating model never samples by itself. A [`PosteriorSampler`] receives
//! the [`ModelData`] contract and returns posterior draws of every parameter:
//!
//! ```text
//! log_seconds ~ Normal(mu + skill[user] + difficulty[date]
//!                      + saturday_multiplier * saturday
//!                      + beginner_gain * exp(-nth / beginner_decay), sigma)
//! skill[u]      ~ Normal(0, skill_dev)
//! difficulty[d] ~ Normal(0, date_dev)
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data::{ModelData, Observation};
use crate::error::RatingError;

/// One posterior draw of every model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub mu: f64,
    #[serde(default)]
    pub saturday_multiplier: f64,
    pub beginner_gain: f64,
    pub beginner_decay: f64,
    pub skill_dev: f64,
    pub date_dev: f64,
    pub sigma: f64,
    #[serde(default)]
    pub log_posterior: f64,
    /// Indexed like [`ModelData::users`].
    pub skill: Vec<f64>,
    /// Indexed like [`ModelData::dates`].
    pub difficulty: Vec<f64>,
}

impl Draw {
    /// Predicted log-seconds for `obs` under this draw.
    pub fn predict(&self, obs: &Observation) -> f64 {
        let saturday = if obs.saturday {
            self.saturday_multiplier
        } else {
            0.0
        };
        let beginner = self.beginner_gain * (-(obs.nth as f64) / self.beginner_decay).exp();
        self.mu + self.skill[obs.user] + self.difficulty[obs.date] + saturday + beginner
    }

    /// Standardized residual of `obs` under this draw.
    pub fn residual(&self, obs: &Observation) -> f64 {
        (obs.log_seconds - self.predict(obs)) / self.sigma
    }
}

/// Posterior draws grouped by chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSamples {
    pub chains: Vec<Vec<Draw>>,
    /// [`ModelData::fingerprint`] of the data the draws were fitted against.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl PosteriorSamples {
    /// All draws across chains.
    pub fn draws(&self) -> impl Iterator<Item = &Draw> {
        self.chains.iter().flatten()
    }

    pub fn num_draws(&self) -> usize {
        self.chains.iter().map(Vec::len).sum()
    }

    /// Check every draw against the data contract.
    ///
    /// Draws that carry a fingerprint must have been fitted against exactly
    /// `data`; equal lengths alone do not mean the indexes line up.
    pub fn check_shape(&self, data: &ModelData) -> Result<(), RatingError> {
        if let Some(fitted) = &self.fingerprint {
            let current = data.fingerprint();
            if *fitted != current {
                return Err(RatingError::StaleDraws {
                    expected: current,
                    actual: fitted.clone(),
                });
            }
        }
        let Some(first) = self.chains.first() else {
            return Err(RatingError::TooFewDraws {
                required: 1,
                actual: 0,
            });
        };
        for chain in &self.chains {
            if chain.len() != first.len() {
                return Err(RatingError::ShapeMismatch {
                    parameter: "draws per chain".into(),
                    expected: first.len(),
                    actual: chain.len(),
                });
            }
        }
        for draw in self.draws() {
            if draw.skill.len() != data.users.len() {
                return Err(RatingError::ShapeMismatch {
                    parameter: "skill".into(),
                    expected: data.users.len(),
                    actual: draw.skill.len(),
                });
            }
            if draw.difficulty.len() != data.dates.len() {
                return Err(RatingError::ShapeMismatch {
                    parameter: "difficulty".into(),
                    expected: data.dates.len(),
                    actual: draw.difficulty.len(),
                });
            }
        }
        Ok(())
    }
}

/// Settings forwarded to the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerSettings {
    pub iterations: usize,
    pub chains: usize,
    pub seed: Option<u64>,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            iterations: 1000,
            chains: 4,
            seed: None,
        }
    }
}

/// Something that can draw from the rating model's posterior.
pub trait PosteriorSampler {
    fn sample(
        &self,
        data: &ModelData,
        settings: &SamplerSettings,
    ) -> Result<PosteriorSamples, RatingError>;
}

/// Reads draws that an external engine already produced.
///
/// The file holds a JSON-encoded [`PosteriorSamples`] fitted against the
/// contract exported by `crossbot model export`.
#[derive(Debug, Clone)]
pub struct DrawsFileSampler {
    path: PathBuf,
}

impl DrawsFileSampler {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PosteriorSampler for DrawsFileSampler {
    fn sample(
        &self,
        data: &ModelData,
        settings: &SamplerSettings,
    ) -> Result<PosteriorSamples, RatingError> {
        let content = std::fs::read_to_string(&self.path)?;
        let samples: PosteriorSamples = serde_json::from_str(&content)?;
        let Some(fitted) = samples.fingerprint.as_deref() else {
            return Err(RatingError::Sampler(format!(
                "{} has no data fingerprint; fit the draws against `crossbot model export`",
                self.path.display()
            )));
        };
        let current = data.fingerprint();
        if fitted != current {
            return Err(RatingError::StaleDraws {
                expected: current,
                actual: fitted.to_string(),
            });
        }
        if samples.chains.len() != settings.chains {
            tracing::warn!(
                expected = settings.chains,
                actual = samples.chains.len(),
                path = %self.path.display(),
                "draw file has a different chain count than configured"
            );
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PuzzleType;

    fn draw(users: usize, dates: usize) -> Draw {
        Draw {
            mu: 4.0,
            saturday_multiplier: 0.5,
            beginner_gain: 1.0,
            beginner_decay: 2.0,
            skill_dev: 0.3,
            date_dev: 0.2,
            sigma: 0.5,
            log_posterior: -10.0,
            skill: vec![0.1; users],
            difficulty: vec![-0.2; dates],
        }
    }

    fn data(users: usize, dates: usize) -> ModelData {
        ModelData {
            puzzle: PuzzleType::MiniCrossword,
            cap_seconds: 300,
            saturday_effect: true,
            users: (0..users).map(|i| format!("u{i}")).collect(),
            dates: (0..dates)
                .map(|i| chrono::NaiveDate::from_ymd_opt(2018, 1, 1 + i as u32).unwrap())
                .collect(),
            observations: Vec::new(),
        }
    }

    #[test]
    fn predict_adds_every_term() {
        let d = draw(1, 1);
        let obs = Observation {
            user: 0,
            date: 0,
            saturday: true,
            nth: 2,
            seconds: 60,
            log_seconds: 4.0,
        };
        let expected = 4.0 + 0.1 - 0.2 + 0.5 + (-1.0f64).exp();
        assert!((d.predict(&obs) - expected).abs() < 1e-12);
        assert!((d.residual(&obs) - (4.0 - expected) / 0.5).abs() < 1e-12);
    }

    #[test]
    fn shape_check_catches_wrong_lengths() {
        let samples = PosteriorSamples {
            chains: vec![vec![draw(2, 3)]],
            fingerprint: None,
        };
        assert!(samples.check_shape(&data(2, 3)).is_ok());
        assert!(matches!(
            samples.check_shape(&data(3, 3)),
            Err(RatingError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            PosteriorSamples::default().check_shape(&data(1, 1)),
            Err(RatingError::TooFewDraws { .. })
        ));
    }

    #[test]
    fn draws_for_other_data_are_stale() {
        let exported = data(2, 3);
        let mut current = data(2, 3);
        current.users[1] = "u9".into();
        let samples = PosteriorSamples {
            chains: vec![vec![draw(2, 3)]],
            fingerprint: Some(exported.fingerprint()),
        };
        assert!(samples.check_shape(&exported).is_ok());
        assert!(matches!(
            samples.check_shape(&current),
            Err(RatingError::StaleDraws { .. })
        ));
    }

    #[test]
    fn draws_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draws.json");
        let samples = PosteriorSamples {
            chains: vec![vec![draw(1, 1)], vec![draw(1, 1)]],
            fingerprint: Some(data(1, 1).fingerprint()),
        };
        std::fs::write(&path, serde_json::to_string(&samples).unwrap()).unwrap();
        let loaded = DrawsFileSampler::new(&path)
            .sample(&data(1, 1), &SamplerSettings::default())
            .unwrap();
        assert_eq!(loaded, samples);
    }

    #[test]
    fn draws_file_must_name_its_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draws.json");
        let mut samples = PosteriorSamples {
            chains: vec![vec![draw(1, 1)]],
            fingerprint: None,
        };
        std::fs::write(&path, serde_json::to_string(&samples).unwrap()).unwrap();
        let sampler = DrawsFileSampler::new(&path);
        let settings = SamplerSettings::default();
        assert!(matches!(
            sampler.sample(&data(1, 1), &settings),
            Err(RatingError::Sampler(_))
        ));

        samples.fingerprint = Some(data(1, 2).fingerprint());
        std::fs::write(&path, serde_json::to_string(&samples).unwrap()).unwrap();
        assert!(matches!(
            sampler.sample(&data(1, 1), &settings),
            Err(RatingError::StaleDraws { .. })
        ));
    }
}
