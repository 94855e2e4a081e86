//! Latent skill and difficulty rating.
//!
//! Log-times are explained by a per-user skill, a per-date difficulty, a
//! Saturday multiplier and a beginner learning curve. Sampling is delegated
//! to a [`PosteriorSampler`]; this module prepares the data contract,
//! checks that the sampler converged, and reduces the draws to a
//! [`RatingSnapshot`]. A failed fit returns an error and produces nothing.

pub mod analysis;
pub mod data;
pub mod diagnostics;
pub mod extract;
pub mod job;
pub mod sampler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RatingError, ValidationError};
use crate::records::{PuzzleType, RecordSnapshot};

pub use analysis::{details, selective_play, validate, ModelDetails, ModelValidation};
pub use data::{log_time, ModelData, Observation};
pub use diagnostics::{check_convergence, split_rhat, ConvergenceReport};
pub use extract::{
    drange, DifficultyEstimate, Estimate, Hyperparameters, Limitation, Prediction, RatingSnapshot,
    SkillEstimate,
};
pub use job::{JobOutcome, RatingJob};
pub use sampler::{Draw, DrawsFileSampler, PosteriorSampler, PosteriorSamples, SamplerSettings};

/// Rating settings, see `[rating]` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Times are clamped to `[1, cap_seconds]` before taking the log.
    #[serde(default = "default_cap_seconds")]
    pub cap_seconds: i64,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    #[serde(default = "default_chains")]
    pub chains: usize,
    /// Fits whose worst split R-hat exceeds this are rejected.
    #[serde(default = "default_max_rhat")]
    pub max_rhat: f64,
    #[serde(default = "default_min_draws_per_chain")]
    pub min_draws_per_chain: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_cap_seconds() -> i64 {
    300
}
fn default_iterations() -> usize {
    1000
}
fn default_chains() -> usize {
    4
}
fn default_max_rhat() -> f64 {
    1.1
}
fn default_min_draws_per_chain() -> usize {
    4
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            cap_seconds: default_cap_seconds(),
            iterations: default_iterations(),
            chains: default_chains(),
            max_rhat: default_max_rhat(),
            min_draws_per_chain: default_min_draws_per_chain(),
            seed: None,
        }
    }
}

impl RatingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cap_seconds < 1 {
            return Err(ValidationError::InvalidValue {
                field: "cap_seconds".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.iterations == 0 || self.chains == 0 {
            return Err(ValidationError::InvalidValue {
                field: "iterations".into(),
                message: "iterations and chains must be positive".into(),
            });
        }
        if !(self.max_rhat.is_finite() && self.max_rhat >= 1.0) {
            return Err(ValidationError::InvalidValue {
                field: "max_rhat".into(),
                message: "must be at least 1.0".into(),
            });
        }
        Ok(())
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            iterations: self.iterations,
            chains: self.chains,
            seed: self.seed,
        }
    }
}

/// Fits the rating model for one puzzle type at a time.
#[derive(Debug, Clone, Default)]
pub struct RatingModel {
    config: RatingConfig,
}

impl RatingModel {
    pub fn new(config: RatingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Build the sampler's input from every active record of `puzzle`.
    pub fn prepare(
        &self,
        snapshot: &RecordSnapshot,
        puzzle: PuzzleType,
    ) -> Result<ModelData, RatingError> {
        let data = ModelData::from_records(
            puzzle,
            snapshot.for_puzzle(puzzle),
            self.config.cap_seconds,
            puzzle.profile().saturday_effect,
        );
        if data.observations.is_empty() {
            return Err(RatingError::InsufficientData { observations: 0 });
        }
        Ok(data)
    }

    /// Sample, check, and extract.
    pub fn fit_data(
        &self,
        data: &ModelData,
        sampler: &dyn PosteriorSampler,
        fitted_at: DateTime<Utc>,
    ) -> Result<RatingSnapshot, RatingError> {
        tracing::info!(
            puzzle = %data.puzzle,
            users = data.users.len(),
            dates = data.dates.len(),
            observations = data.observations.len(),
            "fitting rating model"
        );
        let samples = sampler.sample(data, &self.config.sampler_settings())?;
        samples.check_shape(data)?;
        let convergence = check_convergence(
            &samples,
            data,
            self.config.max_rhat,
            self.config.min_draws_per_chain,
        )?;

        let snapshot = extract::extract(data, &samples, convergence, fitted_at);
        for limitation in &snapshot.limitations {
            tracing::warn!(
                puzzle = %data.puzzle,
                ?limitation,
                "effect backed by at most one observation"
            );
        }
        tracing::info!(
            puzzle = %data.puzzle,
            max_rhat = snapshot.convergence.max_rhat,
            log_posterior = snapshot.params.log_posterior,
            "rating model fitted"
        );
        Ok(snapshot)
    }

    pub fn fit(
        &self,
        snapshot: &RecordSnapshot,
        puzzle: PuzzleType,
        sampler: &dyn PosteriorSampler,
        fitted_at: DateTime<Utc>,
    ) -> Result<RatingSnapshot, RatingError> {
        let data = self.prepare(snapshot, puzzle)?;
        self.fit_data(&data, sampler, fitted_at)
    }
}
