//! Scheduled refit of the stored rating.

use chrono::{DateTime, Utc};

use super::extract::RatingSnapshot;
use super::sampler::PosteriorSampler;
use super::{RatingConfig, RatingModel};
use crate::error::Result;
use crate::records::PuzzleType;
use crate::storage::Database;

/// What a job run did.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// A new rating was fitted and stored.
    Fitted(Box<RatingSnapshot>),
    /// The stored rating was fitted on identical data.
    Skipped { fingerprint: String },
}

/// Snapshot the store, fit, and atomically replace the stored rating.
///
/// Any failure leaves the previously stored rating untouched.
pub struct RatingJob<'a> {
    db: &'a Database,
    model: RatingModel,
    force: bool,
}

impl<'a> RatingJob<'a> {
    pub fn new(db: &'a Database, config: RatingConfig) -> Self {
        Self {
            db,
            model: RatingModel::new(config),
            force: false,
        }
    }

    /// Refit even when the data has not changed.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn run(
        &self,
        puzzle: PuzzleType,
        sampler: &dyn PosteriorSampler,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let snapshot = self.db.snapshot(puzzle)?;
        let data = self.model.prepare(&snapshot, puzzle)?;
        let fingerprint = data.fingerprint();

        let stored = self.db.rating_fingerprint(puzzle)?;
        if !self.force && stored.as_deref() == Some(fingerprint.as_str()) {
            tracing::info!(%puzzle, %fingerprint, "data unchanged, skipping refit");
            return Ok(JobOutcome::Skipped { fingerprint });
        }

        let rating = match self.model.fit_data(&data, sampler, now) {
            Ok(rating) => rating,
            Err(e) => {
                tracing::warn!(%puzzle, error = %e, "rating fit failed, keeping stored rating");
                return Err(e.into());
            }
        };
        self.db.replace_rating(&rating)?;
        Ok(JobOutcome::Fitted(Box::new(rating)))
    }
}
