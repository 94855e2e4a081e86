use std::path::PathBuf;

use chrono::Utc;
use clap::Subcommand;
use crossbot_core::rating::{self, DrawsFileSampler, JobOutcome, ModelData, RatingSnapshot};
use crossbot_core::{Config, Database, PuzzleType, RatingJob, RatingModel};
use serde_json::json;

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum ModelAction {
    /// Write the sampler input for the current data as JSON
    Export {
        /// Output file, stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fit the model from posterior draws and store the result
    Fit {
        /// JSON file of draws produced against `model export`
        #[arg(long)]
        draws: PathBuf,
        /// Refit even if the data is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Summary of the stored fit
    Details,
    /// Prediction error of the stored fit against the current data
    Validate,
    /// Probability that a user skips harder days
    Selective { user: String },
}

type Fallible<T> = Result<T, Box<dyn std::error::Error>>;

fn stored_rating(db: &Database, puzzle: PuzzleType) -> Fallible<RatingSnapshot> {
    db.load_rating(puzzle)?
        .ok_or_else(|| format!("no stored {puzzle} rating, run `crossbot model fit` first").into())
}

fn current_data(db: &Database, model: &RatingModel, puzzle: PuzzleType) -> Fallible<ModelData> {
    let snapshot = db.snapshot(puzzle)?;
    Ok(model.prepare(&snapshot, puzzle)?)
}

pub fn run(action: ModelAction, puzzle: PuzzleType) -> CmdResult {
    let config = Config::load()?;
    let db = Database::open()?;
    let model = RatingModel::new(config.rating);

    match action {
        ModelAction::Export { out } => {
            let data = current_data(&db, &model, puzzle)?;
            let fingerprint = data.fingerprint();
            let mut value = serde_json::to_value(&data)?;
            if let Some(fields) = value.as_object_mut() {
                fields.insert("fingerprint".into(), fingerprint.clone().into());
            }
            let json = serde_json::to_string_pretty(&value)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(path = %path.display(), %fingerprint, "exported model data");
                }
                None => println!("{json}"),
            }
        }
        ModelAction::Fit { draws, force } => {
            let sampler = DrawsFileSampler::new(draws);
            let outcome = RatingJob::new(&db, config.rating)
                .with_force(force)
                .run(puzzle, &sampler, Utc::now())?;
            match outcome {
                JobOutcome::Fitted(rating) => print_json(&rating::details(&rating))?,
                JobOutcome::Skipped { fingerprint } => {
                    print_json(&json!({ "status": "skipped", "fingerprint": fingerprint }))?
                }
            }
        }
        ModelAction::Details => {
            let rating = stored_rating(&db, puzzle)?;
            print_json(&rating::details(&rating))?;
        }
        ModelAction::Validate => {
            let rating = stored_rating(&db, puzzle)?;
            let data = current_data(&db, &model, puzzle)?;
            let validation = rating::validate(&data, &rating)
                .ok_or("none of the current times can be predicted by the stored fit")?;
            print_json(&json!({
                "observations": validation.observations,
                "model_mse": validation.model_mse,
                "baseline_mse": validation.baseline_mse,
                "beats_baseline": validation.beats_baseline(),
            }))?;
        }
        ModelAction::Selective { user } => {
            let rating = stored_rating(&db, puzzle)?;
            let data = current_data(&db, &model, puzzle)?;
            let probability = rating::selective_play(&data, &rating, &user);
            print_json(&json!({ "user": user, "probability": probability }))?;
        }
    }
    Ok(())
}
