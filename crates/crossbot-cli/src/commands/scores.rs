use chrono::NaiveDate;
use crossbot_core::{normalized_scores, Config, Database, PuzzleType};

use super::{print_json, today, CmdResult};

pub fn run(
    puzzle: PuzzleType,
    start: NaiveDate,
    end: Option<NaiveDate>,
    smooth: Option<f64>,
) -> CmdResult {
    let mut scoring = Config::load()?.scoring;
    if let Some(smoothing) = smooth {
        scoring.smoothing = smoothing;
    }
    let snapshot = Database::open()?.snapshot(puzzle)?;
    let records = snapshot.between(puzzle, start, end.unwrap_or_else(today))?;
    print_json(&normalized_scores(records, &scoring)?)
}
