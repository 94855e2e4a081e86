use chrono::NaiveDate;
use crossbot_core::{announcement, Config, Database, PuzzleType};

use super::{print_json, today, CmdResult};

pub fn run(puzzle: PuzzleType, date: Option<NaiveDate>) -> CmdResult {
    let settings = Config::load()?.announce;
    let db = Database::open()?;
    let snapshot = db.snapshot(puzzle)?;
    let rating = db.load_rating(puzzle)?;
    let date = date.unwrap_or_else(today);

    let report = announcement(&snapshot, puzzle, date, rating.as_ref(), settings);
    if report.is_quiet() {
        tracing::info!(%puzzle, %date, "nothing to announce");
    }
    print_json(&report)
}
