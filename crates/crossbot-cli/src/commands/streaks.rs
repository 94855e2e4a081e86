use chrono::NaiveDate;
use clap::Subcommand;
use crossbot_core::streaks::{first_missed_date, participation_streaks};
use crossbot_core::{Database, PuzzleType};
use serde_json::json;

use super::{print_json, today, CmdResult};

#[derive(Subcommand)]
pub enum StreaksAction {
    /// Every participation streak of a user
    Show { user: String },
    /// First date in a range the user did not play
    Missed {
        user: String,
        #[arg(long)]
        start: NaiveDate,
        /// Defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

pub fn run(action: StreaksAction, puzzle: PuzzleType) -> CmdResult {
    let db = Database::open()?;
    let snapshot = db.snapshot(puzzle)?;

    match action {
        StreaksAction::Show { user } => {
            let runs: Vec<_> = participation_streaks(&snapshot, puzzle, &user)
                .iter()
                .map(|run| {
                    json!({
                        "start": run.first_date(),
                        "end": run.last_date(),
                        "length": run.len(),
                    })
                })
                .collect();
            print_json(&runs)?;
        }
        StreaksAction::Missed { user, start, end } => {
            let end = end.unwrap_or_else(today);
            let missed = first_missed_date(snapshot.for_user(puzzle, &user), start, end);
            print_json(&json!({ "user": user, "missed": missed }))?;
        }
    }
    Ok(())
}
