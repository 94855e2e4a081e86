use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use crossbot_core::streaks::{milestones_crossed, participation_streaks, streak_progress};
use crossbot_core::{AddOutcome, Config, Database, PuzzleType, TimeRecord};
use serde_json::json;

use super::{parse_time, print_json, today, CmdResult};

#[derive(Subcommand)]
pub enum TimesAction {
    /// Record a time
    Add {
        user: String,
        /// m:ss, :ss, seconds, or "fail"
        time: String,
        /// Puzzle date, defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Display name for the user
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a recorded time
    Remove {
        user: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List active times
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

pub fn run(action: TimesAction, puzzle: PuzzleType) -> CmdResult {
    let config = Config::load()?;
    let db = Database::open()?;
    let reward = config.rewards.crossbucks_per_solve;

    match action {
        TimesAction::Add {
            user,
            time,
            date,
            name,
        } => {
            let seconds = parse_time(&time)?;
            let date = date.unwrap_or_else(today);
            let record = TimeRecord::new(user.as_str(), puzzle, date, seconds, Some(Utc::now()));
            let outcome = db.add_time(&record, reward)?;

            let milestones = match &outcome {
                AddOutcome::Added(_) => {
                    if name.is_some() {
                        db.ensure_user(&user, name.as_deref())?;
                    }
                    let snapshot = db.snapshot(puzzle)?;
                    let runs = participation_streaks(&snapshot, puzzle, &user);
                    streak_progress(&runs, date)
                        .map(|progress| milestones_crossed(progress, &config.streaks.milestones))
                        .unwrap_or_default()
                }
                AddOutcome::AlreadyExists(_) => Vec::new(),
            };
            print_json(&json!({
                "outcome": outcome,
                "milestones": milestones,
                "balance": db.balance(&user)?,
            }))?;
        }
        TimesAction::Remove { user, date } => {
            let date = date.unwrap_or_else(today);
            match db.remove_time(&user, puzzle, date, reward, Utc::now())? {
                Some(removed) => print_json(&removed)?,
                None => return Err(format!("no {puzzle} time for {user} on {date}").into()),
            }
        }
        TimesAction::List { user, date } => {
            let snapshot = db.snapshot(puzzle)?;
            let records: Vec<&TimeRecord> = snapshot
                .iter()
                .filter(|r| user.as_deref().map_or(true, |u| r.user_id == u))
                .filter(|r| date.map_or(true, |d| r.date == d))
                .collect();
            print_json(&records)?;
        }
    }
    Ok(())
}
