use std::collections::BTreeMap;

use chrono::NaiveDate;
use crossbot_core::{Database, Leaderboard, PuzzleType};
use serde_json::json;

use super::{print_json, today, CmdResult};

pub fn winners(puzzle: PuzzleType, date: Option<NaiveDate>) -> CmdResult {
    let date = date.unwrap_or_else(today);
    let snapshot = Database::open()?.snapshot(puzzle)?;
    let board = Leaderboard::new(&snapshot, puzzle);
    print_json(&json!({
        "date": date,
        "seconds": board.winning_time(date),
        "winners": board.winners(date),
    }))
}

pub fn win_streaks(puzzle: PuzzleType, date: Option<NaiveDate>) -> CmdResult {
    let date = date.unwrap_or_else(today);
    let snapshot = Database::open()?.snapshot(puzzle)?;
    let board = Leaderboard::new(&snapshot, puzzle);
    let live: BTreeMap<_, _> = board
        .current_win_streaks(date)
        .into_iter()
        .map(|(user, records)| {
            let since = records.first().map(|r| r.date);
            (user, json!({ "length": records.len(), "since": since }))
        })
        .collect();
    print_json(&live)
}

pub fn wins(puzzle: PuzzleType, start: NaiveDate, end: Option<NaiveDate>) -> CmdResult {
    let end = end.unwrap_or_else(today);
    if end < start {
        return Err(crossbot_core::ValidationError::InvalidDateRange { start, end }.into());
    }
    let snapshot = Database::open()?.snapshot(puzzle)?;
    print_json(&Leaderboard::new(&snapshot, puzzle).win_tally(start, end))
}
