//! Integration tests for daily winners and win streaks.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use crossbot_core::records::{PuzzleType, RecordSnapshot, TimeRecord, FAIL_SECONDS};
use crossbot_core::Leaderboard;
use proptest::prelude::*;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, d).unwrap()
}

fn rec(user: &str, d: u32, seconds: i64) -> TimeRecord {
    TimeRecord::new(user, PuzzleType::MiniCrossword, day(d), seconds, None)
}

fn streak_days(streaks: BTreeMap<String, Vec<TimeRecord>>) -> BTreeMap<String, Vec<u32>> {
    streaks
        .into_iter()
        .map(|(user, records)| (user, records.iter().map(|r| r.date.day()).collect()))
        .collect()
}

#[test]
fn tied_fastest_times_all_win() {
    let snapshot =
        RecordSnapshot::new(vec![rec("alice", 1, 15), rec("bob", 1, 15), rec("carol", 1, 20)]);
    let board = Leaderboard::new(&snapshot, PuzzleType::MiniCrossword);
    assert_eq!(
        board.winners(day(1)).into_iter().collect::<Vec<_>>(),
        vec!["alice".to_string(), "bob".to_string()]
    );
    assert_eq!(board.winning_time(day(1)), Some(15));
}

#[test]
fn only_live_win_streaks_are_reported() {
    let snapshot = RecordSnapshot::new(vec![
        rec("alice", 1, 10),
        rec("bob", 1, 20),
        rec("alice", 2, 12),
        rec("bob", 2, 12),
        rec("alice", 3, 30),
        rec("bob", 3, 14),
    ]);
    let board = Leaderboard::new(&snapshot, PuzzleType::MiniCrossword);

    let on_second = streak_days(board.current_win_streaks(day(2)));
    assert_eq!(
        on_second,
        BTreeMap::from([("alice".to_string(), vec![1, 2]), ("bob".to_string(), vec![2])])
    );

    let on_third = streak_days(board.current_win_streaks(day(3)));
    assert_eq!(on_third, BTreeMap::from([("bob".to_string(), vec![2, 3])]));
}

#[test]
fn other_puzzle_types_do_not_leak() {
    let mut sudoku = rec("carol", 1, 5);
    sudoku.puzzle = PuzzleType::EasySudoku;
    let snapshot = RecordSnapshot::new(vec![rec("alice", 1, 40), sudoku]);
    let board = Leaderboard::new(&snapshot, PuzzleType::MiniCrossword);
    assert!(board.outcome(day(1)).is_winner("alice"));
    assert!(!board.outcome(day(1)).is_winner("carol"));
}

proptest! {
    #[test]
    fn winners_hold_the_minimum_finished_time(
        times in proptest::collection::vec(prop_oneof![Just(FAIL_SECONDS), 1i64..90], 0..8)
    ) {
        let records: Vec<TimeRecord> = times
            .iter()
            .enumerate()
            .map(|(i, &s)| rec(&format!("user{i}"), 1, s))
            .collect();
        let snapshot = RecordSnapshot::new(records.clone());
        let board = Leaderboard::new(&snapshot, PuzzleType::MiniCrossword);
        let winners = board.winners(day(1));

        match records.iter().filter(|r| r.seconds > 0).map(|r| r.seconds).min() {
            None => prop_assert!(winners.is_empty()),
            Some(best) => {
                prop_assert!(!winners.is_empty());
                for r in &records {
                    prop_assert_eq!(winners.contains(&r.user_id), r.seconds == best);
                }
            }
        }
    }
}
