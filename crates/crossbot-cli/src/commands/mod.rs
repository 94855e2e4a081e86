pub mod announce;
pub mod config;
pub mod leaderboard;
pub mod model;
pub mod scores;
pub mod streaks;
pub mod times;
pub mod user;

use chrono::{Local, NaiveDate};
use crossbot_core::records::FAIL_SECONDS;
use crossbot_core::ValidationError;
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `m:ss`, `:ss`, plain seconds, or `fail`.
pub fn parse_time(input: &str) -> Result<i64, ValidationError> {
    let raw = input.trim().to_ascii_lowercase();
    let invalid = || ValidationError::InvalidTime(input.to_string());
    if raw == "fail" {
        return Ok(FAIL_SECONDS);
    }
    match raw.split_once(':') {
        Some((minutes, seconds)) => {
            let minutes: i64 = if minutes.is_empty() {
                0
            } else {
                minutes.parse().map_err(|_| invalid())?
            };
            let seconds: i64 = seconds.parse().map_err(|_| invalid())?;
            if minutes < 0 || !(0..60).contains(&seconds) {
                return Err(invalid());
            }
            Ok(minutes * 60 + seconds)
        }
        None => {
            let seconds: i64 = raw.parse().map_err(|_| invalid())?;
            if seconds < 0 {
                return Err(invalid());
            }
            Ok(seconds)
        }
    }
}
