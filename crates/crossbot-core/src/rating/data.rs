//! Data contract handed to the posterior sampler.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::records::{PuzzleType, TimeRecord, UserId};

/// One observed time, with users and dates replaced by indexes into
/// [`ModelData::users`] and [`ModelData::dates`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub user: usize,
    pub date: usize,
    /// Saturday indicator, already masked off for puzzle types without a
    /// Saturday effect.
    pub saturday: bool,
    /// 1-based position of this record in the user's submission order.
    pub nth: u32,
    pub seconds: i64,
    pub log_seconds: f64,
}

/// Everything the sampler needs for one puzzle type.
///
/// Users and dates are sorted and distinct, so the indexing is stable for
/// a given set of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub puzzle: PuzzleType,
    pub cap_seconds: i64,
    pub saturday_effect: bool,
    pub users: Vec<UserId>,
    pub dates: Vec<NaiveDate>,
    pub observations: Vec<Observation>,
}

/// `log` of a time clamped to `[1, cap]`; failures count as `cap`.
pub fn log_time(seconds: i64, cap_seconds: i64) -> f64 {
    let clamped = if seconds < 0 {
        cap_seconds
    } else {
        seconds.clamp(1, cap_seconds.max(1))
    };
    (clamped as f64).ln()
}

/// Submission-order index per (user, date), 1-based.
///
/// Orders each user's records by submission timestamp, falling back to the
/// puzzle date for records without one.
fn attempt_indexes(records: &[&TimeRecord]) -> BTreeMap<(UserId, NaiveDate), u32> {
    let mut per_user: BTreeMap<&str, Vec<&TimeRecord>> = BTreeMap::new();
    for &record in records {
        per_user.entry(record.user_id.as_str()).or_default().push(record);
    }
    let mut out = BTreeMap::new();
    for (_, mut mine) in per_user {
        mine.sort_by_key(|r| r.submission_key());
        for (i, record) in mine.into_iter().enumerate() {
            out.insert((record.user_id.clone(), record.date), i as u32 + 1);
        }
    }
    out
}

impl ModelData {
    /// Build the contract from one puzzle type's active records.
    ///
    /// Records of other puzzle types are ignored.
    pub fn from_records<'a, I>(
        puzzle: PuzzleType,
        records: I,
        cap_seconds: i64,
        saturday_effect: bool,
    ) -> Self
    where
        I: IntoIterator<Item = &'a TimeRecord>,
    {
        let records: Vec<&TimeRecord> =
            records.into_iter().filter(|r| r.puzzle == puzzle).collect();
        let users: Vec<UserId> = records
            .iter()
            .map(|r| r.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let dates: Vec<NaiveDate> = records
            .iter()
            .map(|r| r.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let nth = attempt_indexes(&records);

        let observations = records
            .iter()
            .filter_map(|r| {
                let user = users.binary_search(&r.user_id).ok()?;
                let date = dates.binary_search(&r.date).ok()?;
                Some(Observation {
                    user,
                    date,
                    saturday: saturday_effect && r.date.weekday() == Weekday::Sat,
                    nth: nth.get(&(r.user_id.clone(), r.date)).copied().unwrap_or(1),
                    seconds: r.seconds,
                    log_seconds: log_time(r.seconds, cap_seconds),
                })
            })
            .collect();

        Self {
            puzzle,
            cap_seconds,
            saturday_effect,
            users,
            dates,
            observations,
        }
    }

    pub fn user_index(&self, user: &str) -> Option<usize> {
        self.users
            .binary_search_by(|u| u.as_str().cmp(user))
            .ok()
    }

    pub fn date_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    pub fn observations_per_user(&self) -> Vec<usize> {
        let mut counts = vec![0; self.users.len()];
        for obs in &self.observations {
            counts[obs.user] += 1;
        }
        counts
    }

    pub fn observations_per_date(&self) -> Vec<usize> {
        let mut counts = vec![0; self.dates.len()];
        for obs in &self.observations {
            counts[obs.date] += 1;
        }
        counts
    }

    /// Mean and population variance of the observed log-times.
    pub fn log_time_moments(&self) -> Option<(f64, f64)> {
        if self.observations.is_empty() {
            return None;
        }
        let n = self.observations.len() as f64;
        let mean = self.observations.iter().map(|o| o.log_seconds).sum::<f64>() / n;
        let var = self
            .observations
            .iter()
            .map(|o| (o.log_seconds - mean).powi(2))
            .sum::<f64>()
            / n;
        Some((mean, var))
    }

    /// SHA-256 over the contract, hex encoded.
    ///
    /// Two fits over the same fingerprint see identical input.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.puzzle.as_str().as_bytes());
        hasher.update(self.cap_seconds.to_le_bytes());
        hasher.update([self.saturday_effect as u8]);
        for user in &self.users {
            hasher.update((user.len() as u64).to_le_bytes());
            hasher.update(user.as_bytes());
        }
        for date in &self.dates {
            hasher.update(date.num_days_from_ce().to_le_bytes());
        }
        for obs in &self.observations {
            hasher.update((obs.user as u64).to_le_bytes());
            hasher.update((obs.date as u64).to_le_bytes());
            hasher.update([obs.saturday as u8]);
            hasher.update(obs.nth.to_le_bytes());
            hasher.update(obs.seconds.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}
