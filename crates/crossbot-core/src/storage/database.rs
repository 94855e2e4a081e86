//! SQLite-backed record store and rating storage.
//!
//! Owns the uniqueness of active times: at most one non-deleted row per
//! (user, puzzle, date). Adding or removing a time and adjusting the
//! user's crossbucks happen in one transaction, and a rating fit replaces
//! the stored output of its puzzle type in one transaction.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::data_dir;
use super::migrations;
use crate::error::DatabaseError;
use crate::rating::{
    DifficultyEstimate, Estimate, Prediction, RatingSnapshot, SkillEstimate,
};
use crate::records::{PuzzleType, RecordSnapshot, TimeRecord};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Result of [`Database::add_time`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "record")]
pub enum AddOutcome {
    Added(TimeRecord),
    /// An active time already exists; nothing was changed.
    AlreadyExists(TimeRecord),
}

/// SQLite database holding users, times and rating output.
pub struct Database {
    conn: Connection,
}

fn corrupt(table: &str, message: impl Into<String>) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: table.to_string(),
        message: message.into(),
    }
}

fn parse_date(table: &str, raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| corrupt(table, format!("date '{raw}': {e}")))
}

fn parse_timestamp(table: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| corrupt(table, format!("timestamp '{raw}': {e}")))
}

fn parse_puzzle(table: &str, raw: &str) -> Result<PuzzleType, DatabaseError> {
    raw.parse().map_err(|_| corrupt(table, format!("puzzle '{raw}'")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::QueryFailed(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(table: &str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| corrupt(table, e.to_string()))
}

type TimeRow = (String, String, String, i64, Option<String>, Option<String>);

fn decode_time(row: TimeRow) -> Result<TimeRecord, DatabaseError> {
    let (user_id, puzzle, date, seconds, submitted_at, deleted_at) = row;
    Ok(TimeRecord {
        user_id,
        puzzle: parse_puzzle("times", &puzzle)?,
        date: parse_date("times", &date)?,
        seconds,
        submitted_at: submitted_at.as_deref().map(|ts| parse_timestamp("times", ts)).transpose()?,
        deleted_at: deleted_at.as_deref().map(|ts| parse_timestamp("times", ts)).transpose()?,
    })
}

fn read_time_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

const TIME_COLUMNS: &str = "user_id, puzzle, date, seconds, submitted_at, deleted_at";

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data dir>/crossbot.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the data directory is unusable or the database
    /// cannot be opened or migrated.
    pub fn open() -> crate::error::Result<Self> {
        let path = data_dir()?.join("crossbot.db");
        Ok(Self::open_at(path)?)
    }

    /// Open (or create) the database at `path`.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&self.conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Run `f` inside `BEGIN IMMEDIATE`, committing on success and rolling
    /// back on error.
    fn transaction<T>(
        &self,
        f: impl FnOnce() -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        match f() {
            Ok(value) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }

    /// Create the user if missing; update the display name when given.
    pub fn ensure_user(&self, user_id: &str, name: Option<&str>) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO users (user_id, name) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET name = COALESCE(excluded.name, users.name)",
            params![user_id, name],
        )?;
        Ok(())
    }

    /// Crossbucks balance; 0 for unknown users.
    pub fn balance(&self, user_id: &str) -> Result<i64, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT crossbucks FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }

    /// Active time for (user, puzzle, date), if any.
    pub fn active_time(
        &self,
        user_id: &str,
        puzzle: PuzzleType,
        date: NaiveDate,
    ) -> Result<Option<TimeRecord>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TIME_COLUMNS} FROM times
                     WHERE user_id = ?1 AND puzzle = ?2 AND date = ?3 AND deleted_at IS NULL"
                ),
                params![user_id, puzzle.as_str(), date.format(DATE_FORMAT).to_string()],
                read_time_row,
            )
            .optional()?;
        row.map(decode_time).transpose()
    }

    /// Store `record` and credit `reward` crossbucks, atomically.
    ///
    /// If an active time already exists for the same user, puzzle and date,
    /// nothing changes and the existing record is returned.
    pub fn add_time(&self, record: &TimeRecord, reward: i64) -> Result<AddOutcome, DatabaseError> {
        self.transaction(|| {
            if let Some(existing) = self.active_time(&record.user_id, record.puzzle, record.date)? {
                return Ok(AddOutcome::AlreadyExists(existing));
            }
            self.ensure_user(&record.user_id, None)?;
            self.conn.execute(
                "INSERT INTO times (user_id, puzzle, date, seconds, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.user_id,
                    record.puzzle.as_str(),
                    record.date.format(DATE_FORMAT).to_string(),
                    record.seconds,
                    record.submitted_at.map(|ts| ts.to_rfc3339()),
                ],
            )?;
            self.conn.execute(
                "UPDATE users SET crossbucks = crossbucks + ?2 WHERE user_id = ?1",
                params![record.user_id, reward],
            )?;
            let mut added = record.clone();
            added.deleted_at = None;
            Ok(AddOutcome::Added(added))
        })
    }

    /// Soft-delete the active time and debit `reward` crossbucks, atomically.
    ///
    /// Returns the removed record, or `None` if there was nothing to remove.
    pub fn remove_time(
        &self,
        user_id: &str,
        puzzle: PuzzleType,
        date: NaiveDate,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeRecord>, DatabaseError> {
        self.transaction(|| {
            let Some(mut existing) = self.active_time(user_id, puzzle, date)? else {
                return Ok(None);
            };
            self.conn.execute(
                "UPDATE times SET deleted_at = ?4
                 WHERE user_id = ?1 AND puzzle = ?2 AND date = ?3 AND deleted_at IS NULL",
                params![
                    user_id,
                    puzzle.as_str(),
                    date.format(DATE_FORMAT).to_string(),
                    now.to_rfc3339()
                ],
            )?;
            self.conn.execute(
                "UPDATE users SET crossbucks = crossbucks - ?2 WHERE user_id = ?1",
                params![user_id, reward],
            )?;
            existing.deleted_at = Some(now);
            Ok(Some(existing))
        })
    }

    fn query_times(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<TimeRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, read_time_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode_time(row?)?);
        }
        Ok(out)
    }

    /// Active records of one puzzle type.
    pub fn snapshot(&self, puzzle: PuzzleType) -> Result<RecordSnapshot, DatabaseError> {
        let records = self.query_times(
            &format!("SELECT {TIME_COLUMNS} FROM times WHERE puzzle = ?1 AND deleted_at IS NULL"),
            params![puzzle.as_str()],
        )?;
        Ok(RecordSnapshot::new(records))
    }

    /// Active records of every puzzle type.
    pub fn snapshot_all(&self) -> Result<RecordSnapshot, DatabaseError> {
        let records = self.query_times(
            &format!("SELECT {TIME_COLUMNS} FROM times WHERE deleted_at IS NULL"),
            [],
        )?;
        Ok(RecordSnapshot::new(records))
    }

    /// Replace the stored rating of `rating.puzzle` with `rating`.
    ///
    /// Readers see either the old rating or the new one, never a mix.
    pub fn replace_rating(&self, rating: &RatingSnapshot) -> Result<(), DatabaseError> {
        let puzzle = rating.puzzle.as_str();
        self.transaction(|| {
            for table in [
                "rating_runs",
                "rating_skills",
                "rating_difficulties",
                "rating_predictions",
            ] {
                self.conn
                    .execute(&format!("DELETE FROM {table} WHERE puzzle = ?1"), params![puzzle])?;
            }

            self.conn.execute(
                "INSERT INTO rating_runs
                 (puzzle, id, data_fingerprint, fitted_at, params, convergence, limitations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    puzzle,
                    rating.id.to_string(),
                    rating.data_fingerprint,
                    rating.params.fitted_at.to_rfc3339(),
                    to_json(&rating.params)?,
                    to_json(&rating.convergence)?,
                    to_json(&rating.limitations)?,
                ],
            )?;

            let mut stmt = self.conn.prepare(
                "INSERT INTO rating_skills (puzzle, user_id, observations, mean, p25, p75)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for s in &rating.skills {
                let e = s.estimate;
                stmt.execute(params![puzzle, s.user, s.observations as i64, e.mean, e.p25, e.p75])?;
            }

            let mut stmt = self.conn.prepare(
                "INSERT INTO rating_difficulties (puzzle, date, observations, mean, p25, p75)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for d in &rating.difficulties {
                let e = d.estimate;
                stmt.execute(params![
                    puzzle,
                    d.date.format(DATE_FORMAT).to_string(),
                    d.observations as i64,
                    e.mean,
                    e.p25,
                    e.p75
                ])?;
            }

            let mut stmt = self.conn.prepare(
                "INSERT INTO rating_predictions
                 (puzzle, user_id, date, log_seconds, predicted_log_seconds, residual)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for p in &rating.predictions {
                stmt.execute(params![
                    puzzle,
                    p.user,
                    p.date.format(DATE_FORMAT).to_string(),
                    p.log_seconds,
                    p.predicted_log_seconds,
                    p.residual
                ])?;
            }
            Ok(())
        })
    }

    /// Fingerprint of the data the stored rating was fitted on.
    pub fn rating_fingerprint(&self, puzzle: PuzzleType) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .conn
            .query_row(
                "SELECT data_fingerprint FROM rating_runs WHERE puzzle = ?1",
                params![puzzle.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// The stored rating of `puzzle`, if it was ever fitted.
    ///
    /// All tables are read inside one transaction, so a concurrent
    /// [`Database::replace_rating`] is seen either entirely or not at all.
    pub fn load_rating(
        &self,
        puzzle: PuzzleType,
    ) -> Result<Option<RatingSnapshot>, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let rating = read_rating(&tx, puzzle)?;
        tx.commit()?;
        Ok(rating)
    }
}

fn read_rating(
    conn: &Connection,
    puzzle: PuzzleType,
) -> Result<Option<RatingSnapshot>, DatabaseError> {
    let key = puzzle.as_str();
    let run: Option<(String, String, String, String, String)> = conn
        .query_row(
            "SELECT id, data_fingerprint, params, convergence, limitations
             FROM rating_runs WHERE puzzle = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    let Some((id, data_fingerprint, params_json, convergence, limitations)) = run else {
        return Ok(None);
    };

    let estimate = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, i64, Estimate)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            Estimate {
                mean: row.get(2)?,
                p25: row.get(3)?,
                p75: row.get(4)?,
            },
        ))
    };

    let mut stmt = conn.prepare(
        "SELECT user_id, observations, mean, p25, p75 FROM rating_skills
         WHERE puzzle = ?1 ORDER BY user_id",
    )?;
    let skills = stmt
        .query_map(params![key], estimate)?
        .map(|row| -> Result<SkillEstimate, DatabaseError> {
            let (user, observations, estimate) = row?;
            Ok(SkillEstimate {
                user,
                observations: observations as usize,
                estimate,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;

    let mut stmt = conn.prepare(
        "SELECT date, observations, mean, p25, p75 FROM rating_difficulties
         WHERE puzzle = ?1 ORDER BY date",
    )?;
    let difficulties = stmt
        .query_map(params![key], estimate)?
        .map(|row| -> Result<DifficultyEstimate, DatabaseError> {
            let (date, observations, estimate) = row?;
            Ok(DifficultyEstimate {
                date: parse_date("rating_difficulties", &date)?,
                observations: observations as usize,
                estimate,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;

    let mut stmt = conn.prepare(
        "SELECT user_id, date, log_seconds, predicted_log_seconds, residual
         FROM rating_predictions WHERE puzzle = ?1 ORDER BY date, user_id",
    )?;
    let predictions = stmt
        .query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?
        .map(|row| -> Result<Prediction, DatabaseError> {
            let (user, date, log_seconds, predicted_log_seconds, residual) = row?;
            Ok(Prediction {
                user,
                date: parse_date("rating_predictions", &date)?,
                log_seconds,
                predicted_log_seconds,
                residual,
            })
        })
        .collect::<Result<Vec<_>, DatabaseError>>()?;

    Ok(Some(RatingSnapshot {
        id: id
            .parse()
            .map_err(|_| corrupt("rating_runs", format!("id '{id}'")))?,
        puzzle,
        data_fingerprint,
        params: from_json("rating_runs", &params_json)?,
        skills,
        difficulties,
        predictions,
        convergence: from_json("rating_runs", &convergence)?,
        limitations: from_json("rating_runs", &limitations)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, d).unwrap()
    }

    #[test]
    fn add_credits_and_rejects_duplicates() {
        let db = Database::open_memory().unwrap();
        let rec = TimeRecord::new("amy", PuzzleType::MiniCrossword, day(1), 42, Some(Utc::now()));
        assert!(matches!(db.add_time(&rec, 10).unwrap(), AddOutcome::Added(_)));

        let again = TimeRecord::new("amy", PuzzleType::MiniCrossword, day(1), 30, None);
        match db.add_time(&again, 10).unwrap() {
            AddOutcome::AlreadyExists(existing) => assert_eq!(existing.seconds, 42),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(db.balance("amy").unwrap(), 10);
    }

    #[test]
    fn remove_debits_and_frees_the_slot() {
        let db = Database::open_memory().unwrap();
        let rec = TimeRecord::new("amy", PuzzleType::Crossword, day(2), -1, None);
        db.add_time(&rec, 10).unwrap();
        let removed = db
            .remove_time("amy", PuzzleType::Crossword, day(2), 10, Utc::now())
            .unwrap()
            .unwrap();
        assert!(removed.deleted_at.is_some());
        assert_eq!(db.balance("amy").unwrap(), 0);
        assert!(db.snapshot(PuzzleType::Crossword).unwrap().is_empty());
        assert!(db
            .remove_time("amy", PuzzleType::Crossword, day(2), 10, Utc::now())
            .unwrap()
            .is_none());

        assert!(matches!(db.add_time(&rec, 10).unwrap(), AddOutcome::Added(_)));
    }

    #[test]
    fn snapshot_filters_by_puzzle() {
        let db = Database::open_memory().unwrap();
        db.add_time(&TimeRecord::new("amy", PuzzleType::MiniCrossword, day(1), 40, None), 10)
            .unwrap();
        db.add_time(&TimeRecord::new("amy", PuzzleType::EasySudoku, day(1), 400, None), 10)
            .unwrap();
        assert_eq!(db.snapshot(PuzzleType::MiniCrossword).unwrap().len(), 1);
        assert_eq!(db.snapshot_all().unwrap().len(), 2);
        assert_eq!(db.balance("amy").unwrap(), 20);
        assert_eq!(db.balance("nobody").unwrap(), 0);
    }

    #[test]
    fn ensure_user_keeps_existing_name() {
        let db = Database::open_memory().unwrap();
        db.ensure_user("amy", Some("Amy")).unwrap();
        db.ensure_user("amy", None).unwrap();
        let name: Option<String> = db
            .conn()
            .query_row("SELECT name FROM users WHERE user_id = 'amy'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name.as_deref(), Some("Amy"));
    }
}
