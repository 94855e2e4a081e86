//! Integration tests for the rating model on synthetic data.
//!
//! Times are generated from known skills and difficulties; a stand-in
//! sampler returns draws scattered around those true values, so the
//! preparation, convergence and extraction logic can be checked without a
//! real inference engine.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate, TimeZone, Utc, Weekday};
use crossbot_core::rating::{
    self, Draw, ModelData, PosteriorSampler, PosteriorSamples, RatingConfig, RatingModel,
    SamplerSettings,
};
use crossbot_core::records::{PuzzleType, RecordSnapshot, TimeRecord};
use crossbot_core::{Database, RatingError};
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;

const MU: f64 = 3.6;
const SIGMA: f64 = 0.15;
const SKILL_DEV: f64 = 0.4;
const DATE_DEV: f64 = 0.3;
const SATURDAY: f64 = 0.5;

fn normal(rng: &mut Mcg128Xsl64) -> f64 {
    // Box-Muller
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

struct World {
    skills: BTreeMap<String, f64>,
    difficulties: BTreeMap<NaiveDate, f64>,
    records: Vec<TimeRecord>,
}

fn world(seed: u64) -> World {
    let mut rng = Mcg128Xsl64::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
    let skills: BTreeMap<String, f64> = (0..8)
        .map(|i| (format!("user{i}"), SKILL_DEV * normal(&mut rng)))
        .collect();
    let difficulties: BTreeMap<NaiveDate, f64> = (0..60)
        .map(|i| {
            let date = start.checked_add_days(Days::new(i)).unwrap();
            (date, DATE_DEV * normal(&mut rng))
        })
        .collect();

    let mut records = Vec::new();
    for (&date, &difficulty) in &difficulties {
        for (user, &skill) in &skills {
            if rng.gen::<f64>() > 0.8 {
                continue;
            }
            let saturday = if date.weekday() == Weekday::Sat { SATURDAY } else { 0.0 };
            let log_seconds = MU + skill + difficulty + saturday + SIGMA * normal(&mut rng);
            let submitted = Utc
                .with_ymd_and_hms(date.year(), date.month(), date.day(), 12, 0, 0)
                .unwrap();
            records.push(TimeRecord::new(
                user.as_str(),
                PuzzleType::MiniCrossword,
                date,
                log_seconds.exp().round() as i64,
                Some(submitted),
            ));
        }
    }
    World {
        skills,
        difficulties,
        records,
    }
}

/// Draws scattered around the generating parameters.
struct TruthSampler<'a> {
    world: &'a World,
    jitter: f64,
    /// Shift added to `mu` per chain index, to simulate stuck chains.
    chain_offset: f64,
}

impl PosteriorSampler for TruthSampler<'_> {
    fn sample(
        &self,
        data: &ModelData,
        settings: &SamplerSettings,
    ) -> Result<PosteriorSamples, RatingError> {
        let mut rng = Mcg128Xsl64::seed_from_u64(settings.seed.unwrap_or(7));
        let draws_per_chain = settings.iterations / 2;
        let mut chains = Vec::new();
        for chain in 0..settings.chains {
            let mut draws = Vec::new();
            for _ in 0..draws_per_chain {
                let mut noisy = |v: f64| v + self.jitter * normal(&mut rng);
                draws.push(Draw {
                    mu: noisy(MU) + self.chain_offset * chain as f64,
                    saturday_multiplier: noisy(SATURDAY),
                    beginner_gain: noisy(0.0),
                    beginner_decay: 1.0 + noisy(0.0).abs(),
                    skill_dev: noisy(SKILL_DEV),
                    date_dev: noisy(DATE_DEV),
                    sigma: noisy(SIGMA),
                    log_posterior: noisy(-250.0),
                    skill: data.users.iter().map(|u| noisy(self.world.skills[u])).collect(),
                    difficulty: data
                        .dates
                        .iter()
                        .map(|d| noisy(self.world.difficulties[d]))
                        .collect(),
                });
            }
            chains.push(draws);
        }
        Ok(PosteriorSamples {
            chains,
            fingerprint: Some(data.fingerprint()),
        })
    }
}

fn config() -> RatingConfig {
    RatingConfig {
        iterations: 200,
        chains: 4,
        seed: Some(11),
        ..RatingConfig::default()
    }
}

/// Every fourth observation is held out of the fit.
fn split(data: &ModelData) -> (ModelData, ModelData) {
    let mut train = data.clone();
    let mut test = data.clone();
    train.observations.clear();
    test.observations.clear();
    for (i, obs) in data.observations.iter().enumerate() {
        if i % 4 == 3 {
            test.observations.push(obs.clone());
        } else {
            train.observations.push(obs.clone());
        }
    }
    (train, test)
}

#[test]
fn fitted_model_beats_the_baseline_on_held_out_times() {
    let world = world(2018);
    let snapshot = RecordSnapshot::new(world.records.clone());
    let model = RatingModel::new(config());
    let data = model.prepare(&snapshot, PuzzleType::MiniCrossword).unwrap();
    let (train, test) = split(&data);

    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 0.0,
    };
    let fit = model.fit_data(&train, &sampler, Utc::now()).unwrap();
    assert!(fit.convergence.max_rhat < 1.1);

    let held_out = rating::validate(&test, &fit).unwrap();
    assert_eq!(held_out.observations, test.observations.len());
    assert!(
        held_out.model_mse < held_out.baseline_mse,
        "model {} vs baseline {}",
        held_out.model_mse,
        held_out.baseline_mse
    );

    let in_sample = rating::validate(&train, &fit).unwrap();
    assert!(in_sample.beats_baseline());
}

#[test]
fn estimates_track_the_generating_values() {
    let world = world(99);
    let snapshot = RecordSnapshot::new(world.records.clone());
    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 0.0,
    };
    let fit = RatingModel::new(config())
        .fit(&snapshot, PuzzleType::MiniCrossword, &sampler, Utc::now())
        .unwrap();

    for (user, &truth) in &world.skills {
        let est = fit.skill(user).unwrap().estimate;
        assert!((est.mean - truth).abs() < 0.05, "{user}: {} vs {truth}", est.mean);
        assert!(est.lower() <= est.mean && est.mean <= est.upper());
    }
    assert!((fit.params.saturday_multiplier.mean - SATURDAY).abs() < 0.05);
    assert_eq!(fit.difficulties.len(), world.difficulties.len());
}

#[test]
fn disagreeing_chains_are_rejected() {
    let world = world(5);
    let snapshot = RecordSnapshot::new(world.records.clone());
    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 1.0,
    };
    let err = RatingModel::new(config())
        .fit(&snapshot, PuzzleType::MiniCrossword, &sampler, Utc::now())
        .unwrap_err();
    match err {
        RatingError::NotConverged { parameter, rhat, .. } => {
            assert_eq!(parameter, "mu");
            assert!(rhat > 1.1);
        }
        other => panic!("expected NotConverged, got {other:?}"),
    }
}

#[test]
fn stored_rating_reads_back_identically() {
    let world = world(3);
    let db = Database::open_memory().unwrap();
    for record in &world.records {
        db.add_time(record, 10).unwrap();
    }
    let snapshot = db.snapshot(PuzzleType::MiniCrossword).unwrap();
    assert_eq!(snapshot.len(), world.records.len());

    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 0.0,
    };
    let fit = RatingModel::new(config())
        .fit(&snapshot, PuzzleType::MiniCrossword, &sampler, Utc::now())
        .unwrap();
    db.replace_rating(&fit).unwrap();

    let loaded = db.load_rating(PuzzleType::MiniCrossword).unwrap().unwrap();
    assert_eq!(loaded, fit);
    assert!(db.load_rating(PuzzleType::Crossword).unwrap().is_none());
    assert_eq!(
        db.rating_fingerprint(PuzzleType::MiniCrossword).unwrap().as_deref(),
        Some(fit.data_fingerprint.as_str())
    );
}

#[test]
fn loading_ignores_an_uncommitted_replacement() {
    let world = world(8);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crossbot.db");
    let db = Database::open_at(&path).unwrap();
    for record in &world.records {
        db.add_time(record, 10).unwrap();
    }
    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 0.0,
    };
    let snapshot = db.snapshot(PuzzleType::MiniCrossword).unwrap();
    let fit = RatingModel::new(config())
        .fit(&snapshot, PuzzleType::MiniCrossword, &sampler, Utc::now())
        .unwrap();
    db.replace_rating(&fit).unwrap();

    let writer = Database::open_at(&path).unwrap();
    writer
        .conn()
        .execute_batch(
            "BEGIN IMMEDIATE;
             DELETE FROM rating_predictions WHERE puzzle = 'mini';
             DELETE FROM rating_skills WHERE puzzle = 'mini';",
        )
        .unwrap();
    assert_eq!(db.load_rating(PuzzleType::MiniCrossword).unwrap().unwrap(), fit);
    assert!(db.conn().is_autocommit());
    writer.conn().execute_batch("ROLLBACK;").unwrap();
    assert_eq!(db.load_rating(PuzzleType::MiniCrossword).unwrap().unwrap(), fit);
}

#[test]
fn refitting_the_same_data_is_idempotent() {
    let world = world(17);
    let snapshot = RecordSnapshot::new(world.records.clone());
    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 0.0,
    };
    let model = RatingModel::new(config());
    let fitted_at = Utc.with_ymd_and_hms(2018, 3, 1, 9, 0, 0).unwrap();
    let first = model
        .fit(&snapshot, PuzzleType::MiniCrossword, &sampler, fitted_at)
        .unwrap();
    let second = model
        .fit(&snapshot, PuzzleType::MiniCrossword, &sampler, fitted_at)
        .unwrap();
    assert_eq!(first, second);

    let db = Database::open_memory().unwrap();
    db.replace_rating(&first).unwrap();
    db.replace_rating(&second).unwrap();
    assert_eq!(db.load_rating(PuzzleType::MiniCrossword).unwrap().unwrap(), first);
}

#[test]
fn selective_player_is_detected() {
    let mut world = world(42);
    // user0 skips every date harder than typical.
    world
        .records
        .retain(|r| r.user_id != "user0" || world.difficulties[&r.date] < 0.1);
    let snapshot = RecordSnapshot::new(world.records.clone());
    let sampler = TruthSampler {
        world: &world,
        jitter: 0.02,
        chain_offset: 0.0,
    };
    let model = RatingModel::new(config());
    let data = model.prepare(&snapshot, PuzzleType::MiniCrossword).unwrap();
    let fit = model.fit_data(&data, &sampler, Utc::now()).unwrap();

    let p = rating::selective_play(&data, &fit, "user0").unwrap();
    assert!(p > 0.9, "p = {p}");
}
