//! Convergence checks on sampler output.
//!
//! Uses split R-hat (Gelman-Rubin on half-chains): every chain is cut in
//! two and the between-half variance is compared with the within-half
//! variance. Values near 1 mean the halves agree.

use serde::{Deserialize, Serialize};

use super::data::ModelData;
use super::sampler::{Draw, PosteriorSamples};
use crate::error::RatingError;

/// Summary of the convergence check for one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub max_rhat: f64,
    pub worst_parameter: String,
    pub chains: usize,
    pub draws_per_chain: usize,
}

/// Split R-hat for one scalar parameter, given its draws per chain.
///
/// Chains must have equal length of at least 4. Constant parameters
/// report 1.0.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let half = chains.first().map_or(0, |c| c.len() / 2);
    if half < 2 {
        return f64::NAN;
    }
    // Shift onto the first draw so a constant parameter sums to exactly zero
    // instead of picking up rounding error in the means.
    let origin = chains[0][0];
    let halves: Vec<Vec<f64>> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[c.len() - half..]])
        .map(|h| h.iter().map(|x| x - origin).collect())
        .collect();

    let m = halves.len() as f64;
    let n = half as f64;
    let means: Vec<f64> = halves.iter().map(|h| h.iter().sum::<f64>() / n).collect();
    let grand = means.iter().sum::<f64>() / m;

    let between = n / (m - 1.0) * means.iter().map(|mu| (mu - grand).powi(2)).sum::<f64>();
    let within = halves
        .iter()
        .zip(&means)
        .map(|(h, mu)| h.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (n - 1.0))
        .sum::<f64>()
        / m;

    if within == 0.0 {
        return if between == 0.0 { 1.0 } else { f64::INFINITY };
    }
    let var_plus = (n - 1.0) / n * within + between / n;
    (var_plus / within).sqrt()
}

type Getter = Box<dyn Fn(&Draw) -> f64>;

fn scalar_parameters(data: &ModelData) -> Vec<(String, Getter)> {
    let mut params: Vec<(String, Getter)> = vec![
        ("mu".into(), Box::new(|d: &Draw| d.mu)),
        ("beginner_gain".into(), Box::new(|d: &Draw| d.beginner_gain)),
        ("beginner_decay".into(), Box::new(|d: &Draw| d.beginner_decay)),
        ("skill_dev".into(), Box::new(|d: &Draw| d.skill_dev)),
        ("date_dev".into(), Box::new(|d: &Draw| d.date_dev)),
        ("sigma".into(), Box::new(|d: &Draw| d.sigma)),
    ];
    if data.saturday_effect {
        params.push((
            "saturday_multiplier".into(),
            Box::new(|d: &Draw| d.saturday_multiplier),
        ));
    }
    for (i, user) in data.users.iter().enumerate() {
        params.push((format!("skill[{user}]"), Box::new(move |d: &Draw| d.skill[i])));
    }
    for (i, date) in data.dates.iter().enumerate() {
        params.push((format!("difficulty[{date}]"), Box::new(move |d: &Draw| d.difficulty[i])));
    }
    params
}

/// Compute R-hat for every scalar parameter and fail if any exceeds
/// `max_rhat`.
///
/// `samples` must already have passed [`PosteriorSamples::check_shape`].
pub fn check_convergence(
    samples: &PosteriorSamples,
    data: &ModelData,
    max_rhat: f64,
    min_draws_per_chain: usize,
) -> Result<ConvergenceReport, RatingError> {
    let draws_per_chain = samples.chains.first().map_or(0, Vec::len);
    let required = min_draws_per_chain.max(4);
    if draws_per_chain < required {
        return Err(RatingError::TooFewDraws {
            required,
            actual: draws_per_chain,
        });
    }

    let mut worst = ConvergenceReport {
        max_rhat: 1.0,
        worst_parameter: "mu".into(),
        chains: samples.chains.len(),
        draws_per_chain,
    };
    for (name, get) in scalar_parameters(data) {
        let per_chain: Vec<Vec<f64>> = samples
            .chains
            .iter()
            .map(|chain| chain.iter().map(|d| get(d)).collect())
            .collect();
        let rhat = split_rhat(&per_chain);
        if rhat.is_nan() || rhat > worst.max_rhat {
            worst.max_rhat = rhat;
            worst.worst_parameter = name;
        }
        if !(worst.max_rhat <= max_rhat) {
            return Err(RatingError::NotConverged {
                parameter: worst.worst_parameter,
                rhat: worst.max_rhat,
                threshold: max_rhat,
            });
        }
    }
    Ok(worst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreeing_chains_are_near_one() {
        // Two chains that wander over the same values.
        let a: Vec<f64> = (0..100).map(|i| ((i * 37) % 17) as f64).collect();
        let b: Vec<f64> = (0..100).map(|i| ((i * 53) % 17) as f64).collect();
        let rhat = split_rhat(&[a, b]);
        assert!(rhat < 1.05, "rhat = {rhat}");
    }

    #[test]
    fn separated_chains_are_flagged() {
        let a: Vec<f64> = (0..100).map(|i| (i % 5) as f64).collect();
        let b: Vec<f64> = (0..100).map(|i| 50.0 + (i % 5) as f64).collect();
        assert!(split_rhat(&[a, b]) > 1.5);
    }

    #[test]
    fn drifting_single_chain_is_flagged() {
        let trend: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert!(split_rhat(&[trend]) > 1.5);
    }

    #[test]
    fn constant_parameter_is_converged() {
        assert_eq!(split_rhat(&[vec![2.0; 10], vec![2.0; 10]]), 1.0);
        // 0.1 is not exactly representable; its running sums must not leak
        // into the variances.
        assert_eq!(split_rhat(&vec![vec![0.1; 8]; 4]), 1.0);
        assert_eq!(split_rhat(&vec![vec![-3.7; 101]; 3]), 1.0);
    }

    #[test]
    fn parameter_pinned_at_a_fraction_passes_the_check() {
        let day = chrono::NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let data = ModelData {
            puzzle: crate::records::PuzzleType::MiniCrossword,
            cap_seconds: 300,
            saturday_effect: false,
            users: vec!["amy".into()],
            dates: vec![day],
            observations: Vec::new(),
        };
        let draw = |i: usize| Draw {
            mu: 3.0 + (i % 3) as f64 * 0.01,
            saturday_multiplier: 0.0,
            beginner_gain: 0.1,
            beginner_decay: 1.0,
            skill_dev: 0.3,
            date_dev: 0.3,
            sigma: 0.5,
            log_posterior: -1.0,
            skill: vec![0.1],
            difficulty: vec![0.0],
        };
        let chain: Vec<Draw> = (0..8).map(draw).collect();
        let samples = PosteriorSamples {
            chains: vec![chain; 4],
            fingerprint: None,
        };
        let report = check_convergence(&samples, &data, 1.1, 4).unwrap();
        assert!(report.max_rhat <= 1.1, "{report:?}");
    }

    #[test]
    fn short_chains_are_undefined() {
        assert!(split_rhat(&[vec![1.0, 2.0, 3.0]]).is_nan());
    }
}
