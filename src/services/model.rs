use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::config::ModelConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{MatchupFeatures, MatchupSample, FEATURE_COUNT, FEATURE_NAMES};

const EPS: f64 = 1e-12;

/// L2-regularised logistic regression over the matchup feature vector.
///
/// Fitted by Newton-Raphson with step halving. The penalty covers the
/// intercept as well, so the optimum stays finite even on tiny or one-sided
/// training sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinProbabilityModel {
    intercept: f64,
    coefficients: [f64; FEATURE_COUNT],
    iterations: usize,
    converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub samples: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
}

impl WinProbabilityModel {
    pub fn fit(samples: &[MatchupSample], config: &ModelConfig) -> PipelineResult<Self> {
        if samples.is_empty() {
            return Err(PipelineError::InsufficientTrainingData { samples: 0 });
        }
        if samples.iter().any(|s| !s.weight.is_finite() || s.weight < 0.0) {
            return Err(PipelineError::ModelFit("sample weights must be finite and non-negative".into()));
        }

        let n = samples.len();
        let dim = FEATURE_COUNT + 1;
        let rows: Vec<[f64; FEATURE_COUNT]> = samples.iter().map(|s| s.features.to_array()).collect();
        let x = DMatrix::from_fn(n, dim, |i, j| if j == 0 { 1.0 } else { rows[i][j - 1] });
        let y = DVector::from_iterator(n, samples.iter().map(MatchupSample::label));
        let w = DVector::from_iterator(n, samples.iter().map(|s| s.weight));
        let lambda = 1.0 / config.c;

        let mut theta = DVector::zeros(dim);
        let mut loss = objective(&x, &y, &w, &theta, lambda);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < config.max_iter {
            iterations += 1;

            let probs = (&x * &theta).map(sigmoid);
            let residual = (&probs - &y).component_mul(&w);
            let gradient = x.transpose() * residual + &theta * lambda;

            let curvature = probs.zip_map(&w, |p, wi| wi * p * (1.0 - p));
            let mut weighted_x = x.clone();
            for (i, mut row) in weighted_x.row_iter_mut().enumerate() {
                row *= curvature[i];
            }
            let hessian = x.transpose() * weighted_x + DMatrix::identity(dim, dim) * lambda;

            let step = hessian
                .cholesky()
                .ok_or_else(|| PipelineError::ModelFit("hessian is not positive definite".into()))?
                .solve(&gradient);

            let Some((candidate, candidate_loss, scale)) =
                line_search(&theta, &step, loss, |t| objective(&x, &y, &w, t, lambda))
            else {
                tracing::warn!("Line search stalled at iteration {}, keeping the last estimate", iterations);
                break;
            };

            let change = (&step * scale).amax();
            theta = candidate;
            loss = candidate_loss;

            if !loss.is_finite() {
                return Err(PipelineError::ModelFit("objective diverged".into()));
            }
            if change < config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            tracing::warn!("Logistic fit stopped after {} iterations without converging", iterations);
        }

        let mut coefficients = [0.0; FEATURE_COUNT];
        for (k, coef) in coefficients.iter_mut().enumerate() {
            *coef = theta[k + 1];
        }

        Ok(Self {
            intercept: theta[0],
            coefficients,
            iterations,
            converged,
        })
    }

    /// P(home win) for one feature vector.
    pub fn predict_proba(&self, features: &MatchupFeatures) -> f64 {
        let z = features
            .to_array()
            .iter()
            .zip(self.coefficients.iter())
            .fold(self.intercept, |acc, (x, b)| acc + x * b);
        sigmoid(z).clamp(0.0, 1.0)
    }

    pub fn evaluate(&self, samples: &[MatchupSample]) -> Option<ModelMetrics> {
        if samples.is_empty() {
            return None;
        }

        let probs: Vec<f64> = samples.iter().map(|s| self.predict_proba(&s.features)).collect();
        let correct = samples
            .iter()
            .zip(&probs)
            .filter(|(s, p)| (**p >= 0.5) == s.home_win)
            .count();
        let log_loss = samples
            .iter()
            .zip(&probs)
            .map(|(s, p)| {
                let p = p.clamp(EPS, 1.0 - EPS);
                -(s.label() * p.ln() + (1.0 - s.label()) * (1.0 - p).ln())
            })
            .collect::<Vec<f64>>()
            .mean();
        let brier = samples
            .iter()
            .zip(&probs)
            .map(|(s, p)| (p - s.label()).powi(2))
            .collect::<Vec<f64>>()
            .mean();

        Some(ModelMetrics {
            samples: samples.len(),
            accuracy: correct as f64 / samples.len() as f64,
            log_loss,
            brier,
        })
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn named_coefficients(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.coefficients.iter().copied()).collect()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Split date-ordered samples into (train, holdout) with the newest
/// `fraction` held out. Never shuffles.
pub fn chronological_split(samples: &[MatchupSample], fraction: f64) -> (&[MatchupSample], &[MatchupSample]) {
    let holdout = ((samples.len() as f64) * fraction).ceil() as usize;
    samples.split_at(samples.len() - holdout.min(samples.len()))
}

/// Backtrack along `-step` from `theta`, halving until the objective does not
/// increase. Gives up once the scale drops below 1e-6.
fn line_search(
    theta: &DVector<f64>,
    step: &DVector<f64>,
    loss: f64,
    objective: impl Fn(&DVector<f64>) -> f64,
) -> Option<(DVector<f64>, f64, f64)> {
    let mut scale = 1.0;
    while scale >= 1e-6 {
        let candidate = theta - step * scale;
        let candidate_loss = objective(&candidate);
        if candidate_loss <= loss + EPS {
            return Some((candidate, candidate_loss, scale));
        }
        scale *= 0.5;
    }
    None
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Numerically stable log(1 + e^z).
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn objective(x: &DMatrix<f64>, y: &DVector<f64>, w: &DVector<f64>, theta: &DVector<f64>, lambda: f64) -> f64 {
    let z = x * theta;
    let data: f64 = z
        .iter()
        .zip(y.iter())
        .zip(w.iter())
        .map(|((zi, yi), wi)| wi * (softplus(*zi) - yi * zi))
        .sum();
    data + 0.5 * lambda * theta.norm_squared()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    pub(crate) fn sample(day: i64, net_home: f64, net_away: f64, home_win: bool) -> MatchupSample {
        MatchupSample {
            game_id: format!("g{}", day),
            game_date: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap() + chrono::Duration::days(day),
            home_team_id: 1,
            away_team_id: 2,
            features: MatchupFeatures {
                rolling_net_home: net_home,
                rolling_net_away: net_away,
                b2b_home: 0.0,
                b2b_away: 0.0,
                rest_diff: 0.0,
                home_court: 1.0,
            },
            home_win,
            weight: 1.0,
        }
    }

    /// Deterministic set where the stronger side usually wins.
    pub(crate) fn synthetic_samples(n: i64) -> Vec<MatchupSample> {
        (0..n)
            .map(|i| {
                let home = ((i * 7) % 21 - 10) as f64;
                let away = ((i * 11) % 19 - 9) as f64;
                // Every fifth game is an upset to keep the data non-separable.
                let favoured = home - away + 1.0 > 0.0;
                let home_win = if i % 5 == 0 { !favoured } else { favoured };
                sample(i, home, away, home_win)
            })
            .collect()
    }

    #[test]
    fn test_fit_learns_direction_of_form() {
        let model = WinProbabilityModel::fit(&synthetic_samples(200), &ModelConfig::default()).unwrap();

        let coefficients = model.named_coefficients();
        assert!(model.converged());
        assert_eq!(coefficients[0].0, "rolling_net_home");
        assert!(coefficients[0].1 > 0.0);
        assert!(coefficients[1].1 < 0.0);
        assert!(model.predict_proba(&MatchupFeatures::upcoming(8.0, -8.0)) > 0.7);
        assert!(model.predict_proba(&MatchupFeatures::upcoming(-8.0, 8.0)) < 0.3);
    }

    #[test]
    fn test_probabilities_stay_in_unit_interval() {
        let model = WinProbabilityModel::fit(&synthetic_samples(100), &ModelConfig::default()).unwrap();
        for net in [-1e6, -50.0, 0.0, 50.0, 1e6] {
            let p = model.predict_proba(&MatchupFeatures::upcoming(net, -net));
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_fit_rejects_empty_training_set() {
        let err = WinProbabilityModel::fit(&[], &ModelConfig::default()).unwrap_err();
        assert_eq!(err, PipelineError::InsufficientTrainingData { samples: 0 });
    }

    #[test]
    fn test_single_positive_sample_still_fits() {
        let samples = vec![sample(0, 15.0, -15.0, true)];
        let model = WinProbabilityModel::fit(&samples, &ModelConfig::default()).unwrap();

        assert!(model.intercept().is_finite());
        assert!(model.predict_proba(&MatchupFeatures::upcoming(15.0, -15.0)) > 0.5);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let samples = synthetic_samples(150);
        let a = WinProbabilityModel::fit(&samples, &ModelConfig::default()).unwrap();
        let b = WinProbabilityModel::fit(&samples, &ModelConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weight_two_matches_duplicated_sample() {
        let mut weighted = synthetic_samples(60);
        weighted[3].weight = 2.0;
        let mut duplicated = synthetic_samples(60);
        duplicated.push(duplicated[3].clone());

        let a = WinProbabilityModel::fit(&weighted, &ModelConfig::default()).unwrap();
        let b = WinProbabilityModel::fit(&duplicated, &ModelConfig::default()).unwrap();
        assert_relative_eq!(a.intercept(), b.intercept(), epsilon = 1e-6);
        for ((_, ca), (_, cb)) in a.named_coefficients().into_iter().zip(b.named_coefficients()) {
            assert_relative_eq!(ca, cb, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_chronological_split_holds_out_newest() {
        let samples = synthetic_samples(10);
        let (train, holdout) = chronological_split(&samples, 0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(holdout.len(), 2);
        assert!(train.last().unwrap().game_date < holdout[0].game_date);

        let (train, holdout) = chronological_split(&samples, 0.0);
        assert_eq!((train.len(), holdout.len()), (10, 0));
    }

    #[test]
    fn test_evaluate_reports_metrics() {
        let samples = synthetic_samples(200);
        let model = WinProbabilityModel::fit(&samples, &ModelConfig::default()).unwrap();
        let metrics = model.evaluate(&samples).unwrap();

        assert_eq!(metrics.samples, 200);
        assert!(metrics.accuracy > 0.7);
        assert!(metrics.log_loss < std::f64::consts::LN_2);
        assert!(metrics.brier < 0.25);
        assert!(model.evaluate(&[]).is_none());
    }

    #[test]
    fn test_line_search_never_accepts_a_worse_point() {
        let theta = DVector::from_vec(vec![1.0]);
        let bowl = |t: &DVector<f64>| t.norm_squared();

        let (candidate, loss, scale) = line_search(&theta, &DVector::from_vec(vec![1.0]), 1.0, bowl).unwrap();
        assert_relative_eq!(candidate[0], 0.0);
        assert_relative_eq!(loss, 0.0);
        assert_relative_eq!(scale, 1.0);

        // Stepping away from the minimum: every halving is worse.
        assert!(line_search(&theta, &DVector::from_vec(vec![-1.0]), 1.0, bowl).is_none());
    }

    #[test]
    fn test_fit_without_tolerance_reports_not_converged() {
        let config = ModelConfig { tolerance: 0.0, max_iter: 50, ..ModelConfig::default() };
        let model = WinProbabilityModel::fit(&synthetic_samples(40), &config).unwrap();
        assert!(!model.converged());
        assert!(model.intercept().is_finite());
    }
}
