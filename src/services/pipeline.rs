use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    GameResult, MatchupSample, PredictionResult, RawGameRecord, ScheduledGame, TeamFormRow, TeamFormSnapshot, TeamId,
};
use crate::services::data_fetcher::{load_seasons, GameLogSource, ScheduleSource};
use crate::services::features::{build_matchups, SeasonWeighting};
use crate::services::form::{compute_form, latest_form, latest_form_before};
use crate::services::model::{chronological_split, ModelMetrics, WinProbabilityModel};
use crate::services::normalizer::normalize;
use crate::services::predictor::predict_slate;
use crate::services::teams::TeamDirectory;

/// Counts from every stage of one training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub raw_rows: usize,
    pub non_regular_season: usize,
    pub duplicates: usize,
    pub dropped_games: usize,
    pub games: usize,
    pub samples: usize,
    pub dropped_ambiguous: usize,
    pub dropped_missing_features: usize,
    pub latest_season: Option<String>,
    /// Metrics of a model fitted without the newest samples, scored on them.
    pub holdout: Option<ModelMetrics>,
    pub coefficients: Vec<(&'static str, f64)>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Everything needed to score a slate, frozen at training time.
#[derive(Debug, Clone)]
pub struct TrainedBundle {
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub model: WinProbabilityModel,
    pub latest_form: HashMap<TeamId, TeamFormSnapshot>,
    pub form: Vec<TeamFormRow>,
    pub games: Vec<GameResult>,
    pub samples: Vec<MatchupSample>,
    pub teams: TeamDirectory,
    pub report: TrainingReport,
}

impl TrainedBundle {
    /// Team form at tip-off on `date`. A date inside the trained history only
    /// sees games played before it, so started or finished games are scored
    /// without their own result.
    pub fn form_on(&self, date: NaiveDate) -> Cow<'_, HashMap<TeamId, TeamFormSnapshot>> {
        if self.latest_form.values().all(|snap| snap.date < date) {
            Cow::Borrowed(&self.latest_form)
        } else {
            Cow::Owned(latest_form_before(&self.form, date))
        }
    }
}

/// Output of one prediction cycle. `bundle` is `None` when the date had no
/// games and nothing was trained.
#[derive(Debug, Clone)]
pub struct SlateRun {
    pub bundle: Option<TrainedBundle>,
    pub games: Vec<PredictionResult>,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// normalize → form → matchups → fit.
    ///
    /// The holdout model only feeds the report; the published model is fitted
    /// on the full history.
    pub fn train(&self, raw: &[RawGameRecord]) -> PipelineResult<TrainedBundle> {
        let normalized = normalize(raw);
        let rows = compute_form(&normalized.games, &self.config.form);
        let weighting = self
            .config
            .recent_season_weight
            .and_then(|w| SeasonWeighting::from_rows(&rows, w));
        let matchups = build_matchups(&rows, weighting.as_ref());

        if matchups.samples.is_empty() {
            return Err(PipelineError::InsufficientTrainingData { samples: 0 });
        }

        let (train, holdout) = chronological_split(&matchups.samples, self.config.holdout_fraction);
        let holdout_metrics = if train.is_empty() || holdout.is_empty() {
            None
        } else {
            match WinProbabilityModel::fit(train, &self.config.model) {
                Ok(model) => model.evaluate(holdout),
                Err(e) => {
                    tracing::warn!("Holdout fit failed: {}", e);
                    None
                }
            }
        };

        let model = WinProbabilityModel::fit(&matchups.samples, &self.config.model)?;

        if let Some(metrics) = &holdout_metrics {
            tracing::info!(
                "Holdout on {} games: accuracy {:.3}, log loss {:.4}, brier {:.4}",
                metrics.samples,
                metrics.accuracy,
                metrics.log_loss,
                metrics.brier
            );
        }

        let report = TrainingReport {
            raw_rows: normalized.report.raw_rows,
            non_regular_season: normalized.report.non_regular_season,
            duplicates: normalized.report.duplicates,
            dropped_games: normalized.report.dropped_games,
            games: normalized.report.games,
            samples: matchups.samples.len(),
            dropped_ambiguous: matchups.dropped_ambiguous,
            dropped_missing_features: matchups.dropped_missing_features,
            latest_season: weighting.map(|w| w.latest_season),
            holdout: holdout_metrics,
            coefficients: model.named_coefficients(),
            intercept: model.intercept(),
            iterations: model.iterations(),
            converged: model.converged(),
        };

        tracing::info!(
            "Trained on {} matchups from {} games ({} iterations)",
            report.samples,
            report.games,
            report.iterations
        );

        Ok(TrainedBundle {
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            latest_form: latest_form(&rows),
            form: rows,
            games: normalized.games,
            samples: matchups.samples,
            teams: TeamDirectory::nba().with_log(raw),
            model,
            report,
        })
    }

    pub fn predict(
        &self,
        bundle: &TrainedBundle,
        date: NaiveDate,
        schedule: &[ScheduledGame],
    ) -> Vec<PredictionResult> {
        predict_slate(&bundle.model, schedule, &bundle.form_on(date), &bundle.teams)
    }

    /// Fetch every season; any failure aborts with no partial history.
    pub async fn load_history(
        &self,
        source: &dyn GameLogSource,
        seasons: &[String],
    ) -> PipelineResult<Vec<RawGameRecord>> {
        load_seasons(source, seasons).await
    }

    /// One full prediction cycle for `date`. An empty schedule short-circuits
    /// before any history is fetched.
    pub async fn run_cycle(
        &self,
        history: &dyn GameLogSource,
        schedule: &dyn ScheduleSource,
        seasons: &[String],
        date: NaiveDate,
    ) -> PipelineResult<SlateRun> {
        let board = schedule.fetch_scoreboard(date).await?;
        if board.scheduled.is_empty() {
            tracing::info!("No games on {} according to {}", date, schedule.name());
            return Ok(SlateRun { bundle: None, games: Vec::new() });
        }

        let raw = self.load_history(history, seasons).await?;
        let bundle = self.train(&raw)?;
        let games = self.predict(&bundle, date, &board.scheduled);
        Ok(SlateRun { bundle: Some(bundle), games })
    }
}
