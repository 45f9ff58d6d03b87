use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, SqliteGameLog};
use crate::error::PipelineResult;
use crate::models::{SlateResponse, TeamHistory, TeamId};
use crate::services::{
    build_team_history, GameLogSource, Pipeline, ScheduleSource, StatsNbaClient, TeamHistoryCache, TrainedBundle,
    TrainingReport,
};
use crate::utils::parse_slate_date;

/// Games listed per team-history response.
const TEAM_HISTORY_LIMIT: usize = 10;

/// Shared server state. The trained bundle is swapped whole on retrain; a
/// failed retrain leaves the previous bundle in place.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    history: Arc<dyn GameLogSource>,
    schedule: Arc<dyn ScheduleSource>,
    bundle: Arc<RwLock<Option<Arc<TrainedBundle>>>>,
    team_cache: Arc<Mutex<TeamHistoryCache>>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        history: Arc<dyn GameLogSource>,
        schedule: Arc<dyn ScheduleSource>,
    ) -> Self {
        let team_cache = TeamHistoryCache::new(config.team_history_cache_size, config.team_history_ttl);
        Self {
            pool,
            pipeline: Arc::new(Pipeline::new(config.pipeline.clone())),
            config: Arc::new(config),
            history,
            schedule,
            bundle: Arc::new(RwLock::new(None)),
            team_cache: Arc::new(Mutex::new(team_cache)),
        }
    }

    pub async fn current_bundle(&self) -> Option<Arc<TrainedBundle>> {
        self.bundle.read().await.clone()
    }

    /// Refresh the history (falling back to the local cache) and train a new bundle.
    pub async fn retrain(&self) -> PipelineResult<Arc<TrainedBundle>> {
        let seasons = &self.config.seasons;
        let raw = match db::refresh_cache(&self.pool, self.history.as_ref(), seasons).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("History refresh failed ({}), training from local cache", e);
                let cache = SqliteGameLog::new(self.pool.clone());
                self.pipeline.load_history(&cache, seasons).await?
            }
        };

        let bundle = Arc::new(self.pipeline.train(&raw)?);
        *self.bundle.write().await = Some(bundle.clone());
        if let Ok(mut cache) = self.team_cache.lock() {
            if !cache.is_empty() {
                tracing::debug!("Dropping {} cached team histories", cache.len());
            }
            cache.clear();
        }

        tracing::info!("Model {} published", bundle.run_id);
        Ok(bundle)
    }

    /// Predictions for `date`. Upstream or model failures degrade to the last
    /// stored slate for the date, flagged stale, or to an empty slate with a reason.
    pub async fn slate_for(&self, date: NaiveDate) -> SlateResponse {
        let board = match self.schedule.fetch_scoreboard(date).await {
            Ok(board) => board,
            Err(e) => return self.fallback_slate(date, e.to_string()).await,
        };
        if board.scheduled.is_empty() {
            return SlateResponse::fresh(Vec::new());
        }

        let Some(bundle) = self.current_bundle().await else {
            return self.fallback_slate(date, "model has not been trained yet".to_string()).await;
        };

        let games = self.pipeline.predict(&bundle, date, &board.scheduled);
        if let Err(e) = db::save_slate(&self.pool, bundle.run_id, date, &games).await {
            tracing::warn!("Failed to store slate for {}: {}", date, e);
        }
        SlateResponse::fresh(games)
    }

    async fn fallback_slate(&self, date: NaiveDate, reason: String) -> SlateResponse {
        tracing::warn!("Serving fallback slate for {}: {}", date, reason);
        match db::latest_slate(&self.pool, date).await {
            Ok(Some(games)) => SlateResponse::degraded(games, true, reason),
            Ok(None) => SlateResponse::degraded(Vec::new(), false, reason),
            Err(e) => SlateResponse::degraded(Vec::new(), false, format!("{}; slate store: {}", reason, e)),
        }
    }

    /// Cached team history from the current bundle's games.
    pub async fn team_history(&self, team_id: TeamId) -> Option<TeamHistory> {
        let now = Utc::now();
        if let Some(hit) = self.cached_history(team_id, now) {
            return Some(hit);
        }

        let bundle = self.current_bundle().await?;
        bundle.teams.get(team_id)?;
        let history = build_team_history(&bundle.games, team_id, &bundle.teams, TEAM_HISTORY_LIMIT);
        if let Ok(mut cache) = self.team_cache.lock() {
            cache.insert(history.clone(), now);
        }
        Some(history)
    }

    fn cached_history(&self, team_id: TeamId, now: DateTime<Utc>) -> Option<TeamHistory> {
        let mut cache = self.team_cache.lock().ok()?;
        cache.get(team_id, now)
    }
}

pub async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let client = Arc::new(StatsNbaClient::new(&config)?);
    let state = AppState::new(config, pool, client.clone(), client);

    if let Err(e) = state.retrain().await {
        tracing::error!("Initial training failed, serving without a model: {}", e);
    }
    spawn_retrain_loop(state.clone());

    let app = create_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Courtside API server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_retrain_loop(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.retrain_interval);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if let Err(e) = state.retrain().await {
                tracing::warn!("Scheduled retrain failed, keeping previous model: {}", e);
            }
        }
    });
}

fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/predict/today", get(predict_today_handler))
        .route("/predict/{date}", get(predict_date_handler))
        .route("/results/{date}", get(results_handler))
        .route("/team-history/{team_id}", get(team_history_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_trained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trained_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<TrainingReport>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let bundle = state.current_bundle().await;
    Json(HealthResponse {
        status: "ok",
        model_trained: bundle.is_some(),
        run_id: bundle.as_ref().map(|b| b.run_id),
        trained_at: bundle.as_ref().map(|b| b.trained_at),
        report: bundle.map(|b| b.report.clone()),
    })
}

// GET /predict/today
async fn predict_today_handler(State(state): State<AppState>) -> Json<SlateResponse> {
    let today = chrono::Local::now().date_naive();
    Json(state.slate_for(today).await)
}

// GET /predict/{date} - date as YYYY-MM-DD
async fn predict_date_handler(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<SlateResponse>, StatusCode> {
    let date = parse_slate_date(&date).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(state.slate_for(date).await))
}

// GET /results/{date} - final scores, passed through from the schedule source
async fn results_handler(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let date = parse_slate_date(&date).map_err(|_| StatusCode::BAD_REQUEST)?;
    match state.schedule.fetch_scoreboard(date).await {
        Ok(board) => Ok(Json(json!({ "games": board.completed }))),
        Err(e) => {
            tracing::error!("Failed to fetch results for {}: {}", date, e);
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

// GET /team-history/{team_id}
async fn team_history_handler(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
) -> Result<Json<TeamHistory>, StatusCode> {
    if state.current_bundle().await.is_none() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    state.team_history(team_id).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::{PredictionResult, ScheduledGame, Scoreboard};
    use crate::services::data_fetcher::tests::StubSource;
    use crate::services::data_fetcher::{parse_scoreboard, StatsResponse};
    use crate::services::normalizer::tests::game_pair;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    const SEASON: &str = "2024-25";
    const BOS: TeamId = 1610612738;
    const NYK: TeamId = 1610612752;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, day).unwrap()
    }

    fn config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            seasons: vec![SEASON.to_string()],
            league_id: "00".to_string(),
            stats_api_base: "http://localhost".to_string(),
            http_timeout: Duration::from_secs(1),
            http_max_retries: 1,
            http_backoff_secs: 0,
            pipeline: PipelineConfig::default(),
            team_history_cache_size: 4,
            team_history_ttl: Duration::from_secs(60),
            retrain_interval: Duration::from_secs(3600),
        }
    }

    fn history() -> Vec<crate::models::RawGameRecord> {
        let mut raw = Vec::new();
        for (i, day) in (1..=9).enumerate() {
            let margin = if i % 3 == 2 { -4 } else { 8 };
            raw.extend(game_pair(&format!("h{}", day), "22024", d(day), (BOS, "BOS", 110 + margin), (NYK, "NYK", 110)));
        }
        raw
    }

    fn slate() -> Scoreboard {
        Scoreboard {
            scheduled: vec![ScheduledGame {
                game_id: "next".to_string(),
                home_team_id: BOS,
                away_team_id: NYK,
                game_time: Some("7:30 pm ET".to_string()),
            }],
            completed: Vec::new(),
        }
    }

    async fn state(source: StubSource) -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_database_with_pool(&pool).await.unwrap();
        let source = Arc::new(source);
        AppState::new(config(), pool, source.clone(), source)
    }

    #[tokio::test]
    async fn test_retrain_publishes_bundle_and_predicts() {
        let state = state(StubSource::new(SEASON, history(), Some(slate()))).await;
        assert!(state.current_bundle().await.is_none());

        let bundle = state.retrain().await.unwrap();
        assert_eq!(state.current_bundle().await.unwrap().run_id, bundle.run_id);

        let response = state.slate_for(d(20)).await;
        assert!(!response.stale);
        assert_eq!(response.games.len(), 1);
        assert_eq!(response.games[0].home_team, "Boston Celtics");

        let stored = db::latest_slate(&state.pool, d(20)).await.unwrap().unwrap();
        assert_eq!(stored, response.games);
    }

    #[tokio::test]
    async fn test_failed_retrain_keeps_previous_bundle() {
        let state = state(StubSource::new(SEASON, history(), Some(slate()))).await;
        let first = state.retrain().await.unwrap();

        let mut broken = state.clone();
        broken.config = Arc::new(Config {
            seasons: vec!["1999-00".to_string()],
            ..config()
        });
        assert!(broken.retrain().await.is_err());
        assert_eq!(state.current_bundle().await.unwrap().run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_schedule_outage_serves_stale_slate() {
        let state = state(StubSource::new(SEASON, history(), None)).await;

        let empty = state.slate_for(d(20)).await;
        assert!(empty.games.is_empty());
        assert!(!empty.stale);
        assert!(empty.reason.is_some());

        let stored = PredictionResult {
            game_id: "next".to_string(),
            home_team_id: BOS,
            home_team: "Boston Celtics".to_string(),
            away_team_id: NYK,
            away_team: "New York Knicks".to_string(),
            home_win_prob: 0.64,
            game_time: None,
            rank: Some(1),
        };
        db::save_slate(&state.pool, Uuid::new_v4(), d(20), &[stored.clone()]).await.unwrap();

        let stale = state.slate_for(d(20)).await;
        assert!(stale.stale);
        assert_eq!(stale.games, vec![stored]);
    }

    #[tokio::test]
    async fn test_game_in_progress_stays_on_slate() {
        let response: StatsResponse = serde_json::from_value(json!({
            "resultSets": [
                {
                    "name": "GameHeader",
                    "headers": ["GAME_ID", "GAME_STATUS_ID", "GAME_STATUS_TEXT", "HOME_TEAM_ID", "VISITOR_TEAM_ID"],
                    "rowSet": [["h9", 2, "Q3 5:12", BOS, NYK]]
                },
                {
                    "name": "LineScore",
                    "headers": ["GAME_ID", "TEAM_ID", "TEAM_ABBREVIATION", "PTS"],
                    "rowSet": [["h9", BOS, "BOS", 71], ["h9", NYK, "NYK", 64]]
                }
            ]
        }))
        .unwrap();
        let board = parse_scoreboard(&response).unwrap();
        let state = state(StubSource::new(SEASON, history(), Some(board))).await;
        state.retrain().await.unwrap();

        let live = state.slate_for(d(9)).await;
        assert!(!live.stale);
        assert!(live.reason.is_none());
        assert_eq!(live.games.len(), 1);
        assert_eq!(live.games[0].game_id, "h9");
        assert_eq!(live.games[0].game_time, None);

        // Scored from the eight games before tip-off, not the finished log.
        let bundle = state.current_bundle().await.unwrap();
        assert_eq!(bundle.form_on(d(9))[&BOS].date, d(8));
    }

    #[tokio::test]
    async fn test_empty_schedule_without_model_is_plain_empty() {
        let state = state(StubSource::new(SEASON, history(), Some(Scoreboard::default()))).await;
        let response = state.slate_for(d(20)).await;
        assert_eq!(serde_json::to_value(response).unwrap(), json!({ "games": [] }));
    }

    #[tokio::test]
    async fn test_team_history_is_cached() {
        let state = state(StubSource::new(SEASON, history(), Some(slate()))).await;
        assert!(state.team_history(BOS).await.is_none());

        state.retrain().await.unwrap();
        let boston = state.team_history(BOS).await.unwrap();
        assert_eq!(boston.form, "LWWLW");
        assert_eq!(boston.history[0].opponent, "New York Knicks");
        assert_eq!(state.team_cache.lock().unwrap().len(), 1);

        assert!(state.team_history(42).await.is_none());
    }
}
