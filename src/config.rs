use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on HTTP_MAX_RETRIES; backoff doubles per attempt.
pub const MAX_HTTP_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct FormConfig {
    /// Trailing games averaged into the rolling net rating.
    pub window: usize,
    /// Games required before the rolling net rating is defined.
    pub min_games: usize,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self { window: 10, min_games: 3 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Inverse L2 regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { c: 1.0, max_iter: 100, tolerance: 1e-8 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub form: FormConfig,
    pub model: ModelConfig,
    /// Weight of the most recent season's games; `None` trains unweighted.
    pub recent_season_weight: Option<f64>,
    /// Share of the latest samples held out for evaluation.
    pub holdout_fraction: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            form: FormConfig::default(),
            model: ModelConfig::default(),
            recent_season_weight: Some(1.5),
            holdout_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub seasons: Vec<String>,
    pub league_id: String,
    pub stats_api_base: String,
    pub http_timeout: Duration,
    pub http_max_retries: u32,
    pub http_backoff_secs: u64,
    pub pipeline: PipelineConfig,
    pub team_history_cache_size: usize,
    pub team_history_ttl: Duration,
    pub retrain_interval: Duration,
}

impl Config {
    /// Build configuration from the environment (after `dotenv` has run).
    pub fn from_env() -> Result<Self> {
        let seasons = env::var("NBA_SEASONS")
            .unwrap_or_else(|_| "2023-24,2024-25,2025-26".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let recent_weight: f64 = env_or("RECENT_SEASON_WEIGHT", 1.5)?;

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/courtside.db".to_string()),
            seasons,
            league_id: env::var("NBA_LEAGUE_ID").unwrap_or_else(|_| "00".to_string()),
            stats_api_base: env::var("STATS_API_BASE")
                .unwrap_or_else(|_| "https://stats.nba.com/stats".to_string()),
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 30)?),
            http_max_retries: env_or("HTTP_MAX_RETRIES", 3)?,
            http_backoff_secs: env_or("HTTP_BACKOFF_SECS", 2)?,
            pipeline: PipelineConfig {
                form: FormConfig {
                    window: env_or("ROLLING_WINDOW", 10)?,
                    min_games: env_or("ROLLING_MIN_GAMES", 3)?,
                },
                model: ModelConfig {
                    c: env_or("MODEL_C", 1.0)?,
                    max_iter: env_or("MODEL_MAX_ITER", 100)?,
                    ..ModelConfig::default()
                },
                recent_season_weight: (recent_weight > 0.0).then_some(recent_weight),
                holdout_fraction: env_or("HOLDOUT_FRACTION", 0.2)?,
            },
            team_history_cache_size: env_or("TEAM_HISTORY_CACHE_SIZE", 32)?,
            team_history_ttl: Duration::from_secs(env_or("TEAM_HISTORY_TTL_SECS", 3600)?),
            retrain_interval: Duration::from_secs(env_or::<u64>("RETRAIN_INTERVAL_HOURS", 12)? * 3600),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seasons.is_empty() {
            bail!("NBA_SEASONS must name at least one season, e.g. 2024-25");
        }
        let form = &self.pipeline.form;
        if form.min_games == 0 || form.min_games > form.window {
            bail!("ROLLING_MIN_GAMES must be between 1 and ROLLING_WINDOW ({})", form.window);
        }
        if !(0.0..1.0).contains(&self.pipeline.holdout_fraction) {
            bail!("HOLDOUT_FRACTION must be in [0, 1)");
        }
        let c = self.pipeline.model.c;
        if !c.is_finite() || c <= 0.0 {
            bail!("MODEL_C must be a positive finite number");
        }
        if self.http_max_retries > MAX_HTTP_RETRIES {
            bail!("HTTP_MAX_RETRIES must be at most {}", MAX_HTTP_RETRIES);
        }
        if self.team_history_cache_size == 0 {
            bail!("TEAM_HISTORY_CACHE_SIZE must be positive");
        }
        if self.retrain_interval.is_zero() {
            bail!("RETRAIN_INTERVAL_HOURS must be positive");
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}='{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}
