use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::*;
use crate::services::data_fetcher::GameLogSource;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if let Some(parent) = std::path::Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Called from the CLI where no pool exists yet.
pub async fn init_database(database_url: &str) -> Result<SqlitePool> {
    let pool = create_pool(database_url).await?;
    init_database_with_pool(&pool).await?;
    Ok(pool)
}

pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    // Raw provider lines, one row per team per game, replaced a season at a time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS game_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            season TEXT NOT NULL,
            season_id TEXT NOT NULL,
            team_id INTEGER NOT NULL,
            team_abbreviation TEXT NOT NULL,
            team_name TEXT NOT NULL,
            game_id TEXT NOT NULL,
            game_date TEXT NOT NULL,
            matchup TEXT NOT NULL,
            wl TEXT,
            pts INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetch_log (
            season       TEXT PRIMARY KEY,
            last_fetched TEXT NOT NULL,
            rows         INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Published slates; the newest run per date is the last-known-good output
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            run_id TEXT NOT NULL,
            slate_date TEXT NOT NULL,
            game_id TEXT NOT NULL,
            home_id INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_id INTEGER NOT NULL,
            away_team TEXT NOT NULL,
            home_win_prob REAL NOT NULL,
            game_time TEXT,
            rank INTEGER,
            created_at TEXT NOT NULL,
            PRIMARY KEY (run_id, game_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_game_logs_season ON game_logs(season)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_predictions_date ON predictions(slate_date, created_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

// Game log operations

/// Swap a season's cached lines for `records` in one transaction.
pub async fn replace_season_log(pool: &SqlitePool, season: &str, records: &[RawGameRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM game_logs WHERE season = ?")
        .bind(season)
        .execute(&mut *tx)
        .await?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO game_logs
            (season, season_id, team_id, team_abbreviation, team_name, game_id, game_date, matchup, wl, pts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(season)
        .bind(&record.season_id)
        .bind(record.team_id)
        .bind(&record.team_abbreviation)
        .bind(&record.team_name)
        .bind(&record.game_id)
        .bind(record.game_date.format(DATE_FORMAT).to_string())
        .bind(&record.matchup)
        .bind(&record.wl)
        .bind(record.pts)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("INSERT OR REPLACE INTO fetch_log (season, last_fetched, rows) VALUES (?, ?, ?)")
        .bind(season)
        .bind(Utc::now().to_rfc3339())
        .bind(records.len() as i64)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!("Cached {} game lines for {}", records.len(), season);
    Ok(())
}

/// Fetch every season from `source`, then overwrite the cache. Nothing is
/// written unless all seasons arrived.
pub async fn refresh_cache(
    pool: &SqlitePool,
    source: &dyn GameLogSource,
    seasons: &[String],
) -> Result<Vec<RawGameRecord>> {
    let mut fetched = Vec::with_capacity(seasons.len());
    for season in seasons {
        fetched.push((season, source.fetch_game_log(season).await?));
    }

    let mut all = Vec::new();
    for (season, records) in fetched {
        replace_season_log(pool, season, &records).await?;
        all.extend(records);
    }
    Ok(all)
}

/// Cached lines for a season in the order they were fetched.
pub async fn load_season_log(pool: &SqlitePool, season: &str) -> Result<Vec<RawGameRecord>> {
    let rows = sqlx::query("SELECT * FROM game_logs WHERE season = ? ORDER BY id")
        .bind(season)
        .fetch_all(pool)
        .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(RawGameRecord {
            season_id: row.get("season_id"),
            team_id: row.get("team_id"),
            team_abbreviation: row.get("team_abbreviation"),
            team_name: row.get("team_name"),
            game_id: row.get("game_id"),
            game_date: NaiveDate::parse_from_str(&row.get::<String, _>("game_date"), DATE_FORMAT)?,
            matchup: row.get("matchup"),
            wl: row.get("wl"),
            pts: row.get("pts"),
        });
    }

    Ok(records)
}

/// When a season was last cached and how many lines it holds.
pub async fn last_fetched(pool: &SqlitePool, season: &str) -> Result<Option<(DateTime<Utc>, i64)>> {
    let row = sqlx::query("SELECT last_fetched, rows FROM fetch_log WHERE season = ?")
        .bind(season)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = row {
        let at = DateTime::parse_from_rfc3339(&row.get::<String, _>("last_fetched"))?.with_timezone(&Utc);
        Ok(Some((at, row.get("rows"))))
    } else {
        Ok(None)
    }
}

// Slate operations

pub async fn save_slate(pool: &SqlitePool, run_id: Uuid, date: NaiveDate, games: &[PredictionResult]) -> Result<()> {
    let mut tx = pool.begin().await?;
    let created_at = Utc::now().to_rfc3339();

    for game in games {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO predictions
            (run_id, slate_date, game_id, home_id, home_team, away_id, away_team,
             home_win_prob, game_time, rank, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.to_string())
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(&game.game_id)
        .bind(game.home_team_id)
        .bind(&game.home_team)
        .bind(game.away_team_id)
        .bind(&game.away_team)
        .bind(game.home_win_prob)
        .bind(&game.game_time)
        .bind(game.rank.map(|r| r as i64))
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// The most recently published slate for `date`, in rank order.
pub async fn latest_slate(pool: &SqlitePool, date: NaiveDate) -> Result<Option<Vec<PredictionResult>>> {
    let date = date.format(DATE_FORMAT).to_string();
    let run = sqlx::query(
        "SELECT run_id FROM predictions WHERE slate_date = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(&date)
    .fetch_optional(pool)
    .await?;

    let Some(run) = run else {
        return Ok(None);
    };
    let run_id: String = run.get("run_id");

    let rows = sqlx::query("SELECT * FROM predictions WHERE run_id = ? AND slate_date = ? ORDER BY rank, game_id")
        .bind(&run_id)
        .bind(&date)
        .fetch_all(pool)
        .await?;

    let games = rows
        .into_iter()
        .map(|row| PredictionResult {
            game_id: row.get("game_id"),
            home_team_id: row.get("home_id"),
            home_team: row.get("home_team"),
            away_team_id: row.get("away_id"),
            away_team: row.get("away_team"),
            home_win_prob: row.get("home_win_prob"),
            game_time: row.get("game_time"),
            rank: row.get::<Option<i64>, _>("rank").map(|r| r as usize),
        })
        .collect();

    Ok(Some(games))
}

/// Game log source backed by the local cache, for offline runs.
pub struct SqliteGameLog {
    pool: SqlitePool,
}

impl SqliteGameLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameLogSource for SqliteGameLog {
    async fn fetch_game_log(&self, season: &str) -> PipelineResult<Vec<RawGameRecord>> {
        let records = load_season_log(&self.pool, season)
            .await
            .map_err(|e| PipelineError::source_unavailable(self.name(), e))?;
        if records.is_empty() {
            return Err(PipelineError::source_unavailable(
                self.name(),
                format!("season {} is not cached, run `fetch` first", season),
            ));
        }
        Ok(records)
    }

    fn name(&self) -> &str {
        "local cache"
    }
}

/// Upstream game log that writes every season it fetches through to the cache.
pub struct CachingGameLog<'a> {
    pool: SqlitePool,
    upstream: &'a dyn GameLogSource,
}

impl<'a> CachingGameLog<'a> {
    pub fn new(pool: SqlitePool, upstream: &'a dyn GameLogSource) -> Self {
        Self { pool, upstream }
    }
}

#[async_trait]
impl<'a> GameLogSource for CachingGameLog<'a> {
    async fn fetch_game_log(&self, season: &str) -> PipelineResult<Vec<RawGameRecord>> {
        let records = self.upstream.fetch_game_log(season).await?;
        if let Err(e) = replace_season_log(&self.pool, season, &records).await {
            tracing::warn!("Failed to cache {} game log: {}", season, e);
        }
        Ok(records)
    }

    fn name(&self) -> &str {
        self.upstream.name()
    }
}
