use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{CompletedGame, RawGameRecord, ScheduledGame, Scoreboard, TeamId};

/// Provider of per-team game lines.
#[async_trait]
pub trait GameLogSource: Send + Sync {
    /// All team lines for one season, e.g. "2024-25".
    async fn fetch_game_log(&self, season: &str) -> PipelineResult<Vec<RawGameRecord>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Provider of the games on a given date.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_scoreboard(&self, date: NaiveDate) -> PipelineResult<Scoreboard>;

    fn name(&self) -> &str;
}

/// Concatenate several seasons. Any failing season fails the whole load, so
/// callers never see a partial history.
pub async fn load_seasons(source: &dyn GameLogSource, seasons: &[String]) -> PipelineResult<Vec<RawGameRecord>> {
    let mut records = Vec::new();
    for season in seasons {
        let batch = source.fetch_game_log(season).await?;
        tracing::info!("Loaded {} {} game lines from {}", batch.len(), season, source.name());
        records.extend(batch);
    }
    Ok(records)
}

// ── stats.nba.com structures ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatsResponse {
    #[serde(rename = "resultSets")]
    pub result_sets: Vec<ResultSet>,
}

/// One table of a stats.nba.com response: named columns plus rows of values.
#[derive(Debug, Deserialize)]
pub struct ResultSet {
    pub name: String,
    pub headers: Vec<String>,
    #[serde(rename = "rowSet")]
    pub row_set: Vec<Vec<Value>>,
}

impl StatsResponse {
    pub fn result_set(&self, name: &str) -> Result<&ResultSet> {
        self.result_sets
            .iter()
            .find(|rs| rs.name == name)
            .ok_or_else(|| anyhow!("result set {} missing", name))
    }
}

impl ResultSet {
    fn columns(&self, wanted: &[&str]) -> Result<HashMap<String, usize>> {
        wanted
            .iter()
            .map(|col| {
                self.headers
                    .iter()
                    .position(|h| h == col)
                    .map(|idx| (col.to_string(), idx))
                    .ok_or_else(|| anyhow!("{} has no {} column", self.name, col))
            })
            .collect()
    }
}

struct Row<'a> {
    values: &'a [Value],
    columns: &'a HashMap<String, usize>,
}

impl<'a> Row<'a> {
    fn value(&self, col: &str) -> Option<&'a Value> {
        self.columns.get(col).and_then(|idx| self.values.get(*idx))
    }

    fn str(&self, col: &str) -> Option<&'a str> {
        self.value(col).and_then(Value::as_str)
    }

    fn i64(&self, col: &str) -> Option<i64> {
        match self.value(col)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn string(&self, col: &str) -> Option<String> {
        match self.value(col)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

const GAME_LOG_COLUMNS: [&str; 9] = [
    "SEASON_ID",
    "TEAM_ID",
    "TEAM_ABBREVIATION",
    "TEAM_NAME",
    "GAME_ID",
    "GAME_DATE",
    "MATCHUP",
    "WL",
    "PTS",
];

/// Parse a `leaguegamefinder` payload. Rows with unusable values are skipped.
pub fn parse_game_log(response: &StatsResponse) -> Result<Vec<RawGameRecord>> {
    let set = response
        .result_sets
        .first()
        .ok_or_else(|| anyhow!("leaguegamefinder returned no result sets"))?;
    let columns = set.columns(&GAME_LOG_COLUMNS)?;

    let mut records = Vec::with_capacity(set.row_set.len());
    let mut skipped = 0usize;
    for values in &set.row_set {
        let row = Row { values, columns: &columns };
        match parse_game_line(&row) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} unparseable game log rows", skipped);
    }
    Ok(records)
}

fn parse_game_line(row: &Row<'_>) -> Option<RawGameRecord> {
    let date_text = row.str("GAME_DATE")?;
    // "2024-10-22" or "2024-10-22T00:00:00"
    let game_date = NaiveDate::parse_from_str(date_text.get(..10)?, "%Y-%m-%d").ok()?;

    Some(RawGameRecord {
        season_id: row.string("SEASON_ID")?,
        team_id: row.i64("TEAM_ID")?,
        team_abbreviation: row.str("TEAM_ABBREVIATION")?.to_string(),
        team_name: row.str("TEAM_NAME").unwrap_or_default().to_string(),
        game_id: row.string("GAME_ID")?,
        game_date,
        matchup: row.str("MATCHUP")?.to_string(),
        wl: row.str("WL").map(str::to_string),
        pts: row.i64("PTS")? as i32,
    })
}

/// Parse a `scoreboardv2` payload into the date's games and final scores.
pub fn parse_scoreboard(response: &StatsResponse) -> Result<Scoreboard> {
    let header = response.result_set("GameHeader")?;
    let header_cols = header.columns(&[
        "GAME_ID",
        "GAME_STATUS_ID",
        "GAME_STATUS_TEXT",
        "HOME_TEAM_ID",
        "VISITOR_TEAM_ID",
    ])?;

    let line_score = response.result_set("LineScore")?;
    let line_cols = line_score.columns(&["GAME_ID", "TEAM_ID", "TEAM_ABBREVIATION", "PTS"])?;

    let mut points: HashMap<(String, TeamId), (String, Option<i64>)> = HashMap::new();
    for values in &line_score.row_set {
        let row = Row { values, columns: &line_cols };
        if let (Some(game_id), Some(team_id), Some(abbr)) =
            (row.string("GAME_ID"), row.i64("TEAM_ID"), row.str("TEAM_ABBREVIATION"))
        {
            points.insert((game_id, team_id), (abbr.to_string(), row.i64("PTS")));
        }
    }

    let mut scoreboard = Scoreboard::default();
    for values in &header.row_set {
        let row = Row { values, columns: &header_cols };
        let (Some(game_id), Some(home), Some(away)) =
            (row.string("GAME_ID"), row.i64("HOME_TEAM_ID"), row.i64("VISITOR_TEAM_ID"))
        else {
            tracing::warn!("Skipping scoreboard row without game or team ids");
            continue;
        };
        if scoreboard.scheduled.iter().any(|g| g.game_id == game_id) {
            continue;
        }

        // 1 = scheduled, 2 = in progress, 3 = final. Every game on the board
        // stays on the slate; only tip-off times are kept as `game_time`.
        let status = row.i64("GAME_STATUS_ID");
        if status == Some(3) {
            let home_line = points.get(&(game_id.clone(), home));
            let away_line = points.get(&(game_id.clone(), away));
            if let (Some((home_abbr, Some(home_pts))), Some((away_abbr, Some(away_pts)))) = (home_line, away_line) {
                scoreboard.completed.push(CompletedGame {
                    game_id: game_id.clone(),
                    home_team: home_abbr.clone(),
                    home_score: *home_pts as i32,
                    away_team: away_abbr.clone(),
                    away_score: *away_pts as i32,
                });
            }
        }

        scoreboard.scheduled.push(ScheduledGame {
            game_id,
            home_team_id: home,
            away_team_id: away,
            game_time: row
                .str("GAME_STATUS_TEXT")
                .filter(|_| status == Some(1))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        });
    }

    Ok(scoreboard)
}

// ── StatsNbaClient ───────────────────────────────────────────────────────────

/// Wait before the next try: `base * 2^(attempt - 1)` seconds, saturating.
fn backoff_delay(base_secs: u64, attempt: u32) -> u64 {
    base_secs.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

pub struct StatsNbaClient {
    client: Client,
    base_url: String,
    league_id: String,
    max_retries: u32,
    backoff_secs: u64,
}

impl StatsNbaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36")
            .build()?;

        Ok(Self {
            client,
            base_url: config.stats_api_base.trim_end_matches('/').to_string(),
            league_id: config.league_id.clone(),
            max_retries: config.http_max_retries.max(1),
            backoff_secs: config.http_backoff_secs,
        })
    }

    /// GET a stats endpoint, retrying 429/5xx/transport failures with exponential backoff.
    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<StatsResponse> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = self
                .client
                .get(&url)
                .query(query)
                .header("Referer", "https://www.nba.com/")
                .header("Origin", "https://www.nba.com")
                .header("Accept", "application/json, text/plain, */*")
                .send()
                .await;

            let retry_reason = match outcome {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json().await?),
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS || resp.status().is_server_error() => {
                    format!("HTTP {}", resp.status())
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(anyhow!("{} error {}: {}", endpoint, status, body));
                }
                Err(e) => e.to_string(),
            };

            if attempts >= self.max_retries {
                return Err(anyhow!("{} failed after {} attempts: {}", endpoint, attempts, retry_reason));
            }

            let wait = backoff_delay(self.backoff_secs, attempts);
            tracing::warn!("{} {}, retrying in {}s (attempt {})", endpoint, retry_reason, wait, attempts);
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }

    fn name_str(&self) -> &str {
        "stats.nba.com"
    }
}

#[async_trait]
impl GameLogSource for StatsNbaClient {
    async fn fetch_game_log(&self, season: &str) -> PipelineResult<Vec<RawGameRecord>> {
        tracing::info!("Fetching {} game log from stats.nba.com…", season);
        let query = [
            ("PlayerOrTeam", "T".to_string()),
            ("LeagueID", self.league_id.clone()),
            ("Season", season.to_string()),
        ];

        let response = self
            .get("leaguegamefinder", &query)
            .await
            .map_err(|e| PipelineError::source_unavailable(self.name_str(), e))?;
        parse_game_log(&response).map_err(|e| PipelineError::source_unavailable(self.name_str(), e))
    }

    fn name(&self) -> &str {
        self.name_str()
    }
}

#[async_trait]
impl ScheduleSource for StatsNbaClient {
    async fn fetch_scoreboard(&self, date: NaiveDate) -> PipelineResult<Scoreboard> {
        let query = [
            ("GameDate", date.format("%m/%d/%Y").to_string()),
            ("LeagueID", self.league_id.clone()),
            ("DayOffset", "0".to_string()),
        ];

        let response = self
            .get("scoreboardv2", &query)
            .await
            .map_err(|e| PipelineError::source_unavailable(self.name_str(), e))?;
        parse_scoreboard(&response).map_err(|e| PipelineError::source_unavailable(self.name_str(), e))
    }

    fn name(&self) -> &str {
        self.name_str()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory source for pipeline tests.
    pub(crate) struct StubSource {
        pub seasons: HashMap<String, Vec<RawGameRecord>>,
        pub scoreboard: Option<Scoreboard>,
        pub calls: Mutex<usize>,
    }

    impl StubSource {
        pub(crate) fn new(season: &str, records: Vec<RawGameRecord>, scoreboard: Option<Scoreboard>) -> Self {
            Self {
                seasons: [(season.to_string(), records)].into_iter().collect(),
                scoreboard,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl GameLogSource for StubSource {
        async fn fetch_game_log(&self, season: &str) -> PipelineResult<Vec<RawGameRecord>> {
            *self.calls.lock().unwrap() += 1;
            self.seasons
                .get(season)
                .cloned()
                .ok_or_else(|| PipelineError::source_unavailable("stub", format!("no season {}", season)))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[async_trait]
    impl ScheduleSource for StubSource {
        async fn fetch_scoreboard(&self, _date: NaiveDate) -> PipelineResult<Scoreboard> {
            self.scoreboard
                .clone()
                .ok_or_else(|| PipelineError::source_unavailable("stub", "scoreboard offline"))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn game_log_payload() -> StatsResponse {
        serde_json::from_value(json!({
            "resource": "leaguegamefinder",
            "resultSets": [{
                "name": "LeagueGameFinderResults",
                "headers": ["SEASON_ID", "TEAM_ID", "TEAM_ABBREVIATION", "TEAM_NAME", "GAME_ID",
                            "GAME_DATE", "MATCHUP", "WL", "MIN", "PTS", "PLUS_MINUS"],
                "rowSet": [
                    ["22024", 1610612738, "BOS", "Boston Celtics", "0022400061", "2024-10-22", "BOS vs. NYK", "W", 240, 132, 23.0],
                    ["22024", 1610612752, "NYK", "New York Knicks", "0022400061", "2024-10-22", "NYK @ BOS", "L", 240, 109, -23.0],
                    ["22024", 1610612752, "NYK", "New York Knicks", "0022400099", "not-a-date", "NYK vs. IND", "W", 240, 123, 5.0],
                    ["22024", 1610612754, "IND", "Indiana Pacers", "0022400099", "2024-10-25", "IND @ NYK", null, 240, null, null]
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_game_log_skips_bad_rows() {
        let records = parse_game_log(&game_log_payload()).unwrap();
        assert_eq!(records.len(), 2);

        let bos = &records[0];
        assert_eq!(bos.season_id, "22024");
        assert_eq!(bos.team_id, 1610612738);
        assert_eq!(bos.game_id, "0022400061");
        assert_eq!(bos.game_date, NaiveDate::from_ymd_opt(2024, 10, 22).unwrap());
        assert_eq!(bos.wl.as_deref(), Some("W"));
        assert_eq!(bos.pts, 132);
        assert!(bos.is_regular_season());
    }

    #[test]
    fn test_parse_game_log_requires_columns() {
        let response: StatsResponse = serde_json::from_value(json!({
            "resultSets": [{ "name": "LeagueGameFinderResults", "headers": ["TEAM_ID"], "rowSet": [] }]
        }))
        .unwrap();
        assert!(parse_game_log(&response).is_err());
    }

    #[test]
    fn test_parse_scoreboard_keeps_every_game_and_final_scores() {
        let response: StatsResponse = serde_json::from_value(json!({
            "resultSets": [
                {
                    "name": "GameHeader",
                    "headers": ["GAME_DATE_EST", "GAME_ID", "GAME_STATUS_ID", "GAME_STATUS_TEXT", "HOME_TEAM_ID", "VISITOR_TEAM_ID"],
                    "rowSet": [
                        ["2025-01-15T00:00:00", "0022400500", 1, "7:30 pm ET ", 1610612738, 1610612752],
                        ["2025-01-15T00:00:00", "0022400500", 1, "7:30 pm ET ", 1610612738, 1610612752],
                        ["2025-01-15T00:00:00", "0022400501", 3, "Final", 1610612747, 1610612744],
                        ["2025-01-15T00:00:00", "0022400502", 2, "Q3 5:12", 1610612760, 1610612743]
                    ]
                },
                {
                    "name": "LineScore",
                    "headers": ["GAME_ID", "TEAM_ID", "TEAM_ABBREVIATION", "PTS"],
                    "rowSet": [
                        ["0022400501", 1610612747, "LAL", 118],
                        ["0022400501", 1610612744, "GSW", 112],
                        ["0022400500", 1610612738, "BOS", null],
                        ["0022400500", 1610612752, "NYK", null]
                    ]
                }
            ]
        }))
        .unwrap();

        let board = parse_scoreboard(&response).unwrap();
        let ids: Vec<_> = board.scheduled.iter().map(|g| g.game_id.as_str()).collect();
        assert_eq!(ids, vec!["0022400500", "0022400501", "0022400502"]);
        assert_eq!(board.scheduled[0].home_team_id, 1610612738);
        assert_eq!(board.scheduled[0].game_time.as_deref(), Some("7:30 pm ET"));
        assert_eq!(board.scheduled[2].home_team_id, 1610612760);
        assert_eq!(board.scheduled[2].game_time, None);

        assert_eq!(board.completed.len(), 1);
        let final_game = &board.completed[0];
        assert_eq!(final_game.home_team, "LAL");
        assert_eq!(final_game.home_score, 118);
        assert_eq!(final_game.away_score, 112);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(2, 1), 2);
        assert_eq!(backoff_delay(2, 3), 8);
        assert_eq!(backoff_delay(2, 200), u64::MAX);
    }

    #[tokio::test]
    async fn test_load_seasons_is_all_or_nothing() {
        let source = StubSource::new("2024-25", parse_game_log(&game_log_payload()).unwrap(), None);

        let ok = load_seasons(&source, &["2024-25".to_string()]).await.unwrap();
        assert_eq!(ok.len(), 2);

        let err = load_seasons(&source, &["2024-25".to_string(), "2025-26".to_string()]).await;
        assert!(matches!(err, Err(PipelineError::SourceUnavailable { .. })));
    }
}
