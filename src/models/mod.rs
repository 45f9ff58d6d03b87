use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type TeamId = i64;

/// Number of inputs the win-probability model consumes.
pub const FEATURE_COUNT: usize = 6;

/// Column order shared by training and inference.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "rolling_net_home",
    "rolling_net_away",
    "b2b_home",
    "b2b_away",
    "rest_diff",
    "home_court",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Home,
    Away,
}

impl Venue {
    /// "BOS vs. NYK" is a home line, "NYK @ BOS" an away line.
    pub fn from_matchup(matchup: &str) -> Option<Self> {
        match (matchup.contains("vs."), matchup.contains('@')) {
            (true, false) => Some(Venue::Home),
            (false, true) => Some(Venue::Away),
            _ => None,
        }
    }
}

/// One provider row: a single team's line for a single game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGameRecord {
    pub season_id: String, // "22024" = 2024-25 regular season
    pub team_id: TeamId,
    pub team_abbreviation: String,
    pub team_name: String,
    pub game_id: String,
    pub game_date: NaiveDate,
    pub matchup: String, // "BOS vs. NYK" or "NYK @ BOS"
    pub wl: Option<String>,
    pub pts: i32,
}

impl RawGameRecord {
    /// The leading digit of the season id is the season type; 2 is the regular season.
    pub fn is_regular_season(&self) -> bool {
        self.season_id.starts_with('2')
    }
}

/// Canonical per-team game line after the opponent join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: String,
    pub season_id: String,
    pub team_id: TeamId,
    pub team_abbreviation: String,
    pub opponent_id: TeamId,
    pub game_date: NaiveDate,
    pub points_scored: i32,
    pub points_allowed: i32,
    pub won: bool,
    pub venue: Venue,
}

impl GameResult {
    pub fn point_diff(&self) -> i32 {
        self.points_scored - self.points_allowed
    }
}

/// A game line enriched with the team's form as of that game.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamFormRow {
    pub game: GameResult,
    pub days_rest: Option<i64>,
    pub back_to_back: bool,
    pub rolling_net: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamFormSnapshot {
    pub team_id: TeamId,
    pub date: NaiveDate,
    pub rolling_net: f64,
    pub days_rest: Option<i64>,
    pub back_to_back: bool,
}

/// Home-perspective feature vector. Field order matches `FEATURE_NAMES`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchupFeatures {
    pub rolling_net_home: f64,
    pub rolling_net_away: f64,
    pub b2b_home: f64,
    pub b2b_away: f64,
    pub rest_diff: f64,
    pub home_court: f64,
}

impl MatchupFeatures {
    /// Features for a game that has not been played yet. Rest state is not known
    /// before tip-off, so the rest and back-to-back inputs stay neutral.
    pub fn upcoming(rolling_net_home: f64, rolling_net_away: f64) -> Self {
        Self {
            rolling_net_home,
            rolling_net_away,
            b2b_home: 0.0,
            b2b_away: 0.0,
            rest_diff: 0.0,
            home_court: 1.0,
        }
    }

    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.rolling_net_home,
            self.rolling_net_away,
            self.b2b_home,
            self.b2b_away,
            self.rest_diff,
            self.home_court,
        ]
    }
}

/// One historical game from the home team's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupSample {
    pub game_id: String,
    pub game_date: NaiveDate,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub features: MatchupFeatures,
    pub home_win: bool,
    pub weight: f64,
}

impl MatchupSample {
    pub fn label(&self) -> f64 {
        if self.home_win { 1.0 } else { 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledGame {
    pub game_id: String,
    pub home_team_id: TeamId,
    pub away_team_id: TeamId,
    pub game_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpcomingMatchup {
    pub game: ScheduledGame,
    pub features: MatchupFeatures,
}

/// Final score of a finished game, passed through as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedGame {
    pub game_id: String,
    pub home_team: String,
    pub home_score: i32,
    pub away_team: String,
    pub away_score: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scoreboard {
    /// Every game on the date, whether not started, live or final.
    pub scheduled: Vec<ScheduledGame>,
    pub completed: Vec<CompletedGame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub game_id: String,
    #[serde(rename = "home_id")]
    pub home_team_id: TeamId,
    pub home_team: String,
    #[serde(rename = "away_id")]
    pub away_team_id: TeamId,
    pub away_team: String,
    pub home_win_prob: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
}

impl PredictionResult {
    /// Distance of the prediction from a coin flip.
    pub fn confidence(&self) -> f64 {
        (self.home_win_prob - 0.5).abs()
    }

    pub fn favorite(&self) -> &str {
        if self.home_win_prob >= 0.5 {
            &self.home_team
        } else {
            &self.away_team
        }
    }
}

/// Body of the slate endpoints: `{"games": [...]}` plus diagnostics when degraded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlateResponse {
    pub games: Vec<PredictionResult>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SlateResponse {
    pub fn fresh(games: Vec<PredictionResult>) -> Self {
        Self { games, stale: false, reason: None }
    }

    pub fn degraded(games: Vec<PredictionResult>, stale: bool, reason: String) -> Self {
        Self { games, stale, reason: Some(reason) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamHistoryEntry {
    pub date: NaiveDate,
    pub opponent: String,
    pub wl: String,
    pub score: String, // "112-104", team's points first
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamHistory {
    pub team_id: TeamId,
    pub team_name: String,
    pub form: String, // last five results, most recent first: "WLWWL"
    pub history: Vec<TeamHistoryEntry>,
}
