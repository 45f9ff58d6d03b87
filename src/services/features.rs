use std::collections::HashMap;

use crate::models::{MatchupFeatures, MatchupSample, TeamFormRow, Venue};

/// Per-team season weight: the newest season in the log counts `recent_weight`,
/// every older season counts 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonWeighting {
    pub latest_season: String,
    pub recent_weight: f64,
}

impl SeasonWeighting {
    pub fn from_rows(rows: &[TeamFormRow], recent_weight: f64) -> Option<Self> {
        rows.iter()
            .map(|r| r.game.season_id.as_str())
            .max()
            .map(|latest| Self {
                latest_season: latest.to_string(),
                recent_weight,
            })
    }

    pub fn weight(&self, season_id: &str) -> f64 {
        if season_id == self.latest_season {
            self.recent_weight
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchupSet {
    /// Training samples ordered by game date, then game id.
    pub samples: Vec<MatchupSample>,
    /// Game ids without exactly one home and one away row.
    pub dropped_ambiguous: usize,
    /// Games where either side had no rolling net rating yet.
    pub dropped_missing_features: usize,
}

/// Join each game's home and away form rows into one labelled sample.
pub fn build_matchups(rows: &[TeamFormRow], weighting: Option<&SeasonWeighting>) -> MatchupSet {
    let mut by_game: HashMap<&str, Vec<&TeamFormRow>> = HashMap::new();
    for row in rows {
        by_game.entry(row.game.game_id.as_str()).or_default().push(row);
    }

    let mut set = MatchupSet::default();
    for sides in by_game.values() {
        let (home, away) = match split_sides(sides) {
            Some(pair) => pair,
            None => {
                set.dropped_ambiguous += 1;
                continue;
            }
        };

        let (Some(net_home), Some(net_away)) = (home.rolling_net, away.rolling_net) else {
            set.dropped_missing_features += 1;
            continue;
        };

        let rest_diff = match (home.days_rest, away.days_rest) {
            (Some(h), Some(a)) => (h - a) as f64,
            _ => 0.0,
        };

        let weight = weighting.map_or(1.0, |w| {
            (w.weight(&home.game.season_id) + w.weight(&away.game.season_id)) / 2.0
        });

        set.samples.push(MatchupSample {
            game_id: home.game.game_id.clone(),
            game_date: home.game.game_date,
            home_team_id: home.game.team_id,
            away_team_id: away.game.team_id,
            features: MatchupFeatures {
                rolling_net_home: net_home,
                rolling_net_away: net_away,
                b2b_home: flag(home.back_to_back),
                b2b_away: flag(away.back_to_back),
                rest_diff,
                home_court: 1.0,
            },
            home_win: home.game.won,
            weight,
        });
    }

    set.samples.sort_by(|a, b| {
        a.game_date
            .cmp(&b.game_date)
            .then_with(|| a.game_id.cmp(&b.game_id))
    });

    tracing::debug!(
        "Built {} matchup samples ({} ambiguous, {} missing features)",
        set.samples.len(),
        set.dropped_ambiguous,
        set.dropped_missing_features
    );

    set
}

fn split_sides<'a>(sides: &[&'a TeamFormRow]) -> Option<(&'a TeamFormRow, &'a TeamFormRow)> {
    let [a, b] = sides else {
        return None;
    };
    match (a.game.venue, b.game.venue) {
        (Venue::Home, Venue::Away) if a.game.team_id != b.game.team_id => Some((*a, *b)),
        (Venue::Away, Venue::Home) if a.game.team_id != b.game.team_id => Some((*b, *a)),
        _ => None,
    }
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}
