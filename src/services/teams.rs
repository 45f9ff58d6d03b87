use std::collections::HashMap;

use serde::Serialize;

use crate::models::{RawGameRecord, TeamId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamInfo {
    pub id: TeamId,
    pub abbreviation: String,
    pub full_name: String,
}

const NBA_TEAMS: [(TeamId, &str, &str); 30] = [
    (1610612737, "ATL", "Atlanta Hawks"),
    (1610612738, "BOS", "Boston Celtics"),
    (1610612739, "CLE", "Cleveland Cavaliers"),
    (1610612740, "NOP", "New Orleans Pelicans"),
    (1610612741, "CHI", "Chicago Bulls"),
    (1610612742, "DAL", "Dallas Mavericks"),
    (1610612743, "DEN", "Denver Nuggets"),
    (1610612744, "GSW", "Golden State Warriors"),
    (1610612745, "HOU", "Houston Rockets"),
    (1610612746, "LAC", "LA Clippers"),
    (1610612747, "LAL", "Los Angeles Lakers"),
    (1610612748, "MIA", "Miami Heat"),
    (1610612749, "MIL", "Milwaukee Bucks"),
    (1610612750, "MIN", "Minnesota Timberwolves"),
    (1610612751, "BKN", "Brooklyn Nets"),
    (1610612752, "NYK", "New York Knicks"),
    (1610612753, "ORL", "Orlando Magic"),
    (1610612754, "IND", "Indiana Pacers"),
    (1610612755, "PHI", "Philadelphia 76ers"),
    (1610612756, "PHX", "Phoenix Suns"),
    (1610612757, "POR", "Portland Trail Blazers"),
    (1610612758, "SAC", "Sacramento Kings"),
    (1610612759, "SAS", "San Antonio Spurs"),
    (1610612760, "OKC", "Oklahoma City Thunder"),
    (1610612761, "TOR", "Toronto Raptors"),
    (1610612762, "UTA", "Utah Jazz"),
    (1610612763, "MEM", "Memphis Grizzlies"),
    (1610612764, "WAS", "Washington Wizards"),
    (1610612765, "DET", "Detroit Pistons"),
    (1610612766, "CHA", "Charlotte Hornets"),
];

/// Minimum Jaro-Winkler similarity for a fuzzy name match.
const FUZZY_THRESHOLD: f64 = 0.85;

/// Team id → display name lookup.
#[derive(Debug, Clone)]
pub struct TeamDirectory {
    teams: HashMap<TeamId, TeamInfo>,
}

impl Default for TeamDirectory {
    fn default() -> Self {
        Self::nba()
    }
}

impl TeamDirectory {
    /// The thirty current franchises.
    pub fn nba() -> Self {
        let teams = NBA_TEAMS
            .iter()
            .map(|(id, abbr, name)| {
                (
                    *id,
                    TeamInfo {
                        id: *id,
                        abbreviation: abbr.to_string(),
                        full_name: name.to_string(),
                    },
                )
            })
            .collect();
        Self { teams }
    }

    /// Add teams seen in a game log that the static table does not know.
    pub fn with_log(mut self, records: &[RawGameRecord]) -> Self {
        for record in records {
            self.teams.entry(record.team_id).or_insert_with(|| TeamInfo {
                id: record.team_id,
                abbreviation: record.team_abbreviation.clone(),
                full_name: record.team_name.clone(),
            });
        }
        self
    }

    pub fn get(&self, id: TeamId) -> Option<&TeamInfo> {
        self.teams.get(&id)
    }

    pub fn name(&self, id: TeamId) -> String {
        self.get(id)
            .map(|t| t.full_name.clone())
            .unwrap_or_else(|| format!("Team {}", id))
    }

    /// Resolve free text to a team: abbreviation, then substring, then fuzzy match.
    pub fn find(&self, query: &str) -> Option<&TeamInfo> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }

        if let Some(team) = self.teams.values().find(|t| t.abbreviation.to_lowercase() == query) {
            return Some(team);
        }

        let mut substring: Vec<&TeamInfo> = self
            .teams
            .values()
            .filter(|t| t.full_name.to_lowercase().contains(&query))
            .collect();
        substring.sort_by_key(|t| t.full_name.len());
        if let Some(team) = substring.first() {
            return Some(*team);
        }

        self.teams
            .values()
            .map(|t| (t, strsim::jaro_winkler(&t.full_name.to_lowercase(), &query)))
            .filter(|(_, score)| *score >= FUZZY_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, _)| t)
    }

    pub fn all(&self) -> Vec<&TeamInfo> {
        let mut teams: Vec<&TeamInfo> = self.teams.values().collect();
        teams.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        teams
    }
}
