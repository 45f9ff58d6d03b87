use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{GameResult, TeamHistory, TeamHistoryEntry, TeamId};
use crate::services::teams::TeamDirectory;

/// Results shown in a team's form string.
pub const FORM_LENGTH: usize = 5;

/// A team's recent games, most recent first, with its form string.
pub fn build_team_history(games: &[GameResult], team_id: TeamId, teams: &TeamDirectory, limit: usize) -> TeamHistory {
    let mut own: Vec<&GameResult> = games.iter().filter(|g| g.team_id == team_id).collect();
    own.sort_by(|a, b| {
        b.game_date
            .cmp(&a.game_date)
            .then_with(|| b.game_id.cmp(&a.game_id))
    });

    let form = own
        .iter()
        .take(FORM_LENGTH)
        .map(|g| if g.won { 'W' } else { 'L' })
        .collect();

    let history = own
        .iter()
        .take(limit)
        .map(|g| TeamHistoryEntry {
            date: g.game_date,
            opponent: teams.name(g.opponent_id),
            wl: if g.won { "W" } else { "L" }.to_string(),
            score: format!("{}-{}", g.points_scored, g.points_allowed),
        })
        .collect();

    TeamHistory {
        team_id,
        team_name: teams.name(team_id),
        form,
        history,
    }
}

struct CacheEntry {
    history: TeamHistory,
    stored_at: DateTime<Utc>,
}

/// Bounded least-recently-used cache of team histories with a staleness window.
pub struct TeamHistoryCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<TeamId, CacheEntry>,
    order: VecDeque<TeamId>, // front = least recently used
}

impl TeamHistoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// A fresh entry, promoted to most recently used. Stale entries are evicted.
    pub fn get(&mut self, team_id: TeamId, now: DateTime<Utc>) -> Option<TeamHistory> {
        let stored_at = self.entries.get(&team_id)?.stored_at;
        let age = (now - stored_at).to_std().unwrap_or_default();
        if age > self.ttl {
            self.remove(team_id);
            return None;
        }

        self.touch(team_id);
        self.entries.get(&team_id).map(|e| e.history.clone())
    }

    pub fn insert(&mut self, history: TeamHistory, now: DateTime<Utc>) {
        let team_id = history.team_id;
        if self.entries.contains_key(&team_id) {
            self.touch(team_id);
        } else {
            while self.entries.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                tracing::debug!("Evicted team {} from history cache", oldest);
            }
            self.order.push_back(team_id);
        }
        self.entries.insert(team_id, CacheEntry { history, stored_at: now });
    }

    /// Drop everything, e.g. after the underlying games were retrained.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, team_id: TeamId) {
        if let Some(pos) = self.order.iter().position(|id| *id == team_id) {
            self.order.remove(pos);
        }
        self.order.push_back(team_id);
    }

    fn remove(&mut self, team_id: TeamId) {
        self.entries.remove(&team_id);
        self.order.retain(|id| *id != team_id);
    }
}
