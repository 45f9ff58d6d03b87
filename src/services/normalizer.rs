use std::collections::{HashMap, HashSet};

use crate::models::{GameResult, RawGameRecord, Venue};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub raw_rows: usize,
    pub non_regular_season: usize,
    pub duplicates: usize,
    /// Game ids without exactly one home and one away line.
    pub dropped_games: usize,
    pub games: usize,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedLog {
    pub games: Vec<GameResult>,
    pub report: NormalizeReport,
}

/// Turn provider rows into a deduplicated, opponent-joined game log.
///
/// Only regular-season rows survive. Each surviving game id has exactly two
/// rows, one per side, with distinct teams and one home and one away line.
/// Games that do not resolve that way are dropped, never repaired.
pub fn normalize(raw: &[RawGameRecord]) -> NormalizedLog {
    let mut report = NormalizeReport {
        raw_rows: raw.len(),
        ..Default::default()
    };

    let mut seen: HashSet<(&str, i64)> = HashSet::new();
    let mut by_game: HashMap<&str, Vec<&RawGameRecord>> = HashMap::new();
    let mut game_order: Vec<&str> = Vec::new();

    for record in raw {
        if !record.is_regular_season() {
            report.non_regular_season += 1;
            continue;
        }
        if !seen.insert((record.game_id.as_str(), record.team_id)) {
            report.duplicates += 1;
            continue;
        }
        let rows = by_game.entry(record.game_id.as_str()).or_default();
        if rows.is_empty() {
            game_order.push(record.game_id.as_str());
        }
        rows.push(record);
    }

    let mut games = Vec::with_capacity(by_game.len() * 2);
    for game_id in game_order {
        let rows = &by_game[game_id];
        match join_sides(rows) {
            Some((a, b)) => {
                games.push(a);
                games.push(b);
                report.games += 1;
            }
            None => {
                tracing::debug!("Dropping game {}: {} unresolvable lines", game_id, rows.len());
                report.dropped_games += 1;
            }
        }
    }

    if report.dropped_games > 0 {
        tracing::warn!(
            "Normalizer dropped {} of {} games with ambiguous opponent joins",
            report.dropped_games,
            report.dropped_games + report.games
        );
    }

    NormalizedLog { games, report }
}

fn join_sides(rows: &[&RawGameRecord]) -> Option<(GameResult, GameResult)> {
    let [first, second] = rows else {
        return None;
    };
    if first.team_id == second.team_id {
        return None;
    }

    let first_venue = Venue::from_matchup(&first.matchup)?;
    let second_venue = Venue::from_matchup(&second.matchup)?;
    if first_venue == second_venue {
        return None;
    }

    Some((
        game_result(first, second, first_venue),
        game_result(second, first, second_venue),
    ))
}

fn game_result(team: &RawGameRecord, opponent: &RawGameRecord, venue: Venue) -> GameResult {
    let won = match team.wl.as_deref() {
        Some("W") => true,
        Some("L") => false,
        _ => team.pts > opponent.pts,
    };

    GameResult {
        game_id: team.game_id.clone(),
        season_id: team.season_id.clone(),
        team_id: team.team_id,
        team_abbreviation: team.team_abbreviation.clone(),
        opponent_id: opponent.team_id,
        game_date: team.game_date,
        points_scored: team.pts,
        points_allowed: opponent.pts,
        won,
        venue,
    }
}
