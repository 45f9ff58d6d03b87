use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;
use statrs::statistics::Statistics;

use crate::config::FormConfig;
use crate::models::{GameResult, TeamFormRow, TeamFormSnapshot, TeamId};

/// Annotate every game line with the team's rest state and rolling net rating.
///
/// Rows come back sorted by team, then date. Each value only looks at the
/// team's own games up to and including the current one.
pub fn compute_form(games: &[GameResult], config: &FormConfig) -> Vec<TeamFormRow> {
    let mut sorted: Vec<&GameResult> = games.iter().collect();
    sorted.sort_by(|a, b| {
        a.team_id
            .cmp(&b.team_id)
            .then(a.game_date.cmp(&b.game_date))
            .then_with(|| a.game_id.cmp(&b.game_id))
    });

    let mut rows = Vec::with_capacity(sorted.len());
    let mut current_team: Option<TeamId> = None;
    let mut window: VecDeque<f64> = VecDeque::with_capacity(config.window);
    let mut previous_date: Option<NaiveDate> = None;

    for game in sorted {
        if current_team != Some(game.team_id) {
            current_team = Some(game.team_id);
            window.clear();
            previous_date = None;
        }

        let days_rest = previous_date.map(|prev| (game.game_date - prev).num_days());
        previous_date = Some(game.game_date);

        if window.len() == config.window {
            window.pop_front();
        }
        window.push_back(game.point_diff() as f64);

        let rolling_net = (window.len() >= config.min_games).then(|| window.iter().mean());

        rows.push(TeamFormRow {
            game: game.clone(),
            days_rest,
            back_to_back: days_rest == Some(1),
            rolling_net,
        });
    }

    rows
}

/// Each team's most recent row that has a defined rolling net rating.
pub fn latest_form(rows: &[TeamFormRow]) -> HashMap<TeamId, TeamFormSnapshot> {
    snapshots(rows.iter())
}

/// Form as it stood before tip-off on `date`: only games played strictly
/// earlier count.
pub fn latest_form_before(rows: &[TeamFormRow], date: NaiveDate) -> HashMap<TeamId, TeamFormSnapshot> {
    snapshots(rows.iter().filter(|row| row.game.game_date < date))
}

fn snapshots<'a>(rows: impl Iterator<Item = &'a TeamFormRow>) -> HashMap<TeamId, TeamFormSnapshot> {
    let mut latest: HashMap<TeamId, TeamFormSnapshot> = HashMap::new();

    for row in rows {
        let Some(rolling_net) = row.rolling_net else {
            continue;
        };
        let newer = latest
            .get(&row.game.team_id)
            .map_or(true, |snap| row.game.game_date >= snap.date);
        if newer {
            latest.insert(
                row.game.team_id,
                TeamFormSnapshot {
                    team_id: row.game.team_id,
                    date: row.game.game_date,
                    rolling_net,
                    days_rest: row.days_rest,
                    back_to_back: row.back_to_back,
                },
            );
        }
    }

    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn line(team_id: i64, day: u32, scored: i32, allowed: i32) -> GameResult {
        GameResult {
            game_id: format!("{}-{}", team_id, day),
            season_id: "22024".to_string(),
            team_id,
            team_abbreviation: format!("T{}", team_id),
            opponent_id: 999,
            game_date: d(day),
            points_scored: scored,
            points_allowed: allowed,
            won: scored > allowed,
            venue: Venue::Home,
        }
    }

    fn rows_for(rows: &[TeamFormRow], team_id: i64) -> Vec<&TeamFormRow> {
        rows.iter().filter(|r| r.game.team_id == team_id).collect()
    }

    #[test]
    fn test_rolling_net_needs_three_games() {
        let games = vec![line(1, 1, 120, 100), line(1, 3, 115, 100), line(1, 5, 110, 100)];
        let rows = compute_form(&games, &FormConfig::default());

        assert_eq!(rows[0].rolling_net, None);
        assert_eq!(rows[1].rolling_net, None);
        assert_relative_eq!(rows[2].rolling_net.unwrap(), 15.0);
    }

    #[test]
    fn test_window_keeps_last_ten_games() {
        // First game +100, then eleven games at +1.
        let mut games = vec![line(1, 1, 200, 100)];
        for day in 2..=12 {
            games.push(line(1, day, 101, 100));
        }
        let rows = compute_form(&games, &FormConfig::default());

        // Game 10 still sees the +100 opener.
        assert_relative_eq!(rows[9].rolling_net.unwrap(), 10.9);
        // Game 11 has rolled it out of the window.
        assert_relative_eq!(rows[10].rolling_net.unwrap(), 1.0);
    }

    #[test]
    fn test_back_to_back_iff_one_day_rest() {
        let games = vec![line(1, 1, 100, 90), line(1, 2, 100, 90), line(1, 5, 100, 90), line(1, 6, 100, 90)];
        let rows = compute_form(&games, &FormConfig::default());

        assert_eq!(rows[0].days_rest, None);
        assert!(!rows[0].back_to_back);
        for row in &rows[1..] {
            assert_eq!(row.back_to_back, row.days_rest == Some(1));
        }
        assert_eq!(rows[2].days_rest, Some(3));
    }

    #[test]
    fn test_teams_are_tracked_independently_of_input_order() {
        let games = vec![
            line(2, 3, 90, 100),
            line(1, 5, 110, 100),
            line(2, 1, 90, 100),
            line(1, 1, 110, 100),
            line(2, 2, 90, 100),
            line(1, 3, 110, 100),
        ];
        let rows = compute_form(&games, &FormConfig::default());

        let team1 = rows_for(&rows, 1);
        assert_eq!(team1[1].days_rest, Some(2));
        assert_relative_eq!(team1[2].rolling_net.unwrap(), 10.0);

        let team2 = rows_for(&rows, 2);
        assert_eq!(team2[0].days_rest, None);
        assert!(team2[1].back_to_back);
        assert_relative_eq!(team2[2].rolling_net.unwrap(), -10.0);
    }

    #[test]
    fn test_future_scores_do_not_change_past_form() {
        let mut games: Vec<GameResult> = (1..=8).map(|day| line(1, day * 2, 100 + day as i32, 100)).collect();
        let before = compute_form(&games, &FormConfig::default());

        games[6].points_scored = 160;
        let after = compute_form(&games, &FormConfig::default());

        assert_eq!(before[..6], after[..6]);
        assert_ne!(before[6].rolling_net, after[6].rolling_net);
    }

    #[test]
    fn test_latest_form_skips_undefined_rows() {
        let games = vec![
            line(1, 1, 110, 100),
            line(1, 2, 110, 100),
            line(1, 3, 110, 100),
            line(2, 1, 100, 105),
        ];
        let rows = compute_form(&games, &FormConfig::default());
        let latest = latest_form(&rows);

        assert_eq!(latest.len(), 1);
        let snap = &latest[&1];
        assert_eq!(snap.date, d(3));
        assert_relative_eq!(snap.rolling_net, 10.0);
        assert!(snap.back_to_back);
    }

    #[test]
    fn test_form_before_date_ignores_that_days_game() {
        let games = vec![
            line(1, 1, 110, 100),
            line(1, 3, 110, 100),
            line(1, 5, 110, 100),
            line(1, 7, 150, 100),
        ];
        let rows = compute_form(&games, &FormConfig::default());

        let before = latest_form_before(&rows, d(7));
        assert_eq!(before[&1].date, d(5));
        assert_relative_eq!(before[&1].rolling_net, 10.0);

        assert_relative_eq!(latest_form(&rows)[&1].rolling_net, 20.0);
        assert!(latest_form_before(&rows, d(5)).is_empty());
    }
}
