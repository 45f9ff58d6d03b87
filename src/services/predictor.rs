use std::collections::{HashMap, HashSet};

use crate::models::{MatchupFeatures, PredictionResult, ScheduledGame, TeamFormSnapshot, TeamId, UpcomingMatchup};
use crate::services::model::WinProbabilityModel;
use crate::services::teams::TeamDirectory;

/// Build inference rows for a slate from each team's latest form.
///
/// Teams without a snapshot fall back to a neutral rolling net of 0 so one new
/// or idle team never sinks the whole slate. Repeated game ids are dropped.
pub fn upcoming_matchups(
    schedule: &[ScheduledGame],
    latest_form: &HashMap<TeamId, TeamFormSnapshot>,
) -> Vec<UpcomingMatchup> {
    let mut seen = HashSet::new();
    schedule
        .iter()
        .filter(|game| seen.insert(game.game_id.as_str()))
        .map(|game| UpcomingMatchup {
            game: game.clone(),
            features: MatchupFeatures::upcoming(
                rolling_net_or_neutral(latest_form, game.home_team_id),
                rolling_net_or_neutral(latest_form, game.away_team_id),
            ),
        })
        .collect()
}

/// Score a slate and rank it, most lopsided matchup first.
pub fn predict_slate(
    model: &WinProbabilityModel,
    schedule: &[ScheduledGame],
    latest_form: &HashMap<TeamId, TeamFormSnapshot>,
    teams: &TeamDirectory,
) -> Vec<PredictionResult> {
    let mut results: Vec<PredictionResult> = upcoming_matchups(schedule, latest_form)
        .into_iter()
        .map(|matchup| {
            let home_win_prob = model.predict_proba(&matchup.features);
            let game = matchup.game;
            PredictionResult {
                home_team: teams.name(game.home_team_id),
                away_team: teams.name(game.away_team_id),
                game_id: game.game_id,
                home_team_id: game.home_team_id,
                away_team_id: game.away_team_id,
                home_win_prob,
                game_time: game.game_time,
                rank: None,
            }
        })
        .collect();

    rank_by_confidence(&mut results);

    for result in &results {
        tracing::debug!(
            "#{} {} vs {}: home {:.1}%",
            result.rank.unwrap_or_default(),
            result.home_team,
            result.away_team,
            result.home_win_prob * 100.0
        );
    }

    results
}

/// Sort by distance from 0.5, descending, keeping schedule order on ties,
/// and number the result 1..n.
pub fn rank_by_confidence(results: &mut [PredictionResult]) {
    results.sort_by(|a, b| {
        b.confidence()
            .partial_cmp(&a.confidence())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = Some(i + 1);
    }
}

fn rolling_net_or_neutral(latest_form: &HashMap<TeamId, TeamFormSnapshot>, team_id: TeamId) -> f64 {
    match latest_form.get(&team_id) {
        Some(snapshot) => snapshot.rolling_net,
        None => {
            tracing::warn!("No form history for team {}, using neutral rolling net", team_id);
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::services::model::tests::synthetic_samples;
    use chrono::NaiveDate;

    fn game(id: &str, home: TeamId, away: TeamId) -> ScheduledGame {
        ScheduledGame {
            game_id: id.to_string(),
            home_team_id: home,
            away_team_id: away,
            game_time: Some("7:30 pm ET".to_string()),
        }
    }

    fn snapshot(team_id: TeamId, rolling_net: f64) -> (TeamId, TeamFormSnapshot) {
        (
            team_id,
            TeamFormSnapshot {
                team_id,
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                rolling_net,
                days_rest: Some(1),
                back_to_back: true,
            },
        )
    }

    fn model() -> WinProbabilityModel {
        WinProbabilityModel::fit(&synthetic_samples(200), &ModelConfig::default()).unwrap()
    }

    #[test]
    fn test_upcoming_rows_are_rest_neutral_and_default_missing_form() {
        let form: HashMap<_, _> = [snapshot(1, 6.0)].into_iter().collect();
        let rows = upcoming_matchups(&[game("g1", 1, 2)], &form);

        assert_eq!(rows.len(), 1);
        // Snapshot says back-to-back, but inference keeps rest neutral.
        assert_eq!(rows[0].features.to_array(), [6.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_duplicate_game_ids_are_scored_once() {
        let rows = upcoming_matchups(&[game("g1", 1, 2), game("g1", 1, 2)], &HashMap::new());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_slate_is_ranked_by_confidence() {
        let form: HashMap<_, _> = [
            snapshot(1, 10.0),
            snapshot(2, -10.0),
            snapshot(3, 1.0),
            snapshot(4, 0.0),
            snapshot(5, -6.0),
            snapshot(6, 6.0),
        ]
        .into_iter()
        .collect();
        let schedule = [game("close", 3, 4), game("lopsided", 1, 2), game("road", 5, 6)];

        let results = predict_slate(&model(), &schedule, &form, &TeamDirectory::nba());

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].game_id, "lopsided");
        for pair in results.windows(2) {
            assert!(pair[0].confidence() >= pair[1].confidence());
        }
        let ranks: Vec<_> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_empty_schedule_gives_empty_slate() {
        let results = predict_slate(&model(), &[], &HashMap::new(), &TeamDirectory::nba());
        assert!(results.is_empty());
    }

    #[test]
    fn test_team_without_history_is_still_predicted() {
        let form: HashMap<_, _> = [snapshot(1610612738, 5.0)].into_iter().collect();
        let results = predict_slate(&model(), &[game("g1", 1610612738, 1610612752)], &form, &TeamDirectory::nba());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].home_team, "Boston Celtics");
        assert_eq!(results[0].away_team, "New York Knicks");
        assert!((0.0..=1.0).contains(&results[0].home_win_prob));
        assert_eq!(results[0].game_time.as_deref(), Some("7:30 pm ET"));
    }
}
