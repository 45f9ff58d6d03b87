use anyhow::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::io::Write;

use crate::config::Config;
use crate::db::{self, CachingGameLog, SqliteGameLog};
use crate::models::{MatchupSample, RawGameRecord, FEATURE_NAMES};
use crate::services::form::{compute_form, latest_form};
use crate::services::normalizer::normalize;
use crate::services::{build_team_history, GameLogSource, Pipeline, ScheduleSource, StatsNbaClient, TeamDirectory};
use crate::utils::{format_moneyline, format_probability, parse_slate_date, probability_to_moneyline, season_for_date};

pub async fn fetch_data(config: &Config, season: Option<String>) -> Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let client = StatsNbaClient::new(config)?;
    let seasons = match season.as_deref() {
        Some("current") => vec![season_for_date(chrono::Local::now().date_naive())],
        Some(s) => vec![s.to_string()],
        None => config.seasons.clone(),
    };

    println!("🏀 Fetching game logs for {}...", seasons.join(", "));

    let records = db::refresh_cache(&pool, &client, &seasons).await?;

    println!("✅ Cached {} game lines!", records.len());
    for season in &seasons {
        if let Some((at, rows)) = db::last_fetched(&pool, season).await? {
            println!("   • {}: {} lines (fetched {})", season, rows, at.format("%Y-%m-%d %H:%M"));
        }
    }

    Ok(())
}

/// History for training: refreshed from stats.nba.com, or the local cache when offline.
async fn load_history(config: &Config, pool: &SqlitePool, offline: bool) -> Result<Vec<RawGameRecord>> {
    if offline {
        println!("📂 Loading cached game logs...");
        let cache = SqliteGameLog::new(pool.clone());
        return Ok(crate::services::data_fetcher::load_seasons(&cache, &config.seasons).await?);
    }

    println!("📥 Refreshing game logs from stats.nba.com...");
    let client = StatsNbaClient::new(config)?;
    Ok(db::refresh_cache(pool, &client, &config.seasons).await?)
}

fn slate_date(date: Option<String>) -> Result<NaiveDate> {
    match date {
        Some(d) => parse_slate_date(&d),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

pub async fn generate_predictions(config: &Config, date: Option<String>, offline: bool) -> Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let date = slate_date(date)?;
    let client = StatsNbaClient::new(config)?;
    let cached = SqliteGameLog::new(pool.clone());
    let refreshing = CachingGameLog::new(pool.clone(), &client);
    let history: &dyn GameLogSource = if offline { &cached } else { &refreshing };

    println!("🔮 Generating predictions for {}...", date);
    println!("📥 Game logs from {}", history.name());

    let pipeline = Pipeline::new(config.pipeline.clone());
    let run = match pipeline.run_cycle(history, &client, &config.seasons, date).await {
        Ok(run) => run,
        Err(e) => {
            println!("⚠️  Prediction cycle failed: {}", e);
            match db::latest_slate(&pool, date).await? {
                Some(games) => {
                    println!("📦 Showing last stored slate (stale):\n");
                    print_slate(&games);
                }
                None => println!("📭 No stored slate for {}", date),
            }
            return Ok(());
        }
    };

    let Some(bundle) = run.bundle else {
        println!("📭 No games scheduled on {}", date);
        return Ok(());
    };
    db::save_slate(&pool, bundle.run_id, date, &run.games).await?;

    println!("✅ Predicted {} games (trained on {} matchups)\n", run.games.len(), bundle.report.samples);
    print_slate(&run.games);

    Ok(())
}

fn print_slate(games: &[crate::models::PredictionResult]) {
    for game in games {
        println!(
            "{}. {} vs {}{}",
            game.rank.unwrap_or_default(),
            game.home_team,
            game.away_team,
            game.game_time.as_deref().map_or(String::new(), |t| format!(" ({})", t))
        );
        println!(
            "   Home win: {} | Away win: {} | Fair line: {} {}",
            format_probability(game.home_win_prob),
            format_probability(1.0 - game.home_win_prob),
            game.favorite(),
            format_moneyline(probability_to_moneyline(game.home_win_prob.max(1.0 - game.home_win_prob)))
        );
    }
}

pub async fn show_results(config: &Config, date: Option<String>) -> Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let date = slate_date(date)?;
    let client = StatsNbaClient::new(config)?;

    println!("📋 Final scores for {}:\n", date);

    let board = client.fetch_scoreboard(date).await?;
    if board.completed.is_empty() {
        println!("📭 No completed games on {}", date);
        return Ok(());
    }

    let stored = db::latest_slate(&pool, date).await?.unwrap_or_default();
    let mut graded = 0;
    let mut correct = 0;

    for game in &board.completed {
        let home_won = game.home_score > game.away_score;
        let verdict = match stored.iter().find(|p| p.game_id == game.game_id) {
            Some(prediction) => {
                graded += 1;
                if (prediction.home_win_prob >= 0.5) == home_won {
                    correct += 1;
                    format!("✅ called it ({} home)", format_probability(prediction.home_win_prob))
                } else {
                    format!("❌ missed ({} home)", format_probability(prediction.home_win_prob))
                }
            }
            None => String::new(),
        };

        println!(
            "   {} {} - {} {}  {}",
            game.home_team, game.home_score, game.away_score, game.away_team, verdict
        );
    }

    if graded > 0 {
        println!("\n🎯 {}/{} predictions correct", correct, graded);
    }

    Ok(())
}

pub async fn query_team(config: &Config, team_name: &str) -> Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let teams = TeamDirectory::nba();

    println!("🔍 Searching for team: {}", team_name);

    let Some(team) = teams.find(team_name) else {
        println!("❌ No teams found matching '{}'", team_name);
        println!("\n💡 Available teams:");
        for team in teams.all().iter().take(10) {
            println!("   • {} ({})", team.full_name, team.abbreviation);
        }
        return Ok(());
    };

    println!("📊 Team Details:");
    println!("   Name: {} ({})", team.full_name, team.abbreviation);
    println!("   Team ID: {}", team.id);

    let raw = match load_history(config, &pool, true).await {
        Ok(raw) => raw,
        Err(e) => {
            println!("\n⚠️  No cached history: {}", e);
            println!("💡 Run 'courtside fetch' first");
            return Ok(());
        }
    };

    let games = normalize(&raw).games;
    let form = latest_form(&compute_form(&games, &config.pipeline.form));
    if let Some(snapshot) = form.get(&team.id) {
        println!(
            "   Rolling net rating: {:+.1} (as of {})",
            snapshot.rolling_net,
            snapshot.date.format("%Y-%m-%d")
        );
    }

    let history = build_team_history(&games, team.id, &teams.clone().with_log(&raw), 10);
    println!("   Form: {}", if history.form.is_empty() { "-" } else { history.form.as_str() });

    println!("\n📅 Recent Games:");
    if history.history.is_empty() {
        println!("   No recent games found");
    }
    for entry in &history.history {
        println!("   {} vs {} {} {}", entry.date.format("%m/%d"), entry.opponent, entry.score, entry.wl);
    }

    Ok(())
}

pub async fn evaluate_model(config: &Config, offline: bool) -> Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let raw = load_history(config, &pool, offline).await?;
    let bundle = Pipeline::new(config.pipeline.clone()).train(&raw)?;
    let report = &bundle.report;

    println!("🧪 Training report:");
    println!("   Raw lines: {}", report.raw_rows);
    println!(
        "   Games: {} ({} dropped, {} duplicates, {} non-regular-season lines)",
        report.games, report.dropped_games, report.duplicates, report.non_regular_season
    );
    println!(
        "   Matchups: {} ({} ambiguous, {} without form)",
        report.samples, report.dropped_ambiguous, report.dropped_missing_features
    );
    if let Some(season) = &report.latest_season {
        println!("   Latest season id: {}", season);
    }

    match &report.holdout {
        Some(m) => {
            println!("\n📈 Holdout ({} newest games):", m.samples);
            println!("   Accuracy: {}", format_probability(m.accuracy));
            println!("   Log loss: {:.4}", m.log_loss);
            println!("   Brier:    {:.4}", m.brier);
        }
        None => println!("\n⚠️  Not enough matchups for a holdout evaluation"),
    }

    println!(
        "\n🔁 Fit: {} iterations{}",
        report.iterations,
        if report.converged { "" } else { " (did not converge)" }
    );

    println!("\n⚖️  Coefficients:");
    println!("   {:<18} {:+.4}", "intercept", report.intercept);
    for (name, value) in &report.coefficients {
        println!("   {:<18} {:+.4}", name, value);
    }

    Ok(())
}

pub async fn export_dataset(config: &Config, output: &str, offline: bool) -> Result<()> {
    let pool = db::init_database(&config.database_url).await?;
    let raw = load_history(config, &pool, offline).await?;
    let bundle = Pipeline::new(config.pipeline.clone()).train(&raw)?;

    if let Some(parent) = std::path::Path::new(output).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let file = std::fs::File::create(output)?;
    write_dataset(&bundle.samples, file)?;

    println!("💾 Exported {} matchups to {}", bundle.samples.len(), output);
    Ok(())
}

/// One CSV row per training matchup, features in model column order.
pub fn write_dataset<W: Write>(samples: &[MatchupSample], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec!["game_date", "game_id", "home_team_id", "away_team_id"];
    header.extend(FEATURE_NAMES);
    header.extend(["home_win", "weight"]);
    writer.write_record(&header)?;

    for sample in samples {
        let mut record = vec![
            sample.game_date.format("%Y-%m-%d").to_string(),
            sample.game_id.clone(),
            sample.home_team_id.to_string(),
            sample.away_team_id.to_string(),
        ];
        record.extend(sample.features.to_array().iter().map(|v| v.to_string()));
        record.push(u8::from(sample.home_win).to_string());
        record.push(sample.weight.to_string());
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
