use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};

/// Parse a slate date given as YYYY-MM-DD (or MM/DD/YYYY, as the scoreboard writes it).
pub fn parse_slate_date(input: &str) -> Result<NaiveDate> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(input, "%m/%d/%Y"))
        .map_err(|_| anyhow!("invalid date '{}', expected YYYY-MM-DD", input))
}

/// Season label for a date: games from October on belong to the season that
/// starts that year, e.g. 2025-01-15 → "2024-25".
pub fn season_for_date(date: NaiveDate) -> String {
    let start = if date.month() >= 10 { date.year() } else { date.year() - 1 };
    format!("{}-{:02}", start, (start + 1) % 100)
}

/// Format a probability as a percentage, e.g. 0.6423 → "64.2%".
pub fn format_probability(probability: f64) -> String {
    format!("{:.1}%", probability * 100.0)
}

/// Convert a win probability to a fair American moneyline.
pub fn probability_to_moneyline(probability: f64) -> i32 {
    let p = probability.clamp(0.01, 0.99);
    if p >= 0.5 {
        (-100.0 * p / (1.0 - p)).round() as i32
    } else {
        (100.0 * (1.0 - p) / p).round() as i32
    }
}

/// Render a moneyline with its sign, e.g. "+150" or "-200".
pub fn format_moneyline(line: i32) -> String {
    if line > 0 {
        format!("+{}", line)
    } else {
        line.to_string()
    }
}
