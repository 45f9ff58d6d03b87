pub mod data_fetcher;
pub mod features;
pub mod form;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod predictor;
pub mod team_history;
pub mod teams;

pub use data_fetcher::{GameLogSource, ScheduleSource, StatsNbaClient};
pub use pipeline::{Pipeline, SlateRun, TrainedBundle, TrainingReport};
pub use team_history::{build_team_history, TeamHistoryCache};
pub use teams::TeamDirectory;
