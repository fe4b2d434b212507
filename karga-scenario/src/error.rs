use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Top level failure of a scenario run. Per-task failures never end up here,
/// they are recorded as [`FailureKind`](crate::FailureKind) in the aggregate.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("login failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid scenario configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("virtual user task panicked or was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request could not be sent: {0}")]
    Network(#[source] reqwest::Error),

    #[error("login endpoint answered with status {0}")]
    Status(StatusCode),

    #[error("login response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("login response has no `data.token` string")]
    MissingToken,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the task table is empty")]
    NoTasks,

    #[error("the total task weight is zero")]
    ZeroWeight,

    #[error("invalid host `{host}`: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },

    #[error("think time minimum {min:?} is larger than maximum {max:?}")]
    InvalidThinkTime { min: Duration, max: Duration },

    #[error("tasks require authorization but neither a token nor credentials were configured")]
    MissingCredentials,

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),

    #[error("invalid duration `{value}`: {source}")]
    InvalidDuration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("at least one virtual user and a positive spawn rate are required")]
    InvalidUsers,

    #[error("could not load settings: {0}")]
    Settings(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}
