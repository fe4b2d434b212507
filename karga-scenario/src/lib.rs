//! Weighted, authenticated HTTP user scenarios for karga.
//!
//! A [`Scenario`] names a host and a [`ThinkTime`]; a [`TaskTable`] holds the
//! weighted HTTP calls. [`ScenarioRunner`] spawns [`VirtualUser`]s that log in
//! once, then loop over the table until the iteration budget runs out or the
//! stop token is cancelled. Their [`TaskOutcome`]s are folded into a
//! [`ScenarioAggregate`] and summarised as a [`ScenarioReport`].
pub mod auth;
pub mod config;
mod error;
pub mod feeds;
mod outcome;
mod runner;
mod scenario;
pub mod task;
pub mod template;
mod think_time;
mod user;

pub use auth::{login, AuthState, Credentials};
pub use error::{AuthError, ConfigError, ScenarioError};
pub use outcome::{
    FailureKind, LatencyStats, ScenarioAggregate, ScenarioReport, TaskOutcome, TaskTally,
};
pub use runner::ScenarioRunner;
pub use scenario::Scenario;
pub use task::{predicate, rtn_is_zero, SuccessPredicate, TaskDefinition, TaskTable};
pub use think_time::ThinkTime;
pub use user::VirtualUser;

pub use karga::Aggregate;
pub use reqwest::header::HeaderMap as Headers;
pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
