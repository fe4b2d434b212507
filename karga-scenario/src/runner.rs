use crate::{
    ConfigError, Credentials, Scenario, ScenarioAggregate, ScenarioError, TaskTable, VirtualUser,
};
use karga::Aggregate;
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use typed_builder::TypedBuilder;

/// Spawns virtual users and merges what they measured.
///
/// A runner is single use: once [`ScenarioRunner::run`] returns, its stop
/// token is usually cancelled.
#[derive(TypedBuilder)]
pub struct ScenarioRunner {
    #[builder(default = Client::new())]
    client: Client,

    #[builder(setter(transform = |scenario: Scenario| Arc::new(scenario)))]
    scenario: Arc<Scenario>,

    #[builder(setter(transform = |tasks: TaskTable| Arc::new(tasks)))]
    tasks: Arc<TaskTable>,

    #[builder(default = 1)]
    users: usize,

    /// Users started per second.
    #[builder(default = 1.0)]
    spawn_rate: f64,

    #[builder(default, setter(strip_option(fallback = duration_opt)))]
    duration: Option<Duration>,

    /// Per virtual user.
    #[builder(default, setter(strip_option(fallback = iterations_opt)))]
    iterations: Option<u64>,

    #[builder(default, setter(into, strip_option(fallback = token_opt)))]
    token: Option<String>,

    #[builder(default, setter(strip_option(fallback = credentials_opt)))]
    credentials: Option<Credentials>,

    /// User `n` is seeded with `seed + n`.
    #[builder(default, setter(strip_option(fallback = seed_opt)))]
    seed: Option<u64>,

    #[builder(default)]
    stop: CancellationToken,
}

impl ScenarioRunner {
    /// Cancelling this token halts scheduling of new iterations.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Returns the delay between two user starts.
    fn validate(&self) -> Result<Duration, ConfigError> {
        if self.users == 0 || !self.spawn_rate.is_finite() || self.spawn_rate <= 0.0 {
            return Err(ConfigError::InvalidUsers);
        }
        let spawn_interval = Duration::try_from_secs_f64(1.0 / self.spawn_rate)
            .map_err(|_| ConfigError::InvalidUsers)?;
        if self.tasks.requires_auth() && self.token.is_none() && self.credentials.is_none() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(spawn_interval)
    }

    fn user(&self, id: usize, credentials: Option<&Arc<Credentials>>) -> VirtualUser {
        let mut user = VirtualUser::new(
            id,
            self.client.clone(),
            Arc::clone(&self.scenario),
            Arc::clone(&self.tasks),
        );
        if let Some(token) = &self.token {
            user = user.token(token.clone());
        }
        if let Some(credentials) = credentials {
            user = user.credentials(Arc::clone(credentials));
        }
        if let Some(iterations) = self.iterations {
            user = user.iterations(iterations);
        }
        if let Some(seed) = self.seed {
            user = user.seed(seed.wrapping_add(id as u64));
        }
        user
    }

    #[instrument(name = "scenario", skip_all, fields(host = %self.scenario.host()))]
    pub async fn run(&self) -> Result<ScenarioAggregate, ScenarioError> {
        let spawn_interval = self.validate()?;
        info!(
            users = self.users,
            spawn_rate = self.spawn_rate,
            duration = ?self.duration,
            iterations = ?self.iterations,
            "Starting scenario"
        );

        let timer = self.duration.map(|duration| {
            let stop = self.stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        info!("Run duration elapsed, stopping");
                        stop.cancel();
                    }
                    _ = stop.cancelled() => {}
                }
            })
        });

        let credentials = self.credentials.clone().map(Arc::new);
        let mut users = JoinSet::new();
        for id in 0..self.users {
            if self.stop.is_cancelled() {
                break;
            }
            let user = self.user(id, credentials.as_ref());
            let stop = self.stop.clone();
            users.spawn(async move {
                let res = user.run(stop.clone()).await;
                if res.is_err() {
                    stop.cancel();
                }
                res
            });

            if id + 1 < self.users {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(spawn_interval) => {}
                }
            }
        }

        let mut total = ScenarioAggregate::new();
        let mut first_err = None;
        while let Some(joined) = users.join_next().await {
            match joined.map_err(ScenarioError::from).and_then(|res| res) {
                Ok(aggregate) => total.merge(aggregate),
                Err(err) => {
                    warn!("Virtual user aborted: {err}");
                    self.stop.cancel();
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        info!(
            requests = total.count,
            failures = total.failure_count,
            "Scenario finished"
        );
        Ok(total)
    }
}
