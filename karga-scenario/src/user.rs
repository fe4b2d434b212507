use crate::{
    auth::{self, AuthState, Credentials},
    template, ConfigError, FailureKind, Scenario, ScenarioAggregate, ScenarioError, TaskDefinition,
    TaskOutcome, TaskTable,
};
use karga::Aggregate;
use rand::{rngs::SmallRng, SeedableRng};
use reqwest::{
    header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One simulated client. Owns its token and random source, shares nothing
/// mutable with other users.
pub struct VirtualUser {
    id: usize,
    client: Client,
    scenario: Arc<Scenario>,
    tasks: Arc<TaskTable>,
    auth: AuthState,
    credentials: Option<Arc<Credentials>>,
    rng: SmallRng,
    iterations: Option<u64>,
}

impl VirtualUser {
    pub fn new(
        id: usize,
        client: Client,
        scenario: Arc<Scenario>,
        tasks: Arc<TaskTable>,
    ) -> Self {
        Self {
            id,
            client,
            scenario,
            tasks,
            auth: AuthState::empty(),
            credentials: None,
            rng: SmallRng::from_entropy(),
            iterations: None,
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthState::with_token(token);
        self
    }

    pub fn credentials(mut self, credentials: Arc<Credentials>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// Logs in unless a token is already held. Tasks needing a token cannot
    /// run without one, so missing credentials are a configuration error.
    pub async fn start(&mut self) -> Result<(), ScenarioError> {
        if self.auth.is_authenticated() {
            return Ok(());
        }
        let Some(credentials) = self.credentials.clone() else {
            if self.tasks.requires_auth() {
                return Err(ConfigError::MissingCredentials.into());
            }
            return Ok(());
        };

        let url = self
            .scenario
            .login_url()
            .map_err(|source| ConfigError::InvalidHost {
                host: self.scenario.login_path.clone(),
                source,
            })?;
        match auth::login(&self.client, url, &credentials).await {
            Ok(token) => {
                info!(username = %credentials.username, "Logged in");
                self.auth.set_token(token);
                Ok(())
            }
            Err(err) => {
                warn!("Login failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Issues one task. Never fails: transport, status, decode and predicate
    /// failures all come back as an unsuccessful outcome.
    pub async fn execute_task(&self, task: &TaskDefinition) -> TaskOutcome {
        let url = match self.scenario.url(&task.path) {
            Ok(url) => url,
            Err(err) => {
                warn!(task = %task.name, "Cannot build request URL: {err}");
                return TaskOutcome::failed(&task.name, FailureKind::Application);
            }
        };

        let mut headers = task.headers.clone();
        if task.requires_auth {
            let bearer = self.auth.bearer().map(HeaderValue::try_from);
            match bearer {
                Some(Ok(value)) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Some(Err(_)) | None => {
                    warn!(task = %task.name, "No usable token, skipping request");
                    return TaskOutcome::failed(&task.name, FailureKind::Application);
                }
            }
        }

        let mut req = self.client.request(task.method.clone(), url);
        let mut bytes_sent = 0;
        if let Some(body) = &task.body {
            let body = template::render_json(body, &self.scenario.vars).to_string();
            bytes_sent = body.len() as u64;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            req = req.body(body);
        }
        let req = req.headers(headers);

        let start = Instant::now();
        let res = match req.send().await {
            Ok(res) => res,
            Err(err) => {
                debug!(task = %task.name, "Request failed: {err}");
                return TaskOutcome {
                    latency: start.elapsed(),
                    bytes_sent,
                    ..TaskOutcome::failed(&task.name, FailureKind::Network)
                };
            }
        };
        let status = res.status();
        let body = res.bytes().await;
        let latency = start.elapsed();

        let mut outcome = TaskOutcome {
            task: task.name.clone(),
            success: false,
            status: Some(status.as_u16()),
            latency,
            failure: None,
            raw_response: None,
            bytes_sent,
            bytes_received: 0,
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                debug!(task = %task.name, "Reading body failed: {err}");
                outcome.failure = Some(FailureKind::Network);
                return outcome;
            }
        };
        outcome.bytes_received = body.len() as u64;
        outcome.raw_response = Some(String::from_utf8_lossy(&body).into_owned());

        outcome.failure = if !status.is_success() {
            Some(FailureKind::Status)
        } else {
            match serde_json::from_slice::<Value>(&body) {
                Ok(json) if (task.success)(&json) => None,
                Ok(_) => Some(FailureKind::Application),
                Err(_) => Some(FailureKind::Decode),
            }
        };
        outcome.success = outcome.failure.is_none();
        outcome
    }

    /// Task loop: select, execute, record, pause. Stops after the iteration
    /// budget or as soon as `stop` is cancelled; a request already in flight
    /// is allowed to finish.
    #[instrument(name = "virtual_user", skip_all, fields(user = self.id))]
    pub async fn run(
        mut self,
        stop: CancellationToken,
    ) -> Result<ScenarioAggregate, ScenarioError> {
        self.start().await?;

        let tasks = Arc::clone(&self.tasks);
        let mut aggregate = ScenarioAggregate::new();
        let mut done = 0u64;

        while !stop.is_cancelled() && self.iterations.map_or(true, |n| done < n) {
            let task = tasks.select(&mut self.rng);
            let outcome = self.execute_task(task).await;
            if outcome.success {
                debug!(task = %outcome.task, latency = ?outcome.latency, "Task succeeded");
            } else {
                warn!(
                    task = %outcome.task,
                    status = ?outcome.status,
                    failure = ?outcome.failure,
                    "Task failed"
                );
            }
            aggregate.consume(&outcome);
            done += 1;

            let pause = self.scenario.think_time.sample(&mut self.rng);
            aggregate.record_pause(pause);
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!(iterations = done, "Virtual user finished");
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user_for(server: &MockServer, tasks: Vec<TaskDefinition>) -> VirtualUser {
        let scenario = Scenario::new(&server.uri()).unwrap().var("feed_id", "99");
        VirtualUser::new(
            0,
            Client::new(),
            Arc::new(scenario),
            Arc::new(TaskTable::new(tasks).unwrap()),
        )
    }

    fn repost() -> TaskDefinition {
        TaskDefinition::builder()
            .name("create_feed_repost")
            .method(Method::POST)
            .path("/api/v1/feeds/{feed_id}/reposts")
            .body(json!({"content": "123", "isSuccessful": true}))
            .build()
    }

    #[tokio::test]
    async fn rtn_zero_is_success_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/feeds/99/reposts"))
            .and(header("authorization", "bearer abc"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"content": "123", "isSuccessful": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rtn": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let user = user_for(&server, vec![repost()]).token("abc");
        let outcome = user.execute_task(&repost()).await;
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.status, Some(200));
        assert_eq!(outcome.raw_response.as_deref(), Some(r#"{"rtn":0}"#));
    }

    #[tokio::test]
    async fn rtn_non_zero_is_application_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rtn": 1})))
            .mount(&server)
            .await;

        let user = user_for(&server, vec![repost()]).token("abc");
        let outcome = user.execute_task(&repost()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Application));
    }

    #[tokio::test]
    async fn missing_rtn_is_application_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let user = user_for(&server, vec![repost()]).token("abc");
        let outcome = user.execute_task(&repost()).await;
        assert_eq!(outcome.failure, Some(FailureKind::Application));
    }

    #[tokio::test]
    async fn non_json_body_is_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let user = user_for(&server, vec![repost()]).token("abc");
        let outcome = user.execute_task(&repost()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(FailureKind::Decode));
        assert_eq!(outcome.raw_response.as_deref(), Some("<html>oops</html>"));
    }

    #[tokio::test]
    async fn server_error_is_status_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"rtn": 0})))
            .mount(&server)
            .await;

        let user = user_for(&server, vec![repost()]).token("abc");
        let outcome = user.execute_task(&repost()).await;
        assert_eq!(outcome.status, Some(503));
        assert_eq!(outcome.failure, Some(FailureKind::Status));
    }

    #[tokio::test]
    async fn unreachable_host_is_network_failure() {
        let scenario = Scenario::new("http://127.0.0.1:1").unwrap();
        let user = VirtualUser::new(
            0,
            Client::new(),
            Arc::new(scenario),
            Arc::new(TaskTable::new(vec![repost()]).unwrap()),
        )
        .token("abc");

        let outcome = user.execute_task(&repost()).await;
        assert_eq!(outcome.failure, Some(FailureKind::Network));
        assert_eq!(outcome.status, None);
    }

    #[tokio::test]
    async fn unbuildable_url_is_application_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rtn": 0})))
            .expect(0)
            .mount(&server)
            .await;

        let broken = TaskDefinition::builder()
            .name("broken")
            .path("http://[oops/feeds")
            .requires_auth(false)
            .build();
        let user = user_for(&server, vec![broken.clone()]);
        let outcome = user.execute_task(&broken).await;
        assert_eq!(outcome.failure, Some(FailureKind::Application));
        assert_eq!(outcome.status, None);
    }

    #[tokio::test]
    async fn auth_task_without_token_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rtn": 0})))
            .expect(0)
            .mount(&server)
            .await;

        let user = user_for(&server, vec![repost()]);
        let outcome = user.execute_task(&repost()).await;
        assert_eq!(outcome.failure, Some(FailureKind::Application));
    }

    #[tokio::test]
    async fn start_requires_credentials_for_auth_tasks() {
        let server = MockServer::start().await;
        let mut user = user_for(&server, vec![repost()]);
        let err = user.start().await.unwrap_err();
        assert!(matches!(err, ScenarioError::Config(ConfigError::MissingCredentials)));
    }

    #[tokio::test]
    async fn start_logs_in_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "tok"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut user = user_for(&server, vec![repost()])
            .credentials(Arc::new(Credentials::new("user", "pass")));
        user.start().await.unwrap();
        user.start().await.unwrap();
        assert_eq!(user.auth().token(), Some("tok"));
    }
}
