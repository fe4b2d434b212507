//! Layered settings: built-in defaults, a TOML file, a secrets file,
//! `KARGA_` environment variables and finally command line flags.
use crate::{
    auth::DEFAULT_LOGIN_PATH,
    feeds,
    template::Vars,
    ConfigError, Credentials, Method, Scenario, ScenarioRunner, TaskDefinition, TaskTable,
    ThinkTime,
};
use clap::Args;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, str::FromStr, time::Duration};

pub const DEFAULT_CONFIG_FILE: &str = "karga-scenario.toml";
pub const ENV_PREFIX: &str = "KARGA_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub host: String,
    pub users: usize,
    pub spawn_rate: f64,
    /// humantime, e.g. `90s` or `5m`.
    pub duration: Option<String>,
    pub iterations: Option<u64>,
    pub min_wait: String,
    pub max_wait: String,
    pub login_path: String,
    pub seed: Option<u64>,
    pub token: Option<String>,
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub vars: Vars,
    /// Replaces the feed task table when not empty.
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    /// Per task weight overrides, applied after `tasks`.
    #[serde(default)]
    pub weights: BTreeMap<String, u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "http://localhost:8080".to_string(),
            users: 1,
            spawn_rate: 1.0,
            duration: None,
            iterations: None,
            min_wait: "1s".to_string(),
            max_wait: "5s".to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            seed: None,
            token: None,
            credentials: None,
            vars: Vars::from([(
                feeds::FEED_ID_VAR.to_string(),
                feeds::DEFAULT_FEED_ID.to_string(),
            )]),
            tasks: Vec::new(),
            weights: BTreeMap::new(),
        }
    }
}

/// A task as written in the settings file. Always validated with the
/// default `rtn == 0` predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_requires_auth")]
    pub requires_auth: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_requires_auth() -> bool {
    true
}

impl TryFrom<TaskSpec> for TaskDefinition {
    type Error = ConfigError;

    fn try_from(spec: TaskSpec) -> Result<Self, Self::Error> {
        let method = Method::from_str(&spec.method.to_uppercase())
            .map_err(|_| ConfigError::InvalidMethod(spec.method.clone()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &spec.headers {
            let name =
                HeaderName::from_str(name).map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeader(format!("{name}: {value}")))?;
            headers.insert(name, value);
        }

        let task = TaskDefinition::builder()
            .name(spec.name)
            .weight(spec.weight)
            .method(method)
            .path(spec.path)
            .headers(headers)
            .requires_auth(spec.requires_auth)
            .build();
        Ok(TaskDefinition {
            body: spec.body,
            ..task
        })
    }
}

/// Values given on the command line. Unset flags do not override anything.
#[derive(Debug, Clone, Default, Args, Serialize)]
pub struct Overrides {
    /// Base URL of the target service.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Number of virtual users.
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<usize>,

    /// Virtual users started per second.
    #[arg(short = 'r', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_rate: Option<f64>,

    /// Stop after this long, e.g. `30s` or `10m`.
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Tasks executed by each virtual user.
    #[arg(short = 'n', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,

    /// Lower bound of the think time.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_wait: Option<String>,

    /// Upper bound of the think time.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<String>,

    /// Seed for task selection and think time sampling.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Settings {
    /// `config` defaults to [`DEFAULT_CONFIG_FILE`], which may be absent.
    /// Explicitly named files must exist.
    pub fn figment(
        config: Option<&Path>,
        secrets: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        match config {
            Some(path) => figment = figment.merge(Toml::file(existing(path)?)),
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }
        if let Some(path) = secrets {
            figment = figment.merge(Toml::file(existing(path)?));
        }

        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides)))
    }

    pub fn load(
        config: Option<&Path>,
        secrets: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        Ok(Self::figment(config, secrets, overrides)?.extract()?)
    }

    pub fn think_time(&self) -> Result<ThinkTime, ConfigError> {
        ThinkTime::between(parse_duration(&self.min_wait)?, parse_duration(&self.max_wait)?)
    }

    pub fn run_duration(&self) -> Result<Option<Duration>, ConfigError> {
        self.duration.as_deref().map(parse_duration).transpose()
    }

    pub fn scenario(&self) -> Result<Scenario, ConfigError> {
        Ok(Scenario::new(&self.host)?
            .think_time(self.think_time()?)
            .vars(self.vars.clone())
            .login_path(self.login_path.clone()))
    }

    pub fn task_table(&self) -> Result<TaskTable, ConfigError> {
        let mut tasks = if self.tasks.is_empty() {
            feeds::tasks()
        } else {
            self.tasks
                .iter()
                .cloned()
                .map(TaskDefinition::try_from)
                .collect::<Result<Vec<_>, _>>()?
        };
        for task in &mut tasks {
            if let Some(weight) = self.weights.get(&task.name) {
                task.weight = *weight;
            }
        }
        TaskTable::new(tasks)
    }

    pub fn runner(&self) -> Result<ScenarioRunner, ConfigError> {
        Ok(ScenarioRunner::builder()
            .scenario(self.scenario()?)
            .tasks(self.task_table()?)
            .users(self.users)
            .spawn_rate(self.spawn_rate)
            .duration_opt(self.run_duration()?)
            .iterations_opt(self.iterations)
            .token_opt(self.token.clone())
            .credentials_opt(self.credentials.clone())
            .seed_opt(self.seed)
            .build())
    }
}

fn existing(path: &Path) -> Result<&Path, ConfigError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(figment::Error::from(format!("settings file {} does not exist", path.display())).into())
    }
}

fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|source| ConfigError::InvalidDuration {
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_use_the_feed_tasks() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load(None, None, &Overrides::default()).unwrap();
            assert_eq!(settings.users, 1);
            assert_eq!(
                settings.think_time().unwrap(),
                ThinkTime::Between {
                    min: Duration::from_secs(1),
                    max: Duration::from_secs(5)
                }
            );

            let table = settings.task_table().unwrap();
            let names: Vec<_> = table.tasks().iter().map(|t| t.name.as_str()).collect();
            assert_eq!(
                names,
                ["create_feed_repost", "get_feeds", "get_notifications", "get_configs"]
            );
            assert!(table.requires_auth());
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file_and_flags_override_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                host = "https://example.test"
                users = 10
                spawn_rate = 2.0
                duration = "30s"

                [weights]
                get_configs = 4
                "#,
            )?;
            jail.set_env("KARGA_USERS", "20");
            jail.set_env("KARGA_CREDENTIALS__USERNAME", "user");
            jail.set_env("KARGA_CREDENTIALS__PASSWORD", "pass");

            let overrides = Overrides {
                spawn_rate: Some(5.0),
                ..Overrides::default()
            };
            let settings = Settings::load(None, None, &overrides).unwrap();
            assert_eq!(settings.host, "https://example.test");
            assert_eq!(settings.users, 20);
            assert_eq!(settings.spawn_rate, 5.0);
            assert_eq!(settings.run_duration().unwrap(), Some(Duration::from_secs(30)));

            let credentials = settings.credentials.clone().unwrap();
            assert_eq!(credentials.username, "user");
            assert_eq!(credentials.login_type, "LOGIN_PASSWORD");

            let table = settings.task_table().unwrap();
            let configs = table.tasks().iter().find(|t| t.name == "get_configs").unwrap();
            assert_eq!(configs.weight, 4);
            assert!(settings.runner().is_ok());
            Ok(())
        });
    }

    #[test]
    fn secrets_file_supplies_the_token() {
        Jail::expect_with(|jail| {
            jail.create_file("secrets.toml", r#"token = "static-token""#)?;
            let settings =
                Settings::load(None, Some(Path::new("secrets.toml")), &Overrides::default())
                    .unwrap();
            assert_eq!(settings.token.as_deref(), Some("static-token"));
            Ok(())
        });
    }

    #[test]
    fn missing_named_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let res = Settings::load(Some(Path::new("nope.toml")), None, &Overrides::default());
            assert!(matches!(res, Err(ConfigError::Settings(_))));
            Ok(())
        });
    }

    #[test]
    fn tasks_from_file_replace_the_feed_table() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [[tasks]]
                name = "post_comment"
                method = "post"
                path = "/api/v1/feeds/{feed_id}/comments"
                body = { content = "hello {feed_id}" }
                headers = { "x-client" = "karga" }

                [[tasks]]
                name = "health"
                path = "/health"
                weight = 3
                requires_auth = false
                "#,
            )?;
            let settings = Settings::load(None, None, &Overrides::default()).unwrap();
            let table = settings.task_table().unwrap();
            let tasks = table.tasks();
            assert_eq!(tasks.len(), 2);
            assert_eq!(tasks[0].method, Method::POST);
            assert_eq!(tasks[0].body, Some(serde_json::json!({"content": "hello {feed_id}"})));
            assert_eq!(tasks[0].headers["x-client"], "karga");
            assert_eq!(tasks[1].weight, 3);
            assert!(!tasks[1].requires_auth);
            Ok(())
        });
    }

    #[test]
    fn bad_method_and_durations_are_rejected() {
        let spec = TaskSpec {
            name: "x".into(),
            weight: 1,
            method: "NOT A METHOD".into(),
            path: "/".into(),
            body: None,
            headers: BTreeMap::new(),
            requires_auth: false,
        };
        assert!(matches!(
            TaskDefinition::try_from(spec),
            Err(ConfigError::InvalidMethod(_))
        ));

        let settings = Settings {
            min_wait: "soon".into(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.think_time(),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
