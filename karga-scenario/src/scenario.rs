use crate::{
    auth::DEFAULT_LOGIN_PATH,
    template::{self, Vars},
    ConfigError, ThinkTime,
};
use reqwest::Url;

/// Read-only configuration shared by every virtual user of a run.
#[derive(Debug, Clone)]
pub struct Scenario {
    host: Url,
    pub think_time: ThinkTime,
    pub vars: Vars,
    pub login_path: String,
}

impl Scenario {
    pub fn new(host: &str) -> Result<Self, ConfigError> {
        let mut normalized = host.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let host = Url::parse(&normalized).map_err(|source| ConfigError::InvalidHost {
            host: host.to_string(),
            source,
        })?;
        if host.cannot_be_a_base() {
            return Err(ConfigError::InvalidHost {
                host: host.to_string(),
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            });
        }

        Ok(Self {
            host,
            think_time: ThinkTime::None,
            vars: Vars::new(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        })
    }

    pub fn think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn vars(mut self, vars: Vars) -> Self {
        self.vars = vars;
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Resolves a path template below the host. A leading `/` does not drop
    /// a base path configured on the host.
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        let rendered = template::render(path, &self.vars);
        self.host.join(rendered.trim_start_matches('/'))
    }

    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.url(&self.login_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_resolve_below_the_host() {
        let scenario = Scenario::new("https://example.test/base")
            .unwrap()
            .var("feed_id", "7");
        assert_eq!(
            scenario.url("/api/v1/feeds/{feed_id}/reposts").unwrap().as_str(),
            "https://example.test/base/api/v1/feeds/7/reposts"
        );
        assert_eq!(
            scenario.login_url().unwrap().as_str(),
            "https://example.test/base/api/v1/login"
        );
    }

    #[test]
    fn query_strings_survive() {
        let scenario = Scenario::new("https://example.test").unwrap();
        assert_eq!(
            scenario.url("/api/v1/configs?configType=IOS").unwrap().as_str(),
            "https://example.test/api/v1/configs?configType=IOS"
        );
    }

    #[test]
    fn invalid_host_is_rejected() {
        assert!(matches!(
            Scenario::new("not a url"),
            Err(ConfigError::InvalidHost { .. })
        ));
    }
}
