use crate::AuthError;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

pub const DEFAULT_LOGIN_PATH: &str = "api/v1/login";
pub const DEFAULT_LOGIN_TYPE: &str = "LOGIN_PASSWORD";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default = "default_login_type")]
    pub login_type: String,
    pub username: String,
    pub password: String,
}

fn default_login_type() -> String {
    DEFAULT_LOGIN_TYPE.to_string()
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login_type: default_login_type(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn payload(&self) -> Value {
        json!({
            "loginType": self.login_type,
            "data": {
                "username": self.username,
                "password": self.password,
            }
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login_type", &self.login_type)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token held by a single virtual user.
#[derive(Clone, Default)]
pub struct AuthState {
    token: Option<String>,
}

impl AuthState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("bearer {t}"))
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Posts `credentials` to `url` and extracts `data.token` from the JSON answer.
pub async fn login(
    client: &Client,
    url: Url,
    credentials: &Credentials,
) -> Result<String, AuthError> {
    let res = client
        .post(url)
        .json(&credentials.payload())
        .send()
        .await
        .map_err(AuthError::Network)?;

    let status = res.status();
    if !status.is_success() {
        return Err(AuthError::Status(status));
    }

    let body = res.bytes().await.map_err(AuthError::Network)?;
    let body: Value = serde_json::from_slice(&body)?;
    extract_token(&body).ok_or(AuthError::MissingToken)
}

fn extract_token(body: &Value) -> Option<String> {
    body.get("data")?
        .get("token")?
        .as_str()
        .map(str::to_owned)
}
