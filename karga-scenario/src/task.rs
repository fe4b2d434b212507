use crate::ConfigError;
use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};
use reqwest::{header::HeaderMap, Method};
use serde_json::Value;
use std::{fmt, sync::Arc};
use typed_builder::TypedBuilder;

/// Decides whether a decoded response body counts as a success.
pub type SuccessPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub fn predicate<F>(f: F) -> SuccessPredicate
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Default predicate: the body carries `"rtn": 0`. A missing or non integer
/// `rtn` is an application failure.
pub fn rtn_is_zero(body: &Value) -> bool {
    body.get("rtn").and_then(Value::as_i64) == Some(0)
}

#[derive(TypedBuilder, Clone)]
pub struct TaskDefinition {
    #[builder(setter(into))]
    pub name: String,

    #[builder(default = 1)]
    pub weight: u32,

    #[builder(default = Method::GET)]
    pub method: Method,

    /// Relative to the scenario host, may contain `{var}` placeholders.
    #[builder(setter(into))]
    pub path: String,

    #[builder(default, setter(strip_option))]
    pub body: Option<Value>,

    #[builder(default)]
    pub headers: HeaderMap,

    #[builder(default = true)]
    pub requires_auth: bool,

    #[builder(default = predicate(rtn_is_zero))]
    pub success: SuccessPredicate,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("requires_auth", &self.requires_auth)
            .finish_non_exhaustive()
    }
}

/// Immutable set of tasks with a precomputed weighted index.
#[derive(Debug, Clone)]
pub struct TaskTable {
    tasks: Vec<TaskDefinition>,
    index: WeightedIndex<u32>,
}

impl TaskTable {
    pub fn new(tasks: Vec<TaskDefinition>) -> Result<Self, ConfigError> {
        if tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }
        if tasks.iter().map(|t| u64::from(t.weight)).sum::<u64>() == 0 {
            return Err(ConfigError::ZeroWeight);
        }
        let index = WeightedIndex::new(tasks.iter().map(|t| t.weight))
            .map_err(|_| ConfigError::ZeroWeight)?;
        Ok(Self { tasks, index })
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &TaskDefinition {
        &self.tasks[self.index.sample(rng)]
    }

    /// True when at least one task that can be selected needs a token.
    pub fn requires_auth(&self) -> bool {
        self.tasks.iter().any(|t| t.weight > 0 && t.requires_auth)
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn total_weight(&self) -> u64 {
        self.tasks.iter().map(|t| u64::from(t.weight)).sum()
    }
}
