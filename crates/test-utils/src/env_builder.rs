use std::collections::BTreeMap;

use tart_executor::config::driver_var;
use tart_executor::context::{JOB_ID_VAR, JOB_IMAGE_VAR};
use tart_executor::env::{Environment, USER_VAR_PREFIX};

/// Builder for the environment the CI runner hands to a stage process.
#[derive(Debug, Clone)]
pub struct JobEnvBuilder {
    vars: BTreeMap<String, String>,
}

impl JobEnvBuilder {
    /// Job `job_id` running `org/image:latest`.
    pub fn new(job_id: &str) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(JOB_ID_VAR.to_string(), job_id.to_string());
        vars.insert(JOB_IMAGE_VAR.to_string(), "org/image:latest".to_string());
        Self { vars }
    }

    pub fn image(self, image: &str) -> Self {
        self.var(JOB_IMAGE_VAR, image)
    }

    pub fn without(mut self, key: &str) -> Self {
        self.vars.remove(key);
        self
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    /// A job variable, as the runner passes it (`CUSTOM_ENV_` prefixed).
    pub fn user_var(self, key: &str, value: &str) -> Self {
        self.var(&format!("{USER_VAR_PREFIX}{key}"), value)
    }

    /// An operator-level driver setting (`TART_EXECUTOR_` prefixed).
    pub fn driver(self, setting: &str, value: &str) -> Self {
        self.var(&driver_var(setting), value)
    }

    /// Apply the `job_env` a previous `configure` stage returned.
    pub fn with_job_env(mut self, job_env: &BTreeMap<String, String>) -> Self {
        self.vars.extend(job_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn build(self) -> Environment {
        self.vars.into_iter().collect()
    }
}
