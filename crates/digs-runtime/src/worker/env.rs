//! Worker bootstrap environment.
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `DIGS_MQTT_HOST` | `broker_host` | `127.0.0.1` |
//! | `DIGS_MQTT_PORT` | `broker_port` | `1883` |
//! | `DIGS_ID` | `worker_id` | required |
//! | `DIGS_NAMESPACE` | `namespace` | `digs` |
//! | `DIGS_PROJECT` | `project` | `home` |

use crate::config::ConfigError;
use digs_protocol::{DEFAULT_NAMESPACE, DEFAULT_PROJECT};

pub const ENV_MQTT_HOST: &str = "DIGS_MQTT_HOST";
pub const ENV_MQTT_PORT: &str = "DIGS_MQTT_PORT";
pub const ENV_ID: &str = "DIGS_ID";
pub const ENV_NAMESPACE: &str = "DIGS_NAMESPACE";
pub const ENV_PROJECT: &str = "DIGS_PROJECT";

/// What a worker needs to know to find its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub broker_host: String,
    pub broker_port: u16,
    pub worker_id: String,
    pub namespace: String,
    pub project: String,
}

impl WorkerEnv {
    /// The variables to pass to a worker process.
    #[must_use]
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_MQTT_HOST, self.broker_host.clone()),
            (ENV_MQTT_PORT, self.broker_port.to_string()),
            (ENV_ID, self.worker_id.clone()),
            (ENV_NAMESPACE, self.namespace.clone()),
            (ENV_PROJECT, self.project.clone()),
        ]
    }

    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] without `DIGS_ID` and
    /// [`ConfigError::InvalidEnvVar`] for a bad port.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let worker_id = lookup(ENV_ID)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::missing_env_var(ENV_ID))?;
        let broker_port = match lookup(ENV_MQTT_PORT) {
            Some(port) => port
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(ENV_MQTT_PORT, "expected port number"))?,
            None => 1883,
        };

        Ok(Self {
            broker_host: lookup(ENV_MQTT_HOST).unwrap_or_else(|| "127.0.0.1".into()),
            broker_port,
            worker_id,
            namespace: lookup(ENV_NAMESPACE).unwrap_or_else(|| DEFAULT_NAMESPACE.into()),
            project: lookup(ENV_PROJECT).unwrap_or_else(|| DEFAULT_PROJECT.into()),
        })
    }

    /// `host:port`.
    #[must_use]
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    /// The client id the worker-side dispatcher connects as.
    #[must_use]
    pub fn peon_id(&self) -> String {
        peon_id(&self.worker_id)
    }
}

/// `{worker_id}-peon`.
#[must_use]
pub fn peon_id(worker_id: &str) -> String {
    format!("{worker_id}-peon")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let env = WorkerEnv::from_lookup(lookup(&[("DIGS_ID", "uno-1")])).unwrap();
        assert_eq!(env.broker_address(), "127.0.0.1:1883");
        assert_eq!(env.namespace, "digs");
        assert_eq!(env.project, "home");
        assert_eq!(env.peon_id(), "uno-1-peon");
    }

    #[test]
    fn vars_roundtrip() {
        let env = WorkerEnv {
            broker_host: "10.1.1.1".into(),
            broker_port: 2883,
            worker_id: "mega-2".into(),
            namespace: "lab".into(),
            project: "bench".into(),
        };
        let vars: Vec<(String, String)> = env
            .vars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let pairs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        assert_eq!(WorkerEnv::from_lookup(lookup(&pairs)).unwrap(), env);
    }

    #[test]
    fn missing_id_is_an_error() {
        match WorkerEnv::from_lookup(lookup(&[("DIGS_MQTT_PORT", "1883")])) {
            Err(ConfigError::MissingEnvVar { name }) => assert_eq!(name, "DIGS_ID"),
            other => panic!("expected MissingEnvVar, got: {other:?}"),
        }
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = WorkerEnv::from_lookup(lookup(&[("DIGS_ID", "x"), ("DIGS_MQTT_PORT", "mqtt")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }
}
