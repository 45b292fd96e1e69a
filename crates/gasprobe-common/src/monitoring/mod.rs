use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

mod tracer;
pub use tracer::Tracer;

mod metric;
pub use metric::Metric;

fn default_service_name() -> String {
    "gasprobe".to_string()
}

/// OpenTelemetry collector the metric and trace layers export to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub endpoint: String,

    /// Pre-encoded basic authentication token
    #[serde(default)]
    pub token: Option<String>,

    /// Basic authentication credentials, encoded on the fly when no token is given
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Configuration {
    fn authorization(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(STANDARD.encode(format!("{}:{}", username, password))),
            _ => None,
        }
    }

    fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(token) = self.authorization() {
            headers.insert("Authorization".to_string(), format!("Basic {}", token));
        }

        headers
    }
}
