use chrono::{DateTime, Utc};
use gasprobe_ethereum::{Error, RpcFault};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::RpcMethod;

/// Raw outcome of one probe, as returned at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Ok { value: Value },
    RpcFault(RpcFault),
    TransportFault { cause: String },
}

impl ProbeOutcome {
    pub fn ok(value: Value) -> Self {
        Self::Ok { value }
    }

    pub fn transport(cause: impl Into<String>) -> Self {
        Self::TransportFault { cause: cause.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok { value } => Some(value),
            _ => None,
        }
    }
}

impl From<Result<Value, Error>> for ProbeOutcome {
    fn from(result: Result<Value, Error>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(Error::Rpc(fault)) => Self::RpcFault(fault),
            Err(Error::Transport { cause }) => Self::TransportFault { cause },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub spec_id: String,
    pub method: RpcMethod,

    /// Parameters as sent, after output references were substituted
    pub params: Value,

    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: ProbeOutcome,
}
