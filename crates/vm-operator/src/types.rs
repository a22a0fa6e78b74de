use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A provisioned server as reported by the provider.
///
/// `created` is assigned by the provider and never changes; age is always
/// derived from it at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vm {
    pub id: i64,
    pub name: String,
    pub created: DateTime<Utc>,
    pub labels: HashMap<String, String>,
}

/// A public key registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshKey {
    pub id: i64,
    pub name: String,
    pub fingerprint: String,
    pub public_key: String,
    pub labels: HashMap<String, String>,
}

/// Request to register a new public key.
#[derive(Debug, Clone)]
pub struct NewSshKey {
    pub name: String,
    pub public_key: String,
    pub labels: HashMap<String, String>,
}

/// Specification for creating a server.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub server_type: String,
    pub image: String,
    /// Names of the SSH keys to inject.
    pub ssh_keys: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Result of a create request: the server descriptor plus the provider action
/// that finishes provisioning it.
#[derive(Debug, Clone)]
pub struct CreatedVm {
    pub vm: Vm,
    pub action: Action,
}

/// A provider-side asynchronous operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub id: i64,
    pub command: String,
    pub status: ActionStatus,
    pub error: Option<String>,
}

/// Provider-reported action state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Success,
    Error,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}
