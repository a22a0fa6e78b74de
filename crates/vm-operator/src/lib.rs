//! Lifecycle management for short-lived scan worker VMs.
//!
//! The provider is the only state store: every call re-reads the current
//! server and key listings. Ownership and expiry are encoded as labels on the
//! servers themselves.

pub mod credentials;
pub mod fleet;
pub mod hetzner;
pub mod labels;
pub mod memory;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use types::{Action, CreatedVm, NewSshKey, SshKey, Vm, VmSpec};

pub use credentials::CredentialManager;
pub use fleet::{Clock, FleetEngine, SystemClock};
pub use labels::{DELETE_AFTER_LABEL, LabelSelector};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provisioning of vm {vm} failed: {reason}")]
    Provisioning { vm: String, reason: String },

    #[error("vm {vm} has invalid delete_after label {value:?}: {reason}")]
    InvalidTimestamp {
        vm: String,
        value: String,
        reason: String,
    },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("hetzner api error: {0}")]
    HetznerApi(String),

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read/write access to the provider's key and server directories.
///
/// Implementations must treat deleting an already-deleted resource as success:
/// two sweeps racing on the same server are expected.
#[async_trait]
pub trait CloudFleetClient: Send + Sync + 'static {
    /// Register a key. Fails with [`Error::Conflict`] if the name is taken.
    async fn create_ssh_key(&self, key: &NewSshKey) -> Result<SshKey>;

    async fn get_ssh_key(&self, name: &str) -> Result<Option<SshKey>>;

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>>;

    async fn delete_ssh_key(&self, key: &SshKey) -> Result<()>;

    /// Request a new server. Provisioning continues asynchronously under the
    /// returned action.
    async fn create_vm(&self, spec: &VmSpec) -> Result<CreatedVm>;

    /// Fetch the current state of an action.
    async fn get_action(&self, id: i64) -> Result<Action>;

    async fn get_vm(&self, name: &str) -> Result<Option<Vm>>;

    async fn list_vms(&self) -> Result<Vec<Vm>>;

    async fn delete_vm(&self, vm: &Vm) -> Result<()>;
}

/// Delay between status checks while waiting for a provider action.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Process-level settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub api_token: String,
    pub poll_interval: Duration,
}

impl OperatorConfig {
    /// Load from env vars (a `.env` file is read first if present):
    ///
    /// - `HCLOUD_TOKEN` (required, `HETZNER_API_TOKEN` accepted as fallback)
    /// - `VM_OPERATOR_POLL_INTERVAL_MS` (default: `1000`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_token = std::env::var("HCLOUD_TOKEN")
            .or_else(|_| std::env::var("HETZNER_API_TOKEN"))
            .map_err(|_| Error::MissingEnv("HCLOUD_TOKEN".into()))?;

        let poll_interval = std::env::var("VM_OPERATOR_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        Ok(Self {
            api_token,
            poll_interval,
        })
    }
}
