use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{Instrument, Span, debug, info};

use crate::credentials::CredentialManager;
use crate::labels::{DELETE_AFTER_LABEL, LabelSelector, parse_delete_after};
use crate::types::{Action, ActionStatus, Vm, VmSpec};
use crate::{CloudFleetClient, DEFAULT_POLL_INTERVAL, Error, Result};

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Creates, deletes and reclaims scan worker VMs.
///
/// Holds no state of its own beyond configuration: every call re-reads the
/// provider's listings.
#[derive(Clone)]
pub struct FleetEngine {
    client: Arc<dyn CloudFleetClient>,
    credentials: CredentialManager,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    span: Span,
}

impl FleetEngine {
    pub fn new(client: Arc<dyn CloudFleetClient>) -> Self {
        let span = tracing::info_span!("vm_operator", component = "fleet");
        Self {
            credentials: CredentialManager::with_span(client.clone(), span.clone()),
            client,
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
            span,
        }
    }

    /// Delay between status checks while waiting for a creation action.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Log all operations (including key management) under `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.credentials = CredentialManager::with_span(self.client.clone(), span.clone());
        self.span = span;
        self
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Create a VM and wait until the provider has finished provisioning it.
    ///
    /// Every SSH key registered on the account is injected. If provisioning
    /// fails the server may still exist; it is not cleaned up here.
    pub async fn create_vm(
        &self,
        name: &str,
        model: &str,
        image: &str,
        labels: HashMap<String, String>,
    ) -> Result<Vm> {
        async {
            let ssh_keys = self
                .credentials
                .list_ssh_keys()
                .await?
                .into_iter()
                .map(|k| k.name)
                .collect::<Vec<_>>();

            debug!(vm = %name, model, image, keys = ssh_keys.len(), "creating vm");

            let created = self
                .client
                .create_vm(&VmSpec {
                    name: name.to_string(),
                    server_type: model.to_string(),
                    image: image.to_string(),
                    ssh_keys,
                    labels,
                })
                .await?;

            self.wait_for_action(name, created.action).await?;

            info!(vm = %name, server_id = created.vm.id, "vm provisioned");
            Ok::<_, Error>(created.vm)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Poll `action` until it reaches a terminal state. There is no timeout.
    async fn wait_for_action(&self, vm: &str, mut action: Action) -> Result<()> {
        let provisioning = |reason: String| Error::Provisioning {
            vm: vm.to_string(),
            reason,
        };

        while !action.status.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            action = self
                .client
                .get_action(action.id)
                .await
                .map_err(|e| provisioning(format!("polling action {}: {e}", action.id)))?;
        }

        match action.status {
            ActionStatus::Error => Err(provisioning(
                action
                    .error
                    .unwrap_or_else(|| format!("action {} failed", action.command)),
            )),
            _ => Ok(()),
        }
    }

    /// Delete the VM with the given name. A missing VM is not an error.
    ///
    /// Deletion is not awaited on the provider side.
    pub async fn delete_vm(&self, name: &str) -> Result<()> {
        async {
            if let Some(vm) = self.client.get_vm(name).await? {
                self.delete(&vm).await?;
            }
            Ok::<_, Error>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Delete ALL VMs visible to the credentials in use whose age exceeds
    /// `max_age_secs`. No label filtering is applied: scope the account.
    ///
    /// A VM exactly `max_age_secs` old is kept. Returns the deleted names.
    pub async fn purge_old_vms(&self, max_age_secs: u64) -> Result<Vec<String>> {
        async {
            let Some(max_age) = i64::try_from(max_age_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
            else {
                debug!(max_age_secs, "max age out of range, nothing to purge");
                return Ok(Vec::new());
            };

            let now = self.clock.now();
            let vms = self.client.list_vms().await?;
            let mut deleted = Vec::new();

            for vm in &vms {
                if now - vm.created > max_age {
                    self.delete(vm).await?;
                    deleted.push(vm.name.clone());
                }
            }

            debug!(
                max_age_secs,
                scanned = vms.len(),
                deleted = deleted.len(),
                "age purge finished"
            );
            Ok::<_, Error>(deleted)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Delete VMs matching the `key=value` selector whose `delete_after`
    /// label lies in the past. Returns the deleted names.
    ///
    /// VMs without `delete_after` are never touched. A `delete_after` without
    /// a timezone is read as UTC. An unparseable value aborts the sweep with
    /// [`Error::InvalidTimestamp`]; VMs deleted before it stay deleted.
    pub async fn purge_expired_vms(&self, label: &str) -> Result<Vec<String>> {
        async {
            let selector = LabelSelector::parse(label)?;
            let now = self.clock.now();
            let vms = self.client.list_vms().await?;
            let mut deleted = Vec::new();

            for vm in vms.iter().filter(|vm| selector.matches(&vm.labels)) {
                let Some(raw) = vm.labels.get(DELETE_AFTER_LABEL) else {
                    continue;
                };

                let delete_after =
                    parse_delete_after(raw).ok_or_else(|| Error::InvalidTimestamp {
                        vm: vm.name.clone(),
                        value: raw.clone(),
                        reason: "not an ISO-8601 timestamp".into(),
                    })?;

                if now > delete_after {
                    info!(vm = %vm.name, delete_after = %raw, "vm has expired delete_after label");
                    self.delete(vm).await?;
                    deleted.push(vm.name.clone());
                }
            }

            debug!(
                selector = %selector,
                scanned = vms.len(),
                deleted = deleted.len(),
                "expiry purge finished"
            );
            Ok::<_, Error>(deleted)
        }
        .instrument(self.span.clone())
        .await
    }

    /// All VMs visible on the account.
    pub async fn list_vms(&self) -> Result<Vec<Vm>> {
        self.client.list_vms().instrument(self.span.clone()).await
    }

    async fn delete(&self, vm: &Vm) -> Result<()> {
        info!(vm = %vm.name, server_id = vm.id, "deleting vm");
        self.client.delete_vm(vm).await
    }
}
