use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hcloud::apis::configuration::Configuration;
use hcloud::apis::{actions_api, servers_api, ssh_keys_api};
use hcloud::models;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{Action, ActionStatus, CreatedVm, NewSshKey, SshKey, Vm, VmSpec};
use crate::{CloudFleetClient, Error, OperatorConfig, Result};

/// Hetzner Cloud caps list responses at 50 entries per page.
const PAGE_SIZE: i64 = 50;

/// Hetzner Cloud binding using the `hcloud` crate.
pub struct HetznerClient {
    config: Configuration,
}

impl HetznerClient {
    pub fn new(api_token: impl Into<String>) -> Self {
        let mut config = Configuration::new();
        config.bearer_access_token = Some(api_token.into());
        Self { config }
    }

    /// Create from env vars, see [`OperatorConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        let config = OperatorConfig::from_env()?;
        Ok(Self::new(config.api_token))
    }

    fn ssh_key(key: models::SshKey) -> SshKey {
        SshKey {
            id: key.id,
            name: key.name,
            fingerprint: key.fingerprint,
            public_key: key.public_key,
            labels: key.labels,
        }
    }

    fn vm(server: models::Server) -> Result<Vm> {
        Ok(Vm {
            id: server.id,
            created: parse_created(&server.name, &server.created)?,
            name: server.name,
            labels: server.labels,
        })
    }

    fn action(action: &models::Action) -> Action {
        let status = match action.status {
            models::action::Status::Running => ActionStatus::Running,
            models::action::Status::Success => ActionStatus::Success,
            _ => ActionStatus::Error,
        };

        Action {
            id: action.id,
            command: action.command.clone(),
            status,
            error: action_error_message(action),
        }
    }

    async fn list_servers(&self, name: Option<&str>) -> Result<Vec<Vm>> {
        let mut vms = Vec::new();
        let mut page: i64 = 1;

        loop {
            let resp = servers_api::list_servers(
                &self.config,
                servers_api::ListServersParams {
                    name: name.map(str::to_string),
                    page: Some(page),
                    per_page: Some(PAGE_SIZE),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::HetznerApi(format!("list servers: {e}")))?;

            let next = next_page(&resp.meta);
            for server in resp.servers {
                vms.push(Self::vm(server)?);
            }

            match next {
                Some(next) => page = next,
                None => break,
            }
        }

        debug!(count = vms.len(), "hetzner: listed servers");
        Ok(vms)
    }

    async fn list_keys(&self, name: Option<&str>) -> Result<Vec<SshKey>> {
        let mut keys = Vec::new();
        let mut page: i64 = 1;

        loop {
            let resp = ssh_keys_api::list_ssh_keys(
                &self.config,
                ssh_keys_api::ListSshKeysParams {
                    name: name.map(str::to_string),
                    page: Some(page),
                    per_page: Some(PAGE_SIZE),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::HetznerApi(format!("list ssh keys: {e}")))?;

            let next = next_page(&resp.meta);
            keys.extend(resp.ssh_keys.into_iter().map(Self::ssh_key));

            match next {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl CloudFleetClient for HetznerClient {
    async fn create_ssh_key(&self, key: &NewSshKey) -> Result<SshKey> {
        let resp = ssh_keys_api::create_ssh_key(
            &self.config,
            ssh_keys_api::CreateSshKeyParams {
                create_ssh_key_request: models::CreateSshKeyRequest {
                    name: key.name.clone(),
                    public_key: key.public_key.clone(),
                    labels: Some(key.labels.clone()),
                },
            },
        )
        .await
        .map_err(|e| {
            let msg = format!("{e}");
            if is_conflict(&msg) {
                Error::Conflict(format!("ssh key {} already exists", key.name))
            } else {
                Error::HetznerApi(format!("create ssh key: {msg}"))
            }
        })?;

        Ok(Self::ssh_key(*resp.ssh_key))
    }

    async fn get_ssh_key(&self, name: &str) -> Result<Option<SshKey>> {
        Ok(self
            .list_keys(Some(name))
            .await?
            .into_iter()
            .find(|k| k.name == name))
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        self.list_keys(None).await
    }

    async fn delete_ssh_key(&self, key: &SshKey) -> Result<()> {
        if let Err(e) = ssh_keys_api::delete_ssh_key(
            &self.config,
            ssh_keys_api::DeleteSshKeyParams { id: key.id },
        )
        .await
        {
            let msg = format!("{e}");
            if is_not_found(&msg) {
                warn!(key = %key.name, "hetzner: ssh key already deleted");
                return Ok(());
            }
            return Err(Error::HetznerApi(format!("delete ssh key: {msg}")));
        }

        Ok(())
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<CreatedVm> {
        let ssh_keys = if spec.ssh_keys.is_empty() {
            None
        } else {
            Some(spec.ssh_keys.clone())
        };

        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: models::CreateServerRequest {
                    name: spec.name.clone(),
                    server_type: spec.server_type.clone(),
                    image: spec.image.clone(),
                    location: None,
                    user_data: None,
                    networks: None,
                    firewalls: None,
                    ssh_keys,
                    volumes: None,
                    start_after_create: Some(true),
                    automount: None,
                    datacenter: None,
                    labels: Some(spec.labels.clone()),
                    placement_group: None,
                    public_net: None,
                },
            },
        )
        .await
        .map_err(|e| {
            let msg = format!("{e}");
            if is_conflict(&msg) {
                Error::Conflict(format!("server {} already exists", spec.name))
            } else {
                Error::HetznerApi(format!("create server: {msg}"))
            }
        })?;

        let action = Self::action(&resp.action);
        let vm = Self::vm(*resp.server)?;

        debug!(server_id = vm.id, action_id = action.id, "hetzner: server create accepted");

        Ok(CreatedVm { vm, action })
    }

    async fn get_action(&self, id: i64) -> Result<Action> {
        let resp = actions_api::get_action(&self.config, actions_api::GetActionParams { id })
            .await
            .map_err(|e| Error::HetznerApi(format!("get action: {e}")))?;

        Ok(Self::action(&resp.action))
    }

    async fn get_vm(&self, name: &str) -> Result<Option<Vm>> {
        Ok(self
            .list_servers(Some(name))
            .await?
            .into_iter()
            .find(|vm| vm.name == name))
    }

    async fn list_vms(&self) -> Result<Vec<Vm>> {
        self.list_servers(None).await
    }

    async fn delete_vm(&self, vm: &Vm) -> Result<()> {
        if let Err(e) = servers_api::delete_server(
            &self.config,
            servers_api::DeleteServerParams { id: vm.id },
        )
        .await
        {
            let msg = format!("{e}");
            if is_not_found(&msg) {
                warn!(server_id = vm.id, vm = %vm.name, "hetzner: server already deleted");
                return Ok(());
            }
            return Err(Error::HetznerApi(format!("delete server: {msg}")));
        }

        Ok(())
    }
}

/// Parse the provider's RFC 3339 `created` field.
fn parse_created(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::HetznerApi(format!("server {name} has invalid created {raw:?}: {e}")))
}

/// The action's error message, if the provider attached one.
fn action_error_message(action: &models::Action) -> Option<String> {
    let value = serde_json::to_value(&action.error).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// `meta.pagination.next_page` of a list response; `None` on the last page.
fn next_page<M: Serialize>(meta: &M) -> Option<i64> {
    serde_json::to_value(meta)
        .ok()?
        .pointer("/pagination/next_page")
        .and_then(|p| p.as_i64())
}

fn is_not_found(msg: &str) -> bool {
    msg.contains("404") || msg.contains("not_found")
}

fn is_conflict(msg: &str) -> bool {
    msg.contains("409") || msg.contains("uniqueness_error")
}
