//! In-memory [`CloudFleetClient`] for tests.
//!
//! Behaves like the provider where the fleet logic depends on it: names are
//! unique, deletes of missing resources succeed, and server creation returns
//! an action that finishes after a configurable number of polls.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Action, ActionStatus, CreatedVm, NewSshKey, SshKey, Vm, VmSpec};
use crate::{CloudFleetClient, Error, Result};

#[derive(Debug)]
struct PendingAction {
    remaining_polls: u32,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    keys: Vec<SshKey>,
    vms: Vec<Vm>,
    attached_keys: HashMap<String, Vec<String>>,
    actions: HashMap<i64, PendingAction>,
    action_polls: u32,
    polls_per_action: u32,
    action_failure: Option<String>,
    deleted_vms: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creation actions started after this call need `polls` status checks
    /// before they report a terminal state. `0` means already finished.
    pub fn set_action_polls(&self, polls: u32) {
        self.state().polls_per_action = polls;
    }

    /// Creation actions started after this call end in the error state.
    pub fn fail_actions(&self, reason: impl Into<String>) {
        self.state().action_failure = Some(reason.into());
    }

    /// Seed a server with an explicit creation time.
    pub fn insert_vm(
        &self,
        name: &str,
        created: DateTime<Utc>,
        labels: HashMap<String, String>,
    ) -> Vm {
        let mut state = self.state();
        let vm = Vm {
            id: state.next_id(),
            name: name.to_string(),
            created,
            labels,
        };
        state.vms.push(vm.clone());
        vm
    }

    /// Number of action status checks served so far.
    pub fn action_polls(&self) -> u32 {
        self.state().action_polls
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.state().vms.iter().map(|vm| vm.name.clone()).collect()
    }

    /// Names of deleted servers, in deletion order.
    pub fn deleted_vms(&self) -> Vec<String> {
        self.state().deleted_vms.clone()
    }

    pub fn ssh_key_names(&self) -> Vec<String> {
        self.state().keys.iter().map(|k| k.name.clone()).collect()
    }

    /// SSH key names injected into the named server at creation.
    pub fn attached_keys(&self, vm_name: &str) -> Vec<String> {
        self.state()
            .attached_keys
            .get(vm_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CloudFleetClient for MemoryClient {
    async fn create_ssh_key(&self, key: &NewSshKey) -> Result<SshKey> {
        let mut state = self.state();
        if state.keys.iter().any(|k| k.name == key.name) {
            return Err(Error::Conflict(format!(
                "ssh key {} already exists",
                key.name
            )));
        }

        let id = state.next_id();
        let created = SshKey {
            id,
            name: key.name.clone(),
            fingerprint: format!("mem:{id:02x}"),
            public_key: key.public_key.clone(),
            labels: key.labels.clone(),
        };
        state.keys.push(created.clone());
        Ok(created)
    }

    async fn get_ssh_key(&self, name: &str) -> Result<Option<SshKey>> {
        Ok(self.state().keys.iter().find(|k| k.name == name).cloned())
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        Ok(self.state().keys.clone())
    }

    async fn delete_ssh_key(&self, key: &SshKey) -> Result<()> {
        self.state().keys.retain(|k| k.id != key.id);
        Ok(())
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<CreatedVm> {
        let mut state = self.state();
        if state.vms.iter().any(|vm| vm.name == spec.name) {
            return Err(Error::Conflict(format!("server {} already exists", spec.name)));
        }
        if let Some(missing) = spec
            .ssh_keys
            .iter()
            .find(|name| !state.keys.iter().any(|k| &k.name == *name))
        {
            return Err(Error::HetznerApi(format!("ssh key {missing} not found")));
        }

        let vm = Vm {
            id: state.next_id(),
            name: spec.name.clone(),
            created: Utc::now(),
            labels: spec.labels.clone(),
        };
        state.vms.push(vm.clone());
        state
            .attached_keys
            .insert(spec.name.clone(), spec.ssh_keys.clone());

        let action_id = state.next_id();
        let pending = PendingAction {
            remaining_polls: state.polls_per_action,
            failure: state.action_failure.clone(),
        };
        let action = action_view(action_id, &pending);
        state.actions.insert(action_id, pending);

        Ok(CreatedVm { vm, action })
    }

    async fn get_action(&self, id: i64) -> Result<Action> {
        let mut state = self.state();
        state.action_polls += 1;

        let pending = state
            .actions
            .get_mut(&id)
            .ok_or_else(|| Error::HetznerApi(format!("action {id} not found")))?;
        pending.remaining_polls = pending.remaining_polls.saturating_sub(1);

        Ok(action_view(id, pending))
    }

    async fn get_vm(&self, name: &str) -> Result<Option<Vm>> {
        Ok(self.state().vms.iter().find(|vm| vm.name == name).cloned())
    }

    async fn list_vms(&self) -> Result<Vec<Vm>> {
        Ok(self.state().vms.clone())
    }

    async fn delete_vm(&self, vm: &Vm) -> Result<()> {
        let mut state = self.state();
        let before = state.vms.len();
        state.vms.retain(|v| v.id != vm.id);
        if state.vms.len() != before {
            state.deleted_vms.push(vm.name.clone());
            state.attached_keys.remove(&vm.name);
        }
        Ok(())
    }
}

fn action_view(id: i64, pending: &PendingAction) -> Action {
    let (status, error) = match (pending.remaining_polls, &pending.failure) {
        (0, None) => (ActionStatus::Success, None),
        (0, Some(reason)) => (ActionStatus::Error, Some(reason.clone())),
        _ => (ActionStatus::Running, None),
    };

    Action {
        id,
        command: "create_server".into(),
        status,
        error,
    }
}
