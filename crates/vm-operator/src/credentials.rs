use std::collections::HashMap;
use std::sync::Arc;

use tracing::{Instrument, Span, info};

use crate::types::{NewSshKey, SshKey};
use crate::{CloudFleetClient, Error, Result};

/// Manages the SSH keys used to bootstrap new servers.
#[derive(Clone)]
pub struct CredentialManager {
    client: Arc<dyn CloudFleetClient>,
    span: Span,
}

impl CredentialManager {
    pub fn new(client: Arc<dyn CloudFleetClient>) -> Self {
        Self::with_span(client, tracing::info_span!("vm_operator", component = "credentials"))
    }

    /// Log all operations under the given span instead of the default one.
    pub fn with_span(client: Arc<dyn CloudFleetClient>, span: Span) -> Self {
        Self { client, span }
    }

    /// Register a new key. Name uniqueness is enforced by the provider and
    /// surfaces as [`crate::Error::Conflict`].
    pub async fn add_new_ssh_key(
        &self,
        name: &str,
        public_key: &str,
        labels: HashMap<String, String>,
    ) -> Result<SshKey> {
        let req = NewSshKey {
            name: name.to_string(),
            public_key: public_key.to_string(),
            labels,
        };

        async {
            let key = self.client.create_ssh_key(&req).await?;
            info!(key = %key.name, fingerprint = %key.fingerprint, "ssh key added");
            Ok::<_, Error>(key)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Delete the key with the given name. A missing key is not an error.
    pub async fn delete_ssh_key(&self, name: &str) -> Result<()> {
        async {
            if let Some(key) = self.client.get_ssh_key(name).await? {
                info!(key = %name, "deleting ssh key");
                self.client.delete_ssh_key(&key).await?;
            }
            Ok::<_, Error>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// All keys currently registered on the account.
    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        self.client
            .list_ssh_keys()
            .instrument(self.span.clone())
            .await
    }
}
