use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use vm_operator::labels::{delete_after_value, parse_label_pairs};
use vm_operator::{DELETE_AFTER_LABEL, FleetEngine};

pub async fn add_key(
    fleet: &FleetEngine,
    name: &str,
    public_key: Option<String>,
    public_key_file: Option<PathBuf>,
    labels: &[String],
) -> Result<()> {
    let public_key = match (public_key, public_key_file) {
        (Some(key), _) => key,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => return Err(anyhow!("either --public-key or --public-key-file is required")),
    };
    let labels = parse_label_pairs(labels)?;

    let key = fleet
        .credentials()
        .add_new_ssh_key(name, public_key.trim(), labels)
        .await?;
    println!("{}", serde_json::to_string_pretty(&key)?);
    Ok(())
}

pub async fn delete_key(fleet: &FleetEngine, name: &str) -> Result<()> {
    fleet.credentials().delete_ssh_key(name).await?;
    Ok(())
}

pub async fn create_vm(
    fleet: &FleetEngine,
    name: &str,
    model: &str,
    image: &str,
    labels: &[String],
    ttl_secs: Option<u64>,
) -> Result<()> {
    let mut labels = parse_label_pairs(labels)?;

    if let Some(ttl) = ttl_secs {
        labels.insert(DELETE_AFTER_LABEL.to_string(), expiry_label(Utc::now(), ttl)?);
    }

    let vm = fleet.create_vm(name, model, image, labels).await?;
    println!("{}", serde_json::to_string_pretty(&vm)?);
    Ok(())
}

/// `delete_after` value for a VM that expires `ttl_secs` after `now`.
fn expiry_label(now: DateTime<Utc>, ttl_secs: u64) -> Result<String> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map(delete_after_value)
        .ok_or_else(|| anyhow!("--ttl-secs {ttl_secs} is out of range"))
}

pub async fn delete_vm(fleet: &FleetEngine, name: &str) -> Result<()> {
    fleet.delete_vm(name).await?;
    Ok(())
}

pub async fn purge_old(fleet: &FleetEngine, max_age_secs: u64) -> Result<()> {
    let deleted = fleet.purge_old_vms(max_age_secs).await?;
    tracing::info!(count = deleted.len(), "purged old vms");
    Ok(())
}

pub async fn purge_expired(fleet: &FleetEngine, label: &str) -> Result<()> {
    let deleted = fleet.purge_expired_vms(label).await?;
    tracing::info!(count = deleted.len(), selector = label, "purged expired vms");
    Ok(())
}

pub async fn list_vms(fleet: &FleetEngine) -> Result<()> {
    let vms = fleet.list_vms().await?;
    println!("{}", serde_json::to_string_pretty(&vms)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use vm_operator::memory::MemoryClient;

    use super::*;

    #[test]
    fn expiry_label_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(expiry_label(now, 3600).unwrap(), "20261016T130000Z");
    }

    #[test]
    fn expiry_label_rejects_ttl_past_the_calendar() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert!(expiry_label(now, 9_000_000_000_000).is_err());
        assert!(expiry_label(now, u64::MAX).is_err());
    }

    #[tokio::test]
    async fn create_vm_with_huge_ttl_fails_without_creating() {
        let client = Arc::new(MemoryClient::new());
        let fleet = FleetEngine::new(client.clone());

        let result = create_vm(&fleet, "x", "cx22", "img", &[], Some(9_000_000_000_000)).await;

        assert!(result.is_err());
        assert!(client.vm_names().is_empty());
    }
}
