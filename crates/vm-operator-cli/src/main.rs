use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vm_operator::hetzner::HetznerClient;
use vm_operator::{FleetEngine, OperatorConfig};

mod commands;

#[derive(Parser)]
#[command(name = "vm-operator")]
#[command(about = "Provision and reclaim short-lived scan worker VMs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an SSH public key
    AddKey {
        /// Key name (must be unique on the account)
        #[arg(short, long)]
        name: String,

        /// Public key material
        #[arg(long, conflicts_with = "public_key_file", required_unless_present = "public_key_file")]
        public_key: Option<String>,

        /// Read the public key from a file
        #[arg(long)]
        public_key_file: Option<std::path::PathBuf>,

        /// Labels (KEY=VALUE)
        #[arg(short, long)]
        label: Vec<String>,
    },

    /// Delete an SSH key by name
    DeleteKey {
        /// Key name
        name: String,
    },

    /// Create a VM and wait until it is provisioned
    CreateVm {
        /// VM name
        #[arg(short, long)]
        name: String,

        /// Server type (e.g. "cx22")
        #[arg(short, long)]
        model: String,

        /// OS image (e.g. "debian-12")
        #[arg(short, long)]
        image: String,

        /// Labels (KEY=VALUE)
        #[arg(short, long)]
        label: Vec<String>,

        /// Set a delete_after label this many seconds from now
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Delete a VM by name
    DeleteVm {
        /// VM name
        name: String,
    },

    /// Delete every VM on the account older than the given age
    PurgeOld {
        /// Maximum age in seconds
        #[arg(long)]
        max_age_secs: u64,
    },

    /// Delete VMs matching a label whose delete_after has passed
    PurgeExpired {
        /// Ownership selector (KEY=VALUE)
        #[arg(short, long)]
        label: String,
    },

    /// List all VMs as JSON
    ListVms,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = OperatorConfig::from_env()?;

    let client = Arc::new(HetznerClient::new(config.api_token));
    let fleet = FleetEngine::new(client).with_poll_interval(config.poll_interval);

    match cli.command {
        Commands::AddKey {
            name,
            public_key,
            public_key_file,
            label,
        } => commands::add_key(&fleet, &name, public_key, public_key_file, &label).await,
        Commands::DeleteKey { name } => commands::delete_key(&fleet, &name).await,
        Commands::CreateVm {
            name,
            model,
            image,
            label,
            ttl_secs,
        } => commands::create_vm(&fleet, &name, &model, &image, &label, ttl_secs).await,
        Commands::DeleteVm { name } => commands::delete_vm(&fleet, &name).await,
        Commands::PurgeOld { max_age_secs } => commands::purge_old(&fleet, max_age_secs).await,
        Commands::PurgeExpired { label } => commands::purge_expired(&fleet, &label).await,
        Commands::ListVms => commands::list_vms(&fleet).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_vm_collects_repeated_labels() {
        let cli = Cli::try_parse_from([
            "vm-operator",
            "create-vm",
            "--name",
            "scan-1",
            "--model",
            "cx22",
            "--image",
            "debian-12",
            "-l",
            "env=scan",
            "-l",
            "owner=masscan",
            "--ttl-secs",
            "3600",
        ])
        .unwrap();

        match cli.command {
            Commands::CreateVm { label, ttl_secs, .. } => {
                assert_eq!(label, vec!["env=scan", "owner=masscan"]);
                assert_eq!(ttl_secs, Some(3600));
            }
            _ => panic!("expected create-vm"),
        }
    }

    #[test]
    fn add_key_requires_key_material() {
        assert!(Cli::try_parse_from(["vm-operator", "add-key", "--name", "k"]).is_err());
        assert!(
            Cli::try_parse_from([
                "vm-operator",
                "add-key",
                "--name",
                "k",
                "--public-key",
                "ssh-ed25519 AAAA",
                "--public-key-file",
                "/tmp/k.pub",
            ])
            .is_err()
        );
    }
}
