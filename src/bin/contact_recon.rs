//! Contact Reconciliation CLI
//!
//! Runs the reconciliation core against a JSON export of the address book,
//! with checkpoints kept in a JSON file between runs.
//!
//! Usage:
//!   cargo run --features cli --bin contact_recon -- \
//!     --contacts contacts.json --state checkpoints.json check
//!
//! Examples:
//!   # Record that the app went to the background
//!   cargo run --features cli --bin contact_recon -- --contacts contacts.json backgrounded
//!
//!   # List duplicate clusters without touching checkpoints
//!   cargo run --features cli --bin contact_recon -- --contacts contacts.json duplicates
//!
//!   # Delete a contact and everything linked to it
//!   cargo run --features cli --bin contact_recon -- --contacts contacts.json delete 42 --linked

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use contact_recon::{
    build_snapshot, find_duplicates, ContactId, ContactsManager, DuplicateClusters,
    JsonFileCheckpointPersistence, JsonFileContactSource, Person, ReconConfig,
};

const DEFAULT_STATE_FILE: &str = "checkpoints.json";

/// Contact reconciliation over a JSON address-book export
#[derive(Parser, Debug)]
#[command(name = "contact_recon")]
#[command(about = "Find new, recent and duplicate contacts in an address-book export")]
struct Args {
    /// JSON array of contact records
    #[arg(long, short = 'c')]
    contacts: PathBuf,

    /// Checkpoint file (defaults to CONTACT_RECON_CHECKPOINT_PATH, then ./checkpoints.json)
    #[arg(long, short = 's')]
    state: Option<PathBuf>,

    /// Do not collapse linked records into one person
    #[arg(long)]
    no_merge: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a check, advance checkpoints and print the new contacts
    Check,
    /// Record that the app left the foreground
    Backgrounded,
    /// Print duplicate clusters
    Duplicates,
    /// Delete a contact (with --linked, every record linked to it)
    Delete {
        id: String,
        #[arg(long)]
        linked: bool,
    },
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    new_contacts: &'a [Person],
    recent_contacts: &'a [Person],
    duplicates: &'a DuplicateClusters,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ReconConfig::from_env().context("Invalid CONTACT_RECON_* settings")?;
    if args.no_merge {
        config.merge_linked = false;
    }
    let state_path = args
        .state
        .clone()
        .or_else(|| config.checkpoint_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

    let source = Arc::new(JsonFileContactSource::new(&args.contacts));

    let manager = ContactsManager::open(
        source,
        Arc::new(JsonFileCheckpointPersistence::new(&state_path)),
        config,
    )
    .await
    .with_context(|| format!("Failed to open checkpoints at {}", state_path.display()))?;

    match args.command {
        Command::Check => {
            manager.check_new_contacts().await?;
            let views = manager.views().await;
            print_json(&CheckOutput {
                new_contacts: views.new_contacts_since_last_check(),
                recent_contacts: views.recent_contacts(),
                duplicates: views.duplicated_contacts(),
            })?;
        }
        Command::Backgrounded => {
            let checkpoints = manager.record_app_backgrounded().await;
            print_json(&checkpoints)?;
        }
        Command::Delete { id, linked } => {
            // Deletion works against the current snapshot
            manager.check_new_contacts().await?;
            let id = ContactId::from(id);
            if linked {
                let deleted = manager.remove_all_linked_contacts(&id).await?;
                print_json(&deleted)?;
            } else {
                manager.delete_contact(&id).await.with_context(|| {
                    format!("Failed to delete {} (merged contacts need --linked)", id)
                })?;
                print_json(&vec![id])?;
            }
        }
        Command::Duplicates => {
            // Read-only: no check, so checkpoints stay where they are
            let snapshot = build_snapshot(
                &JsonFileContactSource::new(&args.contacts),
                manager.config().list_scope(),
                manager.config().merge_linked,
            )
            .await
            .with_context(|| format!("Failed to read {}", args.contacts.display()))?;
            print_json(&find_duplicates(snapshot.persons()))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
