//! diffsync-server binary entry point.
//!
//! Usage:
//! ```bash
//! diffsync-server --config diffsync.toml show --entity-type note --entity-id 1
//! diffsync-server edit --entity-type note --entity-id 1 --content "Hello, world"
//! diffsync-server --help
//! ```
//!
//! `edit` runs one full protocol round-trip in-process: a client session
//! seeded from storage sends its edit as a patch, applies the server's
//! diff, acknowledges it and ends the session.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use diffsync_server::{
    spawn_serve, Channel, Config, DiffSyncProvider, DiffSyncService, MpscChannel, SqliteStorage,
    SynchronizableService,
};
use std::path::PathBuf;
use std::sync::Arc;
use sync_core::ClientDocument;
use sync_types::{
    DiffSyncEntity, DiffSyncIdentifier, End, Envelope, Message, PatchBatch, Start, PROTOCOL_VERSION,
};

/// Differential Synchronization session server.
#[derive(Parser, Debug)]
#[command(name = "diffsync-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when missing)
    #[arg(long, global = true, default_value = "diffsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the stored document and its audit trail length
    Show {
        /// Entity type
        #[arg(long)]
        entity_type: String,

        /// Entity id
        #[arg(long)]
        entity_id: String,
    },

    /// Replace the document content through a sync round-trip
    Edit {
        /// Entity type
        #[arg(long)]
        entity_type: String,

        /// Entity id
        #[arg(long)]
        entity_id: String,

        /// New content
        #[arg(long)]
        content: String,

        /// Client identifier used for the session
        #[arg(long, default_value = "cli")]
        client_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("diffsync_server=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let storage = Arc::new(
        SqliteStorage::new(&config.storage.database)
            .await
            .with_context(|| format!("Failed to open {}", config.storage.database.display()))?,
    );

    match cli.command {
        Commands::Show {
            entity_type,
            entity_id,
        } => {
            let entity = DiffSyncEntity::new(entity_type, entity_id);
            show(&storage, &entity).await?;
        }
        Commands::Edit {
            entity_type,
            entity_id,
            content,
            client_id,
        } => {
            let entity = DiffSyncEntity::new(entity_type, entity_id);
            let result = edit(&config, storage, &entity, &client_id, content).await?;
            println!("{}", result);
        }
    }

    Ok(())
}

fn load_config(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    Config::from_file(path).context("Failed to load configuration")
}

async fn show(storage: &SqliteStorage, entity: &DiffSyncEntity) -> Result<()> {
    let content = storage.get_entity(entity).await?;
    let summaries = storage.summaries(entity).await?;

    println!("{}", entity);
    println!("  audited patches: {}", summaries.len());
    println!("---");
    println!("{}", content);
    Ok(())
}

async fn edit(
    config: &Config,
    storage: Arc<SqliteStorage>,
    entity: &DiffSyncEntity,
    client_id: &str,
    content: String,
) -> Result<String> {
    let mut service = DiffSyncService::new(Arc::new(DiffSyncProvider::new()), config.patch);
    if config.audit.enabled {
        service = service.with_audit(storage.clone());
    }
    service.register(entity.entity_type.clone(), storage.clone());

    let (server_end, client_end) = MpscChannel::pair(config.channel.buffer);
    let serve = spawn_serve(Arc::new(service), Arc::new(server_end));

    let identifier = DiffSyncIdentifier::client(client_id, "diffsync-server");
    let seal = |message: Message| Envelope::seal(entity.clone(), identifier.clone(), &message);

    let mut document = ClientDocument::new(client_id, storage.get_entity(entity).await?, config.patch);
    client_end
        .send(seal(Message::Start(Start {
            version: PROTOCOL_VERSION,
        }))?)
        .await?;

    document.edit(content);
    client_end
        .send(seal(Message::Patch(PatchBatch {
            patches: document.make_patches(),
        }))?)
        .await?;

    // Acks for our edits arrive first, then the server's diff.
    loop {
        match client_end.recv().await?.open()? {
            Message::Ack(ack) => document.receive_ack(&ack),
            Message::Patch(batch) => {
                for patch in &batch.patches {
                    let ack = document.receive_patch(patch);
                    client_end.send(seal(Message::Ack(ack))?).await?;
                }
                break;
            }
            Message::End(end) => bail!(
                "server ended the session: {}",
                end.reason.unwrap_or_default()
            ),
            Message::Start(_) => {}
        }
    }

    client_end
        .send(seal(Message::End(End { reason: None }))?)
        .await?;
    drop(client_end);
    serve.await??;

    tracing::info!(
        "Synchronized {} ({} unacknowledged patches)",
        entity,
        document.pending().len()
    );
    Ok(document.content().to_string())
}
