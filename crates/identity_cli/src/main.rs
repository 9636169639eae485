//! Command-line front end for the identity core.
//!
//! # Responsibility
//! - Resolve configuration from `.env`, environment and flags.
//! - Run identify/show/health/seed against a SQLite contact store.
//! - Print results as JSON on stdout; errors go to stderr.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use identity_core::db::open_db;
use identity_core::{
    ContactId, ContactRepository, CoreConfig, IdentifyRequest, IdentifyResponse, IdentityService,
    NewContact, RepoError, SqliteContactRepository,
};
use log::info;
use std::path::PathBuf;

const SAMPLE_PHONE: &str = "123456";
const SAMPLE_PRIMARY_EMAIL: &str = "lorraine@hillvalley.edu";
const SAMPLE_SECONDARY_EMAIL: &str = "mcfly@hillvalley.edu";

#[derive(Parser)]
#[command(name = "identity")]
#[command(about = "Reconcile customer contacts sharing an email or phone number")]
#[command(version)]
struct Cli {
    /// SQLite database file (overrides IDENTITY_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Log level: trace|debug|info|warn|error (overrides IDENTITY_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Absolute log directory (overrides IDENTITY_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify a customer and print the consolidated contact
    Identify(IdentifyArgs),
    /// Print the consolidated contact for the group a contact id belongs to
    Show {
        /// Any contact id in the group
        id: ContactId,
    },
    /// Check store connectivity
    Health,
    /// Insert sample contacts into an empty store
    Seed,
}

#[derive(Args)]
struct IdentifyArgs {
    #[arg(long)]
    email: Option<String>,
    #[arg(long = "phone", alias = "phone-number")]
    phone_number: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = resolve_config(CoreConfig::from_env(), &cli);
    config.init_logging().map_err(anyhow::Error::msg)?;

    let conn = open_db(&config.db_path)
        .with_context(|| format!("opening contact store `{}`", config.db_path.display()))?;
    let service = IdentityService::new(SqliteContactRepository::try_new(&conn)?);

    match cli.command {
        Commands::Identify(args) => {
            let request = IdentifyRequest {
                email: args.email,
                phone_number: args.phone_number,
            };
            let contact = service.identify(&request)?;
            print_json(&IdentifyResponse::from(contact))?;
        }
        Commands::Show { id } => {
            let contact = service.consolidated_for(id)?;
            print_json(&IdentifyResponse::from(contact))?;
        }
        Commands::Health => {
            let health = service.health()?;
            print_json(&serde_json::json!({
                "status": "ok",
                "database": "connected",
                "contactCount": health.contact_count,
                "version": health.core_version,
            }))?;
        }
        Commands::Seed => {
            let created = seed_sample_contacts(service.reconciler().store())?;
            info!("event=seed module=cli status=ok created={created}");
            print_json(&serde_json::json!({ "created": created }))?;
        }
    }

    Ok(())
}

fn resolve_config(mut config: CoreConfig, cli: &Cli) -> CoreConfig {
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(log_dir) = &cli.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    config
}

/// Inserts one primary and one linked secondary sharing a phone number.
///
/// No-op on a non-empty store. Returns the number of created contacts.
fn seed_sample_contacts<R: ContactRepository>(store: &R) -> Result<usize, RepoError> {
    store.atomic(|store| {
        if store.count_contacts()? > 0 {
            return Ok(0);
        }
        let primary = store.create_contact(&NewContact::primary(
            Some(SAMPLE_PRIMARY_EMAIL),
            Some(SAMPLE_PHONE),
        ))?;
        store.create_contact(&NewContact::secondary(
            Some(SAMPLE_SECONDARY_EMAIL),
            Some(SAMPLE_PHONE),
            primary.id,
        ))?;
        Ok(2)
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
