use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use keyform_core::codec::format_number;
use keyform_core::{random_id, FieldValue};
use keyform_persist::SqliteStore;
use keyform_repository::Repository;
use keyform_schema::{Entity, Schema, SchemaFile};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "keyformctl", version, about = "keyform CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Schema declaration file (JSON)
    #[arg(long = "schema", global = true, env = "KEYFORM_SCHEMA")]
    schema: Option<PathBuf>,

    /// SQLite database path (default: ~/.keyform/keyform.db)
    #[arg(long = "db", global = true, env = "KEYFORM_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a new entity id (schema strategy if a schema is given)
    GenId,
    /// Create or update an entity
    Save {
        /// Existing id to update; a new id is generated when omitted
        #[arg(long = "id")]
        id: Option<String>,
        /// Assign a field from its flat form, e.g. `--set tags=a|b`
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// Clear a field
        #[arg(long = "clear")]
        clear: Vec<String>,
    },
    /// Print an entity
    Fetch { id: String },
    /// Delete an entity
    Remove { id: String },
    /// Set a time-to-live in seconds
    Expire { id: String, secs: u64 },
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected field=value, got `{}`", s)),
    }
}

fn init_tracing() {
    let env = std::env::var("KEYFORM_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEYFORM_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEYFORM_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_schema(path: Option<&PathBuf>) -> Result<Arc<Schema>> {
    let path = path.ok_or_else(|| anyhow!("--schema (or KEYFORM_SCHEMA) is required"))?;
    let schema = SchemaFile::load(path)?.compile().with_context(|| format!("compiling {}", path.display()))?;
    debug!(prefix = schema.prefix(), fields = schema.fields().len(), "schema loaded");
    Ok(Arc::new(schema))
}

fn open_repository(cli: &Cli) -> Result<Repository> {
    let schema = load_schema(cli.schema.as_ref())?;
    let store = match cli.db.as_deref() {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::open_default()?,
    };
    Ok(Repository::new(schema, Arc::new(store)))
}

fn render_value(v: Option<&FieldValue>) -> String {
    match v {
        None => "(null)".to_string(),
        Some(FieldValue::Text(s)) => s.clone(),
        Some(FieldValue::Number(n)) => format_number(*n),
        Some(FieldValue::Boolean(b)) => b.to_string(),
        Some(FieldValue::Array(items)) => items.join(", "),
    }
}

fn print_entity(output: Output, entity: &Entity) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<20} {}", "ID", entity.id().unwrap_or("-"));
            for (desc, v) in entity.values() {
                println!("{:<20} {}", desc.name, render_value(v));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&entity.to_json())?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenId => {
            let id = match cli.schema.as_ref() {
                Some(_) => load_schema(cli.schema.as_ref())?.generate_id()?,
                None => random_id(),
            };
            println!("{}", id);
        }
        Commands::Save { id, set, clear } => {
            let repo = open_repository(&cli)?;
            let mut entity = match id {
                Some(id) => repo.fetch(id).await?,
                None => repo.create_entity()?,
            };
            for (field, raw) in set {
                entity.set_raw(field, raw).with_context(|| format!("setting {}", field))?;
            }
            for field in clear {
                entity.clear(field)?;
            }
            let id = repo.save(&mut entity).await?;
            info!(id = %id, key = %repo.key_for(&id), "saved");
            print_entity(cli.output, &entity)?;
        }
        Commands::Fetch { id } => {
            let repo = open_repository(&cli)?;
            let entity = repo.fetch(id).await?;
            print_entity(cli.output, &entity)?;
        }
        Commands::Remove { id } => {
            let repo = open_repository(&cli)?;
            repo.remove(id).await?;
            info!(key = %repo.key_for(id), "removed");
        }
        Commands::Expire { id, secs } => {
            let repo = open_repository(&cli)?;
            if !repo.expire(id, *secs).await? {
                eprintln!("no entity stored at {}", repo.key_for(id));
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
