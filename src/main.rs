use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use nesting::commands::{self, WriteOperation};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the tables of every entity in the schema
    InitDb {
        #[clap(short, long)]
        schema: PathBuf,
        #[clap(short, long, default_value = "nesting.db")]
        database: String,
    },
    /// Create a row and its nested relations
    Create {
        #[clap(short, long)]
        schema: PathBuf,
        #[clap(short, long, default_value = "nesting.db")]
        database: String,
        #[clap(long)]
        serializer: String,
        /// JSON file holding the mutation input
        #[clap(short, long)]
        input: PathBuf,
        #[clap(long)]
        settings: Option<PathBuf>,
    },
    /// Update a row, selected by `pk` in the input, and its nested relations
    Update {
        #[clap(short, long)]
        schema: PathBuf,
        #[clap(short, long, default_value = "nesting.db")]
        database: String,
        #[clap(long)]
        serializer: String,
        #[clap(short, long)]
        input: PathBuf,
        #[clap(long)]
        settings: Option<PathBuf>,
    },
    Delete {
        #[clap(short, long)]
        schema: PathBuf,
        #[clap(short, long, default_value = "nesting.db")]
        database: String,
        #[clap(short, long)]
        entity: String,
        #[clap(long)]
        pk: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    match args.command {
        Commands::InitDb { schema, database } => {
            info!("Initializing database: {}", database);
            commands::init_db(&schema, &database).await?;
        }
        Commands::Create {
            schema,
            database,
            serializer,
            input,
            settings,
        } => {
            info!("Running create with {}", serializer);
            let output = commands::write(
                WriteOperation::Create,
                &schema,
                &database,
                &serializer,
                &input,
                settings.as_deref(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Update {
            schema,
            database,
            serializer,
            input,
            settings,
        } => {
            info!("Running update with {}", serializer);
            let output = commands::write(
                WriteOperation::Update,
                &schema,
                &database,
                &serializer,
                &input,
                settings.as_deref(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Delete {
            schema,
            database,
            entity,
            pk,
        } => {
            info!("Deleting {} {}", entity, pk);
            let output = commands::delete(&schema, &database, &entity, pk).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("sqlx=warn,{}", log_level)))
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
