//! Rubric CLI
//!
//! Main entry point for serving the grading API and managing its datastore.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rubric_grading::{ExerciseBrief, OpenAiCompatClient};
use rubric_pipeline::{
    create_router, AppState, Config, Datastore, Pipeline, SqliteStore, Submission, UserAccount,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Rubric - Credit-gated submission grading
///
/// Grades free-text submissions against a rubric through an external
/// completion service, charging one credit per request and awarding XP.
#[derive(Parser, Debug)]
#[command(name = "rubric")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: rubric.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Create the database schema
    InitDb,

    /// Create a user account with a credit balance
    Provision {
        /// User id
        #[arg(value_name = "USER_ID")]
        user_id: String,

        /// Initial credit balance
        #[arg(long, default_value_t = 10)]
        credits: u32,
    },

    /// Insert an exercise brief from a JSON file
    ImportBrief {
        /// Path to the brief JSON (camelCase fields)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Insert a submission from a JSON file
    AddSubmission {
        /// Path to the submission JSON (camelCase fields)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Serve { port, host } => serve(config, port, host).await,
        Command::InitDb => {
            open_store(&config)?;
            println!("Database ready at {}", config.database.path);
            Ok(())
        }
        Command::Provision { user_id, credits } => {
            let store = open_store(&config)?;
            store.insert_user(&UserAccount::new(&user_id, credits)).await?;
            println!("Provisioned user '{user_id}' with {credits} credits");
            Ok(())
        }
        Command::ImportBrief { file } => {
            let brief: ExerciseBrief = read_json(&file)?;
            open_store(&config)?.insert_brief(&brief).await?;
            println!("Imported exercise brief '{}'", brief.id);
            Ok(())
        }
        Command::AddSubmission { file } => {
            let submission: Submission = read_json(&file)?;
            open_store(&config)?.insert_submission(&submission).await?;
            println!("Added submission '{}'", submission.id);
            Ok(())
        }
    }
}

/// Builds the pipeline and serves the API until Ctrl+C.
async fn serve(mut config: Config, port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    config.validate()?;
    print_config(&config);

    let client_config = config.grading.client_config();
    if client_config.api_key.is_none() {
        tracing::warn!(
            env = %config.grading.api_key_env,
            "No completion API key set; requests will be sent unauthenticated"
        );
    }
    let client = OpenAiCompatClient::new(client_config)?;
    let store: Arc<dyn Datastore> = Arc::new(open_store(&config)?);
    let pipeline = Pipeline::new(&config, store, Arc::new(client))?;
    let router = create_router(AppState::new(pipeline));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind HTTP server to {addr}: {e}\n\nSuggestion: Use --port to pick a free port"
        )
    })?;

    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    SqliteStore::open(&config.database.path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to open database '{}': {e}\n\nSuggestion: Check database.path in your rubric.json",
            config.database.path
        )
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {e}", path.display()))?;
    serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Invalid JSON in '{}': {e}", path.display()))
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Database: {}", config.database.path);
    println!("  Completion model: {} ({})", config.grading.model, config.grading.base_url);
    println!("  Schema variant: {:?}", config.grading.schema_variant);
    println!("  Timeout: {}s", config.grading.timeout_seconds);
    println!(
        "  Rate limit: {} requests / {}s",
        config.rate_limit.max_requests, config.rate_limit.window_seconds
    );
    println!("  Serialize submissions: {}", config.serialize_submissions);
}
