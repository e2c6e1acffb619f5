//! `intentsql` command-line front end.
//!
//! ## Usage
//!
//! ```bash
//! # Execute an intent against the configured database
//! intentsql run --intent '{"action": "list-tables"}'
//! echo '{"action": "fetch-records", "filters": {"table": "users"}}' | intentsql run --stdin
//!
//! # Compile offline against a schema file, no database needed
//! intentsql explain --schema schema.toml --intent '{"action": "table-summary", "filters": {"table": "users"}}'
//!
//! # List tables of the configured schema
//! intentsql tables
//!
//! # One intent per stdin line; entity filters carry over between lines
//! intentsql session < intents.jsonl
//! ```
//!
//! Logging goes to stderr (or `[logging] file`). `INTENTSQL_LOG` overrides the
//! level filter and `INTENTSQL_LOG_JSON=1` switches to JSON lines.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use intentsql::config::LoggingConfig;
use intentsql::schema::{SchemaCatalog, SchemaSource, StaticSchema};
use intentsql::{
    Action, Compiler, CompilerSettings, Config, ExecutionResult, Intent, IntentError,
    PostgresDatabase, QueryEngine,
};
use serde_json::json;
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Debug, Parser)]
#[command(name = "intentsql", version, about = "Compile query intents to safe SQL and run them")]
struct Cli {
    /// Configuration file (defaults to config.toml + config.local.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute an intent and print the JSON result
    Run {
        #[command(flatten)]
        input: IntentInput,
    },
    /// Compile an intent against a static schema and print SQL + parameters
    Explain {
        /// TOML file with a `[tables]` table of column lists
        #[arg(long)]
        schema: PathBuf,

        #[command(flatten)]
        input: IntentInput,
    },
    /// List the tables of the configured schema
    Tables,
    /// Execute newline-delimited intents from stdin in one session,
    /// printing one JSON result per line
    Session,
}

#[derive(Debug, clap::Args)]
#[group(required = true, multiple = false)]
struct IntentInput {
    /// Intent as JSON: {"action": ..., "filters": {...}}
    #[arg(long)]
    intent: Option<String>,

    /// Read the intent JSON from stdin
    #[arg(long)]
    stdin: bool,
}

impl IntentInput {
    fn read(&self) -> anyhow::Result<Intent> {
        let text = match &self.intent {
            Some(text) => text.clone(),
            None => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("reading intent from stdin")?;
                buf
            }
        };
        Intent::from_json(&text).context("intent is not valid JSON")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Command::Run { input } => {
            let intent = input.read()?;
            let engine = QueryEngine::from_config(&config);
            let result = engine.execute(&intent).await;
            print_json(&result.to_json())?;
            Ok(exit_code(&result))
        }
        Command::Explain { schema, input } => {
            let intent = input.read()?;
            explain(&config, &schema, &intent).await
        }
        Command::Tables => {
            let db = PostgresDatabase::from_config(&config.database);
            let tables = db
                .list_tables()
                .await
                .with_context(|| format!("listing tables of schema '{}'", db.schema()))?;
            for table in tables {
                println!("{table}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Session => {
            let engine = QueryEngine::from_config(&config);
            run_session(&engine).await
        }
    }
}

async fn run_session(engine: &QueryEngine) -> anyhow::Result<ExitCode> {
    let sessions = engine.sessions();
    let id = sessions.create_session();
    info!(session = %id, "session started");

    let mut failed = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        sessions.sweep();
        let intent = match Intent::from_json(&line) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "skipping line that is not an intent");
                failed += 1;
                continue;
            }
        };
        let result = engine
            .compile_and_execute_in_session(&id, &intent.action, &intent.filters)
            .await;
        if result.is_error() {
            failed += 1;
        }
        println!("{}", serde_json::to_string(&result.to_json())?);
    }

    info!(
        session = %id,
        queries = sessions.query_history(&id, None).len(),
        failed,
        "session finished"
    );
    sessions.clear_session(&id);
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file '{}' does not exist", path.display());
            }
            Config::from_file(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Config::load().context("loading configuration"),
    }
}

async fn explain(config: &Config, schema: &Path, intent: &Intent) -> anyhow::Result<ExitCode> {
    let source = StaticSchema::from_file(schema)
        .with_context(|| format!("loading schema file {}", schema.display()))?;
    let catalog = Arc::new(SchemaCatalog::new(Arc::new(source)));
    let compiler = Compiler::new(catalog, CompilerSettings::from_config(config));

    let compiled = match Action::parse(&intent.action) {
        Some(action) => compiler.compile(action, &intent.filters).await,
        None => Err(IntentError::UnsupportedAction {
            action: intent.action.clone(),
        }),
    };

    match compiled {
        Ok(plan) => {
            print_json(&json!({
                "action": plan.action.tag(),
                "sql_query": plan.sql_text(),
                "sql_params": plan.parameters(),
                "statements": plan.statements,
                "visualization": plan.visualization(),
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let result = ExecutionResult::failure(err, None);
            print_json(&result.to_json())?;
            Ok(exit_code(&result))
        }
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(result: &ExecutionResult) -> ExitCode {
    if result.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(logging_config: &LoggingConfig) {
    // Environment variables take precedence over config file values
    let level = env::var("INTENTSQL_LOG").unwrap_or_else(|_| logging_config.level.clone());
    let json = env::var("INTENTSQL_LOG_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let (non_blocking, guard) = match &logging_config.file {
        Some(path) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => tracing_appender::non_blocking(file),
            Err(e) => {
                eprintln!("ERROR: Unable to open log file '{}': {e}", path.display());
                tracing_appender::non_blocking(std::io::stderr())
            }
        },
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_target(true)
            .with_writer(non_blocking.clone())
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
