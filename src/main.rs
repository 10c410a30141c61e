use anyhow::{Context, Result};
use budget_query_planner::config::{LlmSettings, PlannerConfig};
use budget_query_planner::executor::SqliteExecutor;
use budget_query_planner::ingest;
use budget_query_planner::llm::LlmClient;
use budget_query_planner::planner::QueryPlanner;
use budget_query_planner::sanitizer::SqlSanitizer;
use budget_query_planner::schema::SchemaDescriptor;
use budget_query_planner::selector;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "budget-query")]
#[command(about = "Answer questions about state budget and vendor payment data with safe, read-only SQL")]
struct Args {
    /// Schema descriptor JSON (default: built-in state finance tables)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, sanitize and run a natural-language question
    Ask {
        question: String,

        /// Planner configuration JSON (default: PLANNER_* environment variables)
        #[arg(long)]
        config: Option<PathBuf>,

        /// SQLite database to query
        #[arg(long)]
        db: Option<PathBuf>,

        /// Extra SQLite files attached read-only
        #[arg(long)]
        attach: Vec<PathBuf>,

        /// API key (or set GROQ_API_KEY / OPENAI_API_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Always ask the language model
        #[arg(long)]
        no_templates: bool,
    },

    /// Run the sanitizer over a SQL statement without executing it
    CheckSql {
        sql: String,

        #[arg(long, default_value_t = 4000)]
        max_length: usize,
    },

    /// Load a CSV export into a table of the schema
    Ingest {
        #[arg(long)]
        db: PathBuf,

        #[arg(long)]
        table: String,

        #[arg(long)]
        csv: PathBuf,

        /// Delete existing rows first
        #[arg(long)]
        replace: bool,
    },

    /// Print the schema descriptor as JSON
    Schema,
}

fn load_schema(path: Option<&PathBuf>) -> Result<SchemaDescriptor> {
    match path {
        Some(p) => SchemaDescriptor::from_json_file(p)
            .with_context(|| format!("loading schema from {}", p.display())),
        None => Ok(SchemaDescriptor::state_finance()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let schema = Arc::new(load_schema(args.schema.as_ref())?);

    match args.command {
        Command::Ask {
            question,
            config,
            db,
            attach,
            api_key,
            no_templates,
        } => {
            let mut config = match config {
                Some(path) => PlannerConfig::from_json_file(&path)?,
                None => PlannerConfig::from_env()?,
            };
            if let Some(db) = db {
                config.database_path = db;
            }
            config.attached_databases.extend(attach);
            if no_templates {
                config.use_templates = false;
            }
            config.validate()?;

            let settings = match api_key {
                Some(key) => LlmSettings {
                    api_key: key,
                    ..LlmSettings::from_env().unwrap_or_default()
                },
                None => LlmSettings::from_env()?,
            };

            info!("Budget query planner starting...");
            info!("Database: {}", config.database_path.display());

            let model = Arc::new(LlmClient::new(&settings)?);
            let executor = Arc::new(SqliteExecutor::new(
                config.database_path.clone(),
                config.attached_databases.clone(),
            ));
            let planner = QueryPlanner::new(schema, model, executor, config);

            let response = planner.plan_and_run(&question).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_answered() {
                std::process::exit(1);
            }
        }

        Command::CheckSql { sql, max_length } => {
            let sanitizer = SqlSanitizer::new(schema.clone(), max_length);
            let verdict = sanitizer.sanitize(&sql);
            let table = selector::select_table_for_sql(&sql, &schema).ok();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "table": table,
                    "verdict": verdict,
                }))?
            );
            if !verdict.is_accepted() {
                std::process::exit(1);
            }
        }

        Command::Ingest {
            db,
            table,
            csv,
            replace,
        } => {
            ingest::create_tables(&db, &schema)?;
            let report = ingest::ingest_csv(&db, &schema, &table, &csv, replace)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(schema.as_ref())?);
        }
    }

    Ok(())
}
